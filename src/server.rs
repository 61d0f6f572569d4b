use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bridge::BridgeCore;
use crate::error::BridgeError;

// ── Listener startup ────────────────────────────────────────────

/// Bind the plugin listener on `127.0.0.1:port` and serve it on a background
/// task. Resolves once the port is bound; returns the bound port and the
/// serve task handle.
pub(crate) async fn spawn_listener(
    core: Arc<BridgeCore>,
    port: u16,
) -> Result<(u16, JoinHandle<()>), BridgeError> {
    let app = router(core);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BridgeError::Transport {
            message: format!("failed to bind {addr}: {e}"),
        })?;
    let bound = listener
        .local_addr()
        .map_err(|e| BridgeError::Transport {
            message: format!("failed to read bound address: {e}"),
        })?
        .port();

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "plugin listener failed");
        }
    });

    Ok((bound, handle))
}

fn router(core: Arc<BridgeCore>) -> Router {
    // The plugin dials the root path; /ws is kept as an alias.
    Router::new()
        .route("/", any(ws_upgrade))
        .route("/ws", any(ws_upgrade))
        .with_state(core)
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(core): State<Arc<BridgeCore>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_connection(core, socket))
}

// ── Connection pump ─────────────────────────────────────────────

/// Drive one plugin connection: outbound frames come from the bridge through
/// an unbounded channel into the write half; inbound text frames feed the
/// correlation engine. Runs until the socket closes or a newer connection
/// displaces this one.
async fn run_connection(core: Arc<BridgeCore>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let generation = core.attach_peer(tx);
    info!(generation, "design host plugin connected");

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(incoming) = stream.next().await {
        match incoming {
            Ok(Message::Text(frame)) => core.handle_incoming(frame.as_str()),
            Ok(Message::Close(_)) => break,
            // The plugin sends no binary frames; ping/pong is answered by
            // the protocol layer.
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "plugin socket error");
                break;
            }
        }
    }

    writer.abort();
    if core.detach_peer(generation) {
        info!(generation, "design host plugin disconnected");
    }
}
