use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::Message;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::protocol::{CanvasAction, CommandEnvelope, ResponseEnvelope};

// ── Configuration ───────────────────────────────────────────────

pub const DEFAULT_PORT: u16 = 3055;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bridge configuration. Port 0 binds an ephemeral port.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Local port the plugin dials in to.
    pub port: u16,
    /// How long a sent command may wait for its reply.
    pub request_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// ── Shared core ─────────────────────────────────────────────────

type Settlement = Result<ResponseEnvelope, BridgeError>;

/// One in-flight command. Removal from the pending map is the single
/// settlement point: whichever of reply / timeout / disconnect removes the
/// entry first wins, and the losing paths see an empty slot.
struct PendingRequest {
    action: CanvasAction,
    done: oneshot::Sender<Settlement>,
}

/// Outbound half of the canonical peer connection. The generation counter
/// lets a displaced connection's reader recognize that it no longer owns
/// the slot.
pub(crate) struct PeerHandle {
    tx: mpsc::UnboundedSender<Message>,
    generation: u64,
}

/// State shared between the listener tasks and bridge callers. All fields
/// are touched only in short critical sections, never across an await.
pub(crate) struct BridgeCore {
    pub(crate) config: BridgeConfig,
    peer: Mutex<Option<PeerHandle>>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    generation: AtomicU64,
}

impl BridgeCore {
    pub(crate) fn is_connected(&self) -> bool {
        self.peer.lock().is_some()
    }

    /// Install a newly accepted connection as the canonical peer. Returns the
    /// connection's generation.
    ///
    /// Last-write-wins: a reloading plugin reconnects before its old socket
    /// is torn down, so a second peer replaces the first rather than being
    /// rejected. Requests bound to the displaced transport can never be
    /// answered and are failed as disconnected here.
    pub(crate) fn attach_peer(&self, tx: mpsc::UnboundedSender<Message>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let displaced = self.peer.lock().replace(PeerHandle { tx, generation });
        if displaced.is_some() {
            warn!("a new plugin connection replaced the previous one");
            self.fail_all_pending();
        }
        generation
    }

    /// Clear the peer slot if `generation` still owns it. Returns true when
    /// this call performed the teardown; false means a newer connection has
    /// already taken over and nothing must be touched.
    pub(crate) fn detach_peer(&self, generation: u64) -> bool {
        let mut peer = self.peer.lock();
        let owns_slot = peer
            .as_ref()
            .is_some_and(|handle| handle.generation == generation);
        if owns_slot {
            *peer = None;
            drop(peer);
            self.fail_all_pending();
        }
        owns_slot
    }

    /// Take the peer handle out of the slot, if any.
    pub(crate) fn take_peer(&self) -> Option<mpsc::UnboundedSender<Message>> {
        self.peer.lock().take().map(|handle| handle.tx)
    }

    /// Reject every pending request as disconnected. Each entry settles at
    /// most once because `drain` removes it from the map.
    pub(crate) fn fail_all_pending(&self) {
        let drained: Vec<(String, PendingRequest)> = self.pending.lock().drain().collect();
        for (id, entry) in drained {
            debug!(%id, action = entry.action.name(), "rejecting pending request: disconnected");
            let _ = entry.done.send(Err(BridgeError::Disconnected));
        }
    }

    /// Feed one inbound text frame to the correlation engine. Malformed
    /// frames and replies to unknown identifiers are logged and dropped;
    /// neither affects other pending entries.
    pub(crate) fn handle_incoming(&self, raw: &str) {
        let response = match ResponseEnvelope::from_frame(raw) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "dropping unparseable frame from plugin");
                return;
            }
        };
        let entry = self.pending.lock().remove(&response.id);
        match entry {
            Some(entry) => {
                debug!(
                    id = %response.id,
                    action = entry.action.name(),
                    success = response.success,
                    "reply matched pending request"
                );
                let _ = entry.done.send(Ok(response));
            }
            None => {
                warn!(id = %response.id, "reply for unknown or retired request; discarding");
            }
        }
    }

    /// Send one command and wait for its reply or deadline.
    pub(crate) async fn send(
        &self,
        action: CanvasAction,
        payload: Value,
    ) -> Result<ResponseEnvelope, BridgeError> {
        // Fail fast with no frame built when there is no live peer.
        let tx = self
            .peer
            .lock()
            .as_ref()
            .map(|peer| peer.tx.clone())
            .ok_or(BridgeError::NotConnected)?;

        let id = self.next_request_id();
        let envelope = CommandEnvelope {
            id: id.clone(),
            action,
            payload,
            timestamp: unix_millis(),
        };
        let frame = envelope.to_frame().map_err(BridgeError::from)?;

        let (done, mut done_rx) = oneshot::channel();
        self.pending
            .lock()
            .insert(id.clone(), PendingRequest { action, done });

        if tx.send(Message::Text(frame.into())).is_err() {
            // The writer task is gone: the connection died between the
            // liveness check and the send.
            self.pending.lock().remove(&id);
            return Err(BridgeError::Disconnected);
        }
        debug!(%id, action = action.name(), "command sent");

        let deadline = tokio::time::sleep(self.config.request_timeout);
        tokio::pin!(deadline);
        tokio::select! {
            settled = &mut done_rx => match settled {
                Ok(result) => result,
                // Sender dropped without settling: bridge shut down.
                Err(_) => Err(BridgeError::Disconnected),
            },
            () = &mut deadline => {
                if self.pending.lock().remove(&id).is_some() {
                    warn!(%id, action = action.name(), "request timed out");
                    Err(BridgeError::Timeout {
                        id,
                        timeout_ms: duration_millis(self.config.request_timeout),
                    })
                } else {
                    // A reply claimed the entry right at the deadline; it has
                    // already won, so take its settlement instead.
                    match done_rx.await {
                        Ok(result) => result,
                        Err(_) => Err(BridgeError::Disconnected),
                    }
                }
            }
        }
    }

    /// Correlation identifiers: unix-millis prefix keeps them monotonic
    /// enough, the random suffix makes them unguessable within a process
    /// lifetime.
    fn next_request_id(&self) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(7)
            .map(char::from)
            .collect();
        format!("{}-{}", unix_millis(), suffix)
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_millis)
        .unwrap_or(0)
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ── Bridge ──────────────────────────────────────────────────────

/// The command bridge: owns the plugin listener, the single peer connection,
/// and the pending-request map. Constructed explicitly and passed by
/// reference into whatever composes the dispatch layer; there is no ambient
/// singleton.
pub struct Bridge {
    core: Arc<BridgeCore>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            core: Arc::new(BridgeCore {
                config,
                peer: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
            listener: Mutex::new(None),
        }
    }

    /// Whether a plugin connection is currently live.
    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    /// Bind the listener and start accepting the plugin connection. Resolves
    /// once the port is bound; returns the bound port.
    pub async fn start(&self) -> Result<u16, BridgeError> {
        if self.listener.lock().is_some() {
            return Err(BridgeError::Transport {
                message: "listener already started".to_string(),
            });
        }
        let (port, handle) =
            crate::server::spawn_listener(Arc::clone(&self.core), self.core.config.port).await?;
        *self.listener.lock() = Some(handle);
        Ok(port)
    }

    /// Close the active connection and the listener. Outstanding requests
    /// are rejected as disconnected.
    pub async fn stop(&self) {
        if let Some(tx) = self.core.take_peer() {
            let _ = tx.send(Message::Close(None));
        }
        self.core.fail_all_pending();
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Send one command to the plugin and await its correlated reply.
    pub async fn send(
        &self,
        action: CanvasAction,
        payload: Value,
    ) -> Result<ResponseEnvelope, BridgeError> {
        self.core.send(action, payload).await
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<BridgeCore> {
        &self.core
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_bridge(timeout: Duration) -> Arc<Bridge> {
        Arc::new(Bridge::new(BridgeConfig {
            port: 0,
            request_timeout: timeout,
        }))
    }

    /// Attach a fake plugin; returns its generation and the frames it
    /// receives.
    fn attach_fake_peer(bridge: &Bridge) -> (u64, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = bridge.core.attach_peer(tx);
        (generation, rx)
    }

    fn sent_envelope(message: &Message) -> CommandEnvelope {
        let frame = match message {
            Message::Text(frame) => frame.as_str().to_string(),
            _ => String::new(),
        };
        serde_json::from_str(&frame).unwrap()
    }

    fn reply_frame(id: &str, data: Value) -> String {
        json!({"id": id, "success": true, "data": data}).to_string()
    }

    #[tokio::test]
    async fn test_send_without_peer_fails_fast() {
        let bridge = test_bridge(Duration::from_secs(30));
        let result = bridge
            .send(CanvasAction::DeleteNode, json!({"nodeId": "1:2"}))
            .await;
        assert!(matches!(result, Err(BridgeError::NotConnected)));
        assert_eq!(bridge.core.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_replies_settle_out_of_order() {
        let bridge = test_bridge(Duration::from_secs(30));
        let (_, mut peer_rx) = attach_fake_peer(&bridge);

        let first = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move {
                bridge
                    .send(CanvasAction::CreateFrame, json!({"name": "a"}))
                    .await
            }
        });
        let second = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move {
                bridge
                    .send(CanvasAction::CreateText, json!({"content": "b"}))
                    .await
            }
        });

        let envelope_a = sent_envelope(&peer_rx.recv().await.unwrap());
        let envelope_b = sent_envelope(&peer_rx.recv().await.unwrap());
        assert_ne!(envelope_a.id, envelope_b.id);

        // Replies arrive in reverse order; each must settle its own request.
        bridge
            .core
            .handle_incoming(&reply_frame(&envelope_b.id, json!("node-b")));
        bridge
            .core
            .handle_incoming(&reply_frame(&envelope_a.id, json!("node-a")));

        let (reply_a, reply_b) = match (envelope_a.action, envelope_b.action) {
            (CanvasAction::CreateFrame, _) => (
                first.await.unwrap().unwrap(),
                second.await.unwrap().unwrap(),
            ),
            _ => (
                second.await.unwrap().unwrap(),
                first.await.unwrap().unwrap(),
            ),
        };
        assert_eq!(reply_a.data, Some(json!("node-a")));
        assert_eq!(reply_b.data, Some(json!("node-b")));
        assert_eq!(bridge.core.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_replies_are_discarded() {
        let bridge = test_bridge(Duration::from_secs(30));
        let (_, mut peer_rx) = attach_fake_peer(&bridge);

        let task = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move { bridge.send(CanvasAction::DeleteNode, json!({})).await }
        });
        let envelope = sent_envelope(&peer_rx.recv().await.unwrap());

        // Neither an unknown identifier nor garbage may disturb the pending
        // entry.
        bridge.core.handle_incoming(&reply_frame("no-such-id", json!(null)));
        bridge.core.handle_incoming("not json at all {");
        assert_eq!(bridge.core.pending_len(), 1);

        bridge
            .core
            .handle_incoming(&reply_frame(&envelope.id, json!("ok")));
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.data, Some(json!("ok")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_retires_request_and_discards_late_reply() {
        let bridge = test_bridge(Duration::from_millis(100));
        let (_, mut peer_rx) = attach_fake_peer(&bridge);

        let task = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move { bridge.send(CanvasAction::CreateRectangle, json!({})).await }
        });
        let envelope = sent_envelope(&peer_rx.recv().await.unwrap());

        let result = task.await.unwrap();
        assert!(matches!(result, Err(BridgeError::Timeout { .. })));
        assert_eq!(bridge.core.pending_len(), 0);

        // The identifier is retired; a late reply is a no-op.
        bridge
            .core
            .handle_incoming(&reply_frame(&envelope.id, json!("too late")));
        assert_eq!(bridge.core.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_fails_all_pending_exactly_once() {
        let bridge = test_bridge(Duration::from_secs(30));
        let (generation, mut peer_rx) = attach_fake_peer(&bridge);

        let mut tasks = Vec::new();
        for _ in 0..3 {
            tasks.push(tokio::spawn({
                let bridge = Arc::clone(&bridge);
                async move { bridge.send(CanvasAction::UpdateNode, json!({})).await }
            }));
        }
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(sent_envelope(&peer_rx.recv().await.unwrap()).id);
        }

        assert!(bridge.core.detach_peer(generation));
        assert!(!bridge.is_connected());
        for task in tasks {
            assert!(matches!(
                task.await.unwrap(),
                Err(BridgeError::Disconnected)
            ));
        }

        // Second teardown for the same generation is a no-op, as is a reply
        // for a request settled by the disconnect.
        assert!(!bridge.core.detach_peer(generation));
        for id in &ids {
            bridge.core.handle_incoming(&reply_frame(id, json!("ghost")));
        }
        assert_eq!(bridge.core.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_new_peer_replaces_old_and_fails_its_requests() {
        let bridge = test_bridge(Duration::from_secs(30));
        let (old_generation, mut old_rx) = attach_fake_peer(&bridge);

        let task = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move { bridge.send(CanvasAction::CreateFrame, json!({})).await }
        });
        let _ = sent_envelope(&old_rx.recv().await.unwrap());

        // Plugin reloads: new connection displaces the old one.
        let (_, mut new_rx) = attach_fake_peer(&bridge);
        assert!(matches!(
            task.await.unwrap(),
            Err(BridgeError::Disconnected)
        ));
        assert!(bridge.is_connected());

        // The displaced reader's teardown must not touch the new connection.
        assert!(!bridge.core.detach_peer(old_generation));
        assert!(bridge.is_connected());

        // The new connection serves requests normally.
        let task = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move { bridge.send(CanvasAction::DeleteNode, json!({})).await }
        });
        let envelope = sent_envelope(&new_rx.recv().await.unwrap());
        bridge
            .core
            .handle_incoming(&reply_frame(&envelope.id, json!(null)));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_send_after_writer_gone_is_disconnected() {
        let bridge = test_bridge(Duration::from_secs(30));
        let (_, peer_rx) = attach_fake_peer(&bridge);
        drop(peer_rx);

        let result = bridge.send(CanvasAction::DeleteNode, json!({})).await;
        assert!(matches!(result, Err(BridgeError::Disconnected)));
        assert_eq!(bridge.core.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_request_ids_are_unique() {
        let bridge = test_bridge(Duration::from_secs(30));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(bridge.core.next_request_id()));
        }
    }

    #[tokio::test]
    async fn test_start_binds_and_stop_completes() {
        let bridge = test_bridge(Duration::from_secs(30));
        let port = bridge.start().await.unwrap();
        assert_ne!(port, 0);
        assert!(!bridge.is_connected());

        // Double start is rejected while the listener runs.
        assert!(bridge.start().await.is_err());

        bridge.stop().await;
    }
}
