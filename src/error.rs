use thiserror::Error;

/// Structured error type for the bridge. Every variant carries a
/// human-readable message suitable for reporting back through the outer
/// tool layer; nothing here should surface as a raw panic or stack trace.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// No live plugin connection. Reported before any frame is built or sent.
    #[error("design host plugin is not connected; open the bridge plugin in the design host")]
    NotConnected,

    /// No reply arrived within the deadline. The request is retired; a reply
    /// arriving later is discarded.
    #[error("request {id} timed out after {timeout_ms}ms")]
    Timeout { id: String, timeout_ms: u64 },

    /// The connection dropped while the request was still pending.
    #[error("connection to the design host was lost")]
    Disconnected,

    /// The plugin replied with `success: false`. The remote reason is passed
    /// through verbatim.
    #[error("operation failed: {message}")]
    Rejected { message: String },

    /// Listener or socket failure outside the request/reply cycle.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// A frame could not be serialized.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Image ingestion failed and the caller's policy forbids a placeholder.
    #[error("image ingestion failed: {message}")]
    ImageIngestion { message: String },
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Protocol {
            message: e.to_string(),
        }
    }
}
