use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Action vocabulary ───────────────────────────────────────────

/// The fixed set of actions the host-side plugin understands. Serialized in
/// the host's SCREAMING_SNAKE_CASE vocabulary on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanvasAction {
    CreateFrame,
    CreateText,
    CreateRectangle,
    CreateImage,
    UpdateNode,
    DeleteNode,
    ConvertToComponent,
    ReorderNode,
}

impl CanvasAction {
    /// Wire name of the action, as the plugin sees it.
    pub fn name(self) -> &'static str {
        match self {
            Self::CreateFrame => "CREATE_FRAME",
            Self::CreateText => "CREATE_TEXT",
            Self::CreateRectangle => "CREATE_RECTANGLE",
            Self::CreateImage => "CREATE_IMAGE",
            Self::UpdateNode => "UPDATE_NODE",
            Self::DeleteNode => "DELETE_NODE",
            Self::ConvertToComponent => "CONVERT_TO_COMPONENT",
            Self::ReorderNode => "REORDER_NODE",
        }
    }
}

// ── Wire envelopes ──────────────────────────────────────────────

/// One outbound command frame. Immutable once sent; the payload is opaque to
/// the correlation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub id: String,
    pub action: CanvasAction,
    pub payload: Value,
    /// Creation time, unix milliseconds.
    pub timestamp: u64,
}

impl CommandEnvelope {
    /// Serialize to a single-line JSON text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One inbound reply frame. Only the plugin produces these; the bridge
/// parses them and never constructs one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Parse a text frame received from the plugin.
    pub fn from_frame(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
