pub mod catalog;
pub mod handlers;
pub mod params;

use serde::{Deserialize, Serialize};

use params::{
    ConvertToComponentParams, CreateFrameParams, CreateImageParams, CreateRectangleParams,
    CreateTextParams, DeleteNodeParams, ReorderNodeParams, UpdateNodeParams,
};

use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::protocol::CanvasAction;

// ── Command metadata ────────────────────────────────────────────

pub struct CommandInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub action: CanvasAction,
}

// ── Command / result types ──────────────────────────────────────

/// Unified command type for the dispatch surface. The outer tool layer
/// (which owns schema validation) decodes into this; every variant maps to
/// exactly one wire action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "snake_case")]
pub enum Command {
    CreateFrame(CreateFrameParams),
    CreateText(CreateTextParams),
    CreateRectangle(CreateRectangleParams),
    CreateImage(CreateImageParams),
    UpdateNode(UpdateNodeParams),
    DeleteNode(DeleteNodeParams),
    ConvertToComponent(ConvertToComponentParams),
    ReorderNode(ReorderNodeParams),
}

/// Typed result for every command, tagged so the outer layer can narrow by
/// command name.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "command", content = "data", rename_all = "snake_case")]
pub enum CommandResult {
    CreateFrame(String),
    CreateText(String),
    CreateRectangle(String),
    CreateImage(ImageOutcome),
    UpdateNode,
    DeleteNode,
    ConvertToComponent(String),
    ReorderNode,
}

/// Outcome of the image-creation path, which may have substituted a
/// placeholder for the requested image.
#[derive(Debug, Clone, Serialize)]
pub struct ImageOutcome {
    pub node_id: String,
    pub placeholder: bool,
    /// Original ingestion failure when a placeholder was used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Result of executing a command: `message` serves the tool layer's textual
/// reporting convention, `result` carries the typed data.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    pub message: String,
    pub result: CommandResult,
}

impl CommandOutput {
    pub fn new(message: impl Into<String>, result: CommandResult) -> Self {
        Self {
            message: message.into(),
            result,
        }
    }
}

// ── Command impl ────────────────────────────────────────────────

impl Command {
    pub fn info(&self) -> CommandInfo {
        match self {
            Command::CreateFrame(_) => catalog::INFO_CREATE_FRAME,
            Command::CreateText(_) => catalog::INFO_CREATE_TEXT,
            Command::CreateRectangle(_) => catalog::INFO_CREATE_RECTANGLE,
            Command::CreateImage(_) => catalog::INFO_CREATE_IMAGE,
            Command::UpdateNode(_) => catalog::INFO_UPDATE_NODE,
            Command::DeleteNode(_) => catalog::INFO_DELETE_NODE,
            Command::ConvertToComponent(_) => catalog::INFO_CONVERT_TO_COMPONENT,
            Command::ReorderNode(_) => catalog::INFO_REORDER_NODE,
        }
    }

    /// Decode an (action name, JSON params) pair arriving from the outer
    /// tool layer.
    pub fn from_tool_call(name: &str, input: &serde_json::Value) -> Result<Command, String> {
        match name {
            "create_frame" => Ok(Command::CreateFrame(catalog::de(input)?)),
            "create_text" => Ok(Command::CreateText(catalog::de(input)?)),
            "create_rectangle" => Ok(Command::CreateRectangle(catalog::de(input)?)),
            "create_image" => Ok(Command::CreateImage(catalog::de(input)?)),
            "update_node" => Ok(Command::UpdateNode(catalog::de(input)?)),
            "delete_node" => Ok(Command::DeleteNode(catalog::de(input)?)),
            "convert_to_component" => Ok(Command::ConvertToComponent(catalog::de(input)?)),
            "reorder_node" => Ok(Command::ReorderNode(catalog::de(input)?)),
            _ => Err(format!("Unknown command: {name}")),
        }
    }

    /// Execute the command through the bridge and translate the settlement
    /// into a `CommandOutput` or a structured error.
    pub async fn dispatch(self, bridge: &Bridge) -> Result<CommandOutput, BridgeError> {
        match self {
            Command::CreateFrame(p) => handlers::create_frame(bridge, p).await,
            Command::CreateText(p) => handlers::create_text(bridge, p).await,
            Command::CreateRectangle(p) => handlers::create_rectangle(bridge, p).await,
            Command::CreateImage(p) => handlers::create_image(bridge, p).await,
            Command::UpdateNode(p) => handlers::update_node(bridge, p).await,
            Command::DeleteNode(p) => handlers::delete_node(bridge, p).await,
            Command::ConvertToComponent(p) => handlers::convert_to_component(bridge, p).await,
            Command::ReorderNode(p) => handlers::reorder_node(bridge, p).await,
        }
    }
}
