use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;

use super::params::{
    ConvertToComponentParams, CreateFrameParams, CreateImageParams, CreateRectangleParams,
    CreateTextParams, DeleteNodeParams, ImageCommandPayload, ReorderNodeParams, UpdateNodeParams,
};
use super::{CommandOutput, CommandResult, ImageOutcome};
use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::image;
use crate::protocol::{CanvasAction, ResponseEnvelope};

// ── Settlement translation ──────────────────────────────────────

fn to_payload<T: serde::Serialize>(params: &T) -> Result<Value, BridgeError> {
    serde_json::to_value(params).map_err(BridgeError::from)
}

/// Unwrap a reply, mapping `success: false` to `Rejected` with the plugin's
/// reason passed through verbatim.
fn into_data(response: ResponseEnvelope) -> Result<Option<Value>, BridgeError> {
    if response.success {
        Ok(response.data)
    } else {
        Err(BridgeError::Rejected {
            message: response
                .error
                .unwrap_or_else(|| "unknown plugin error".to_string()),
        })
    }
}

/// The plugin answers create operations with the new node's identifier.
fn node_id(data: Option<Value>) -> String {
    match data {
        Some(Value::String(id)) => id,
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

// ── Handlers ────────────────────────────────────────────────────

pub async fn create_frame(
    bridge: &Bridge,
    params: CreateFrameParams,
) -> Result<CommandOutput, BridgeError> {
    let name = params.name.clone();
    let response = bridge
        .send(CanvasAction::CreateFrame, to_payload(&params)?)
        .await?;
    let id = node_id(into_data(response)?);
    let message = format!("Frame \"{name}\" created. Node ID: {id}");
    Ok(CommandOutput::new(message, CommandResult::CreateFrame(id)))
}

pub async fn create_text(
    bridge: &Bridge,
    params: CreateTextParams,
) -> Result<CommandOutput, BridgeError> {
    let response = bridge
        .send(CanvasAction::CreateText, to_payload(&params)?)
        .await?;
    let id = node_id(into_data(response)?);
    let message = format!("Text created. Node ID: {id}");
    Ok(CommandOutput::new(message, CommandResult::CreateText(id)))
}

pub async fn create_rectangle(
    bridge: &Bridge,
    params: CreateRectangleParams,
) -> Result<CommandOutput, BridgeError> {
    let response = bridge
        .send(CanvasAction::CreateRectangle, to_payload(&params)?)
        .await?;
    let id = node_id(into_data(response)?);
    let message = format!("Rectangle created. Node ID: {id}");
    Ok(CommandOutput::new(
        message,
        CommandResult::CreateRectangle(id),
    ))
}

/// Image creation runs the ingestion pipeline first. Any ingestion failure
/// either becomes a placeholder rectangle (when the caller's policy allows
/// it) or surfaces as the operation's error; it never escapes as anything
/// else.
pub async fn create_image(
    bridge: &Bridge,
    params: CreateImageParams,
) -> Result<CommandOutput, BridgeError> {
    let from_data_uri = params.url.starts_with("data:");
    let resolved = image::resolve(
        &params.url,
        params.width,
        params.height,
        Duration::from_millis(params.timeout_ms),
    )
    .await;

    match resolved {
        Ok(resolved) => {
            let payload = ImageCommandPayload::new(
                &params,
                BASE64.encode(&resolved.bytes),
                resolved.mime_type,
            );
            let response = bridge
                .send(CanvasAction::CreateImage, to_payload(&payload)?)
                .await?;
            let id = node_id(into_data(response)?);
            let source = if from_data_uri { " (from data URI)" } else { "" };
            let message = format!("Image created{source}. Node ID: {id}");
            Ok(CommandOutput::new(
                message,
                CommandResult::CreateImage(ImageOutcome {
                    node_id: id,
                    placeholder: false,
                    failure: None,
                }),
            ))
        }
        Err(failure) if params.use_placeholder_on_error => {
            let substitute = image::placeholder_rectangle(&params);
            let response = bridge
                .send(CanvasAction::CreateRectangle, to_payload(&substitute)?)
                .await?;
            let id = node_id(into_data(response)?);
            let message =
                format!("Image unavailable ({failure}); created a placeholder instead. Node ID: {id}");
            Ok(CommandOutput::new(
                message,
                CommandResult::CreateImage(ImageOutcome {
                    node_id: id,
                    placeholder: true,
                    failure: Some(failure.to_string()),
                }),
            ))
        }
        Err(failure) => Err(BridgeError::ImageIngestion {
            message: failure.to_string(),
        }),
    }
}

pub async fn update_node(
    bridge: &Bridge,
    params: UpdateNodeParams,
) -> Result<CommandOutput, BridgeError> {
    let target = params.node_id.clone();
    let response = bridge
        .send(CanvasAction::UpdateNode, to_payload(&params)?)
        .await?;
    into_data(response)?;
    let message = format!("Node {target} updated.");
    Ok(CommandOutput::new(message, CommandResult::UpdateNode))
}

pub async fn delete_node(
    bridge: &Bridge,
    params: DeleteNodeParams,
) -> Result<CommandOutput, BridgeError> {
    let target = params.node_id.clone();
    let response = bridge
        .send(CanvasAction::DeleteNode, to_payload(&params)?)
        .await?;
    into_data(response)?;
    let message = format!("Node {target} deleted.");
    Ok(CommandOutput::new(message, CommandResult::DeleteNode))
}

pub async fn convert_to_component(
    bridge: &Bridge,
    params: ConvertToComponentParams,
) -> Result<CommandOutput, BridgeError> {
    let response = bridge
        .send(CanvasAction::ConvertToComponent, to_payload(&params)?)
        .await?;
    let id = node_id(into_data(response)?);
    let message = format!("Converted to component. New component ID: {id}");
    Ok(CommandOutput::new(
        message,
        CommandResult::ConvertToComponent(id),
    ))
}

pub async fn reorder_node(
    bridge: &Bridge,
    params: ReorderNodeParams,
) -> Result<CommandOutput, BridgeError> {
    let target = params.node_id.clone();
    let index = params.index;
    let response = bridge
        .send(CanvasAction::ReorderNode, to_payload(&params)?)
        .await?;
    into_data(response)?;
    let message = format!("Node {target} moved to index {index}.");
    Ok(CommandOutput::new(message, CommandResult::ReorderNode))
}
