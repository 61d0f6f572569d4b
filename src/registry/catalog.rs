use schemars::schema_for;
use serde::Serialize;
use serde_json::Value;

use super::params::{
    ConvertToComponentParams, CreateFrameParams, CreateImageParams, CreateRectangleParams,
    CreateTextParams, DeleteNodeParams, ReorderNodeParams, UpdateNodeParams,
};
use super::CommandInfo;
use crate::protocol::CanvasAction;

// ── Command metadata constants ──────────────────────────────────

pub(super) const INFO_CREATE_FRAME: CommandInfo = CommandInfo {
    name: "create_frame",
    description: "Create a frame with optional auto-layout, fills, strokes, and corner radii.",
    action: CanvasAction::CreateFrame,
};
pub(super) const INFO_CREATE_TEXT: CommandInfo = CommandInfo {
    name: "create_text",
    description: "Create a text element with typography and alignment settings.",
    action: CanvasAction::CreateText,
};
pub(super) const INFO_CREATE_RECTANGLE: CommandInfo = CommandInfo {
    name: "create_rectangle",
    description: "Create a rectangle with fills, strokes, and corner radius.",
    action: CanvasAction::CreateRectangle,
};
pub(super) const INFO_CREATE_IMAGE: CommandInfo = CommandInfo {
    name: "create_image",
    description: "Create an image from a URL or data URI; falls back to a placeholder rectangle when the image cannot be loaded.",
    action: CanvasAction::CreateImage,
};
pub(super) const INFO_UPDATE_NODE: CommandInfo = CommandInfo {
    name: "update_node",
    description: "Update properties of an existing node: position, size, fills, opacity, blend mode, visibility, lock, auto-layout.",
    action: CanvasAction::UpdateNode,
};
pub(super) const INFO_DELETE_NODE: CommandInfo = CommandInfo {
    name: "delete_node",
    description: "Delete a node by its ID.",
    action: CanvasAction::DeleteNode,
};
pub(super) const INFO_CONVERT_TO_COMPONENT: CommandInfo = CommandInfo {
    name: "convert_to_component",
    description: "Convert an existing frame into a reusable component.",
    action: CanvasAction::ConvertToComponent,
};
pub(super) const INFO_REORDER_NODE: CommandInfo = CommandInfo {
    name: "reorder_node",
    description: "Reorder a node within its parent. Index 0 is the bottom of the stack; higher indices render in front.",
    action: CanvasAction::ReorderNode,
};

// ── Catalog ─────────────────────────────────────────────────────

/// A catalog entry: metadata plus the JSON schema for the command's params.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub action: CanvasAction,
    pub param_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

fn schema_value<T: schemars::JsonSchema>() -> Value {
    let root = schema_for!(T);
    serde_json::to_value(root).unwrap_or_else(|_| empty_object_schema())
}

fn entry(info: CommandInfo, param_schema: Value) -> CatalogEntry {
    CatalogEntry {
        name: info.name,
        description: info.description,
        action: info.action,
        param_schema,
    }
}

/// The complete command catalog, auto-generated from param struct schemas.
pub fn command_catalog() -> Vec<CatalogEntry> {
    vec![
        entry(INFO_CREATE_FRAME, schema_value::<CreateFrameParams>()),
        entry(INFO_CREATE_TEXT, schema_value::<CreateTextParams>()),
        entry(INFO_CREATE_RECTANGLE, schema_value::<CreateRectangleParams>()),
        entry(INFO_CREATE_IMAGE, schema_value::<CreateImageParams>()),
        entry(INFO_UPDATE_NODE, schema_value::<UpdateNodeParams>()),
        entry(INFO_DELETE_NODE, schema_value::<DeleteNodeParams>()),
        entry(
            INFO_CONVERT_TO_COMPONENT,
            schema_value::<ConvertToComponentParams>(),
        ),
        entry(INFO_REORDER_NODE, schema_value::<ReorderNodeParams>()),
    ]
}

/// JSON-formatted catalog for the outer tool layer's listing machinery.
pub fn to_json_schema() -> Value {
    Value::Array(
        command_catalog()
            .iter()
            .map(|e| {
                serde_json::json!({
                    "name": e.name,
                    "description": e.description,
                    "inputSchema": e.param_schema,
                })
            })
            .collect(),
    )
}

pub(super) fn de<T: serde::de::DeserializeOwned>(input: &Value) -> Result<T, String> {
    serde_json::from_value(input.clone()).map_err(|e| e.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_covers_every_action() {
        let catalog = command_catalog();
        assert_eq!(catalog.len(), 8);
        let names: Vec<&str> = catalog.iter().map(|e| e.name).collect();
        assert!(names.contains(&"create_image"));
        assert!(names.contains(&"reorder_node"));
        for entry in &catalog {
            assert!(entry.param_schema.is_object(), "{} has no schema", entry.name);
        }
    }

    #[test]
    fn test_json_schema_listing_shape() {
        let listing = to_json_schema();
        let entries = listing.as_array().unwrap();
        assert_eq!(entries.len(), 8);
        assert!(entries[0].get("inputSchema").is_some());
    }
}
