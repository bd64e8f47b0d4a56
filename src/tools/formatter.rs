//! Conversion between structured tool calls and the tag encoding

use crate::tools::parse::parse_assistant_message;
use crate::tools::validation::is_valid_call_id;
use crate::types::{
    ContentBlock, InvocationRef, StructuredToolInvocation, StructuredToolResult,
    TagToolInvocation, ToolOutcome, TranscriptEntry,
};
use serde_json::{Map, Value};
use thiserror::Error;

/// Argument holding a list of objects, rendered as `<item>` children
const LIST_PARAM: &str = "args";
const LIST_ITEM_TAG: &str = "item";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Arguments of tool '{0}' must be a JSON object")]
    NotAnObject(String),
    #[error("Argument name '{0}' cannot be used as a tag")]
    InvalidKey(String),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

/// Render a structured call in the tag encoding:
///
/// ```text
/// <read_file>
/// <path>
/// a.py
/// </path>
/// </read_file>
/// ```
pub fn to_invocation_text(call: &StructuredToolInvocation) -> Result<String, BridgeError> {
    let Value::Object(arguments) = &call.arguments else {
        return Err(BridgeError::NotAnObject(call.name.clone()));
    };

    let mut text = format!("<{}>\n", call.name);
    for (key, value) in arguments {
        if key == LIST_PARAM && is_object_list(value) {
            render_object_list(&mut text, key, value)?;
        } else {
            render_field(&mut text, key, value)?;
        }
    }
    text.push_str(&format!("</{}>", call.name));
    Ok(text)
}

fn is_object_list(value: &Value) -> bool {
    matches!(value, Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object))
}

fn render_object_list(text: &mut String, key: &str, value: &Value) -> Result<(), BridgeError> {
    text.push_str(&format!("<{key}>\n"));
    if let Value::Array(items) = value {
        for item in items.iter().filter_map(Value::as_object) {
            text.push_str(&format!("<{LIST_ITEM_TAG}>\n"));
            render_fields(text, item)?;
            text.push_str(&format!("</{LIST_ITEM_TAG}>\n"));
        }
    }
    text.push_str(&format!("</{key}>\n"));
    Ok(())
}

fn render_fields(text: &mut String, fields: &Map<String, Value>) -> Result<(), BridgeError> {
    for (key, value) in fields {
        render_field(text, key, value)?;
    }
    Ok(())
}

fn render_field(text: &mut String, key: &str, value: &Value) -> Result<(), BridgeError> {
    if !is_tag_name(key) {
        return Err(BridgeError::InvalidKey(key.to_string()));
    }
    match value {
        Value::Null => {}
        Value::Array(items) => {
            let mut rendered = 0;
            for item in items.iter().filter(|item| !item.is_null()) {
                push_element(text, key, item);
                rendered += 1;
            }
            // An empty list still names its key
            if rendered == 0 {
                push_element(text, key, &Value::String(String::new()));
            }
        }
        scalar => push_element(text, key, scalar),
    }
    Ok(())
}

fn push_element(text: &mut String, key: &str, value: &Value) {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.push_str(&format!("<{key}>\n{rendered}\n</{key}>\n"));
}

fn is_tag_name(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Convert a structured call into the tag invocation handlers consume
pub fn bridge_to_tag(
    call: &StructuredToolInvocation,
    tool_names: &[&str],
) -> Result<TagToolInvocation, BridgeError> {
    if !tool_names.contains(&call.name.as_str()) {
        return Err(BridgeError::UnknownTool(call.name.clone()));
    }
    let text = to_invocation_text(call)?;
    parse_assistant_message(&text, tool_names)
        .into_iter()
        .find_map(|block| match block {
            ContentBlock::TagTool(mut invocation) => {
                invocation.partial = call.partial;
                Some(invocation)
            }
            _ => None,
        })
        .ok_or_else(|| BridgeError::UnknownTool(call.name.clone()))
}

/// Wrap a tool result for the structured encoding. Never fails: a result
/// that cannot be attached is turned into an error result.
pub fn to_response(call_id: &str, text: Option<&str>, is_error: bool) -> StructuredToolResult {
    if !is_valid_call_id(call_id) {
        return StructuredToolResult {
            tool_use_id: call_id.to_string(),
            content: "Tool result could not be attached: the tool call has no id".to_string(),
            is_error: true,
        };
    }
    StructuredToolResult {
        tool_use_id: call_id.to_string(),
        content: text.unwrap_or_default().to_string(),
        is_error,
    }
}

/// Transcript entry for an outcome. Tag invocations are answered in text,
/// labelled with the tool description.
pub fn outcome_to_entry(outcome: &ToolOutcome, label: &str) -> TranscriptEntry {
    match &outcome.reference {
        InvocationRef::CallId(call_id) => TranscriptEntry::ToolResult(to_response(
            call_id,
            Some(&outcome.result_text),
            outcome.is_error,
        )),
        InvocationRef::Tag { .. } => TranscriptEntry::Text {
            text: format!("{label} Result:\n{}", outcome.result_text),
        },
    }
}
