use crate::types::StructuredToolInvocation;
use serde_json::Value;
use std::borrow::Cow;
use thiserror::Error;

/// Reasons a tool call is refused before any side effect
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Tool call is missing the '{0}' field")]
    MissingField(&'static str),
    #[error("Tool call field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("Tool call id must be a non-empty string")]
    InvalidCallId,
    #[error("Tool arguments must be a JSON object that survives serialization")]
    InvalidArguments,
    #[error("Tool \"{tool}\" is not allowed in {mode} mode.")]
    ToolNotAllowed { tool: String, mode: String },
    #[error("Unknown mode '{0}'")]
    UnknownMode(String),
    #[error("This mode ({mode}) can only edit files matching pattern: {pattern}{}. Got: {path}", restriction_note(.description))]
    FileRestriction {
        mode: String,
        pattern: String,
        description: Option<String>,
        path: String,
    },
}

fn restriction_note(description: &Option<String>) -> String {
    match description {
        Some(description) => format!(" ({description})"),
        None => String::new(),
    }
}

pub fn is_valid_call_id(call_id: &str) -> bool {
    !call_id.trim().is_empty()
}

/// Check the wire shape of an untyped tool call record:
/// `{ "id": str, "name": str, "input": object, "partial": bool }`.
/// `parameters` is accepted as an alias of `input`.
pub fn validate_tool_call_shape(call: &Value) -> Result<(), ValidationError> {
    let object = call.as_object().ok_or(ValidationError::WrongType {
        field: "call",
        expected: "an object",
    })?;

    match object.get("id") {
        None => return Err(ValidationError::MissingField("id")),
        Some(Value::String(id)) if is_valid_call_id(id) => {}
        Some(Value::String(_)) => return Err(ValidationError::InvalidCallId),
        Some(_) => {
            return Err(ValidationError::WrongType {
                field: "id",
                expected: "a string",
            })
        }
    }

    match object.get("name") {
        None => return Err(ValidationError::MissingField("name")),
        Some(Value::String(_)) => {}
        Some(_) => {
            return Err(ValidationError::WrongType {
                field: "name",
                expected: "a string",
            })
        }
    }

    match object.get("input").or_else(|| object.get("parameters")) {
        None => return Err(ValidationError::MissingField("input")),
        Some(Value::Object(_)) => {}
        Some(_) => {
            return Err(ValidationError::WrongType {
                field: "input",
                expected: "an object",
            })
        }
    }

    match object.get("partial") {
        None => Err(ValidationError::MissingField("partial")),
        Some(Value::Bool(_)) => Ok(()),
        Some(_) => Err(ValidationError::WrongType {
            field: "partial",
            expected: "a boolean",
        }),
    }
}

/// Arguments must be an object that serializes and parses back unchanged
pub fn validate_arguments(arguments: &Value) -> Result<(), ValidationError> {
    if !arguments.is_object() {
        return Err(ValidationError::InvalidArguments);
    }
    let text = serde_json::to_string(arguments).map_err(|_| ValidationError::InvalidArguments)?;
    let parsed: Value = serde_json::from_str(&text).map_err(|_| ValidationError::InvalidArguments)?;
    if &parsed == arguments {
        Ok(())
    } else {
        Err(ValidationError::InvalidArguments)
    }
}

/// Checks that apply to a completed structured call
pub fn validate_structured_call(call: &StructuredToolInvocation) -> Result<(), ValidationError> {
    if !is_valid_call_id(&call.call_id) {
        return Err(ValidationError::InvalidCallId);
    }
    validate_arguments(&call.arguments)
}

/// Replace characters outside `[A-Za-z0-9_-]` with `_`
pub fn sanitize_tool_name(name: &str) -> Cow<'_, str> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    if name.chars().all(allowed) {
        return Cow::Borrowed(name);
    }
    Cow::Owned(
        name.chars()
            .map(|c| if allowed(c) { c } else { '_' })
            .collect(),
    )
}
