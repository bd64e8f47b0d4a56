use crate::tools::validation::is_valid_call_id;
use crate::types::StructuredToolInvocation;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

/// How many earlier cut points a speculative parse tries before giving up
const MAX_REPAIR_ATTEMPTS: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccumulatorError {
    #[error("Tool call id must be a non-empty string")]
    InvalidCallId,
    #[error("Initial arguments of tool call '{0}' must be a JSON object")]
    ArgumentsNotObject(String),
    #[error("Tool call id '{0}' was already used in this turn")]
    DuplicateCallId(String),
}

#[derive(Debug, Clone)]
struct PendingCall {
    name: String,
    raw_arguments: String,
    arguments: Option<Value>,
}

impl PendingCall {
    fn is_completed(&self) -> bool {
        self.arguments.is_some()
    }
}

/// Assembles structured tool calls from start/delta/stop stream events.
///
/// Calls are kept in start order. Argument text is only authoritative once a
/// call completes; [`ToolCallAccumulator::snapshot`] offers a best-effort
/// view before that.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: IndexMap<String, PendingCall>,
    seen_ids: HashSet<String>,
    // Target of deltas that arrive without an id
    current: Option<String>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new call. An empty initial object contributes no text.
    pub fn start(&mut self, call_id: &str, name: &str, initial: &Value) -> Result<(), AccumulatorError> {
        if !is_valid_call_id(call_id) {
            warn!("Ignoring tool call start without id (tool: {})", name);
            return Err(AccumulatorError::InvalidCallId);
        }
        let Some(object) = initial.as_object() else {
            warn!("Ignoring tool call {} with non-object arguments", call_id);
            return Err(AccumulatorError::ArgumentsNotObject(call_id.to_string()));
        };
        if !self.seen_ids.insert(call_id.to_string()) {
            warn!("Ignoring duplicate tool call start for {}", call_id);
            return Err(AccumulatorError::DuplicateCallId(call_id.to_string()));
        }

        let raw_arguments = if object.is_empty() {
            String::new()
        } else {
            initial.to_string()
        };
        debug!("Tool call {} ({}) started", call_id, name);
        self.calls.insert(
            call_id.to_string(),
            PendingCall {
                name: name.to_string(),
                raw_arguments,
                arguments: None,
            },
        );
        self.current = Some(call_id.to_string());
        Ok(())
    }

    /// Append argument text. An empty id targets the most recently started call.
    pub fn delta(&mut self, call_id: &str, fragment: &str) -> bool {
        let id = if call_id.is_empty() {
            match &self.current {
                Some(current) => current.clone(),
                None => {
                    warn!("Dropping argument delta: no tool call in progress");
                    return false;
                }
            }
        } else {
            call_id.to_string()
        };

        match self.calls.get_mut(&id) {
            Some(call) if call.is_completed() => {
                warn!("Dropping argument delta for completed tool call {}", id);
                false
            }
            Some(call) => {
                call.raw_arguments.push_str(fragment);
                true
            }
            None => {
                warn!("Dropping argument delta for unknown tool call {}", id);
                false
            }
        }
    }

    /// Parse the full argument text. Returns `None` while it is not a JSON object.
    pub fn complete(&mut self, call_id: &str) -> Option<StructuredToolInvocation> {
        let call = self.calls.get_mut(call_id)?;
        if call.arguments.is_none() {
            let raw = if call.raw_arguments.trim().is_empty() {
                "{}"
            } else {
                call.raw_arguments.as_str()
            };
            match serde_json::from_str::<Value>(raw) {
                Ok(value) if value.is_object() => call.arguments = Some(value),
                Ok(_) => {
                    debug!("Arguments of tool call {} are not an object", call_id);
                    return None;
                }
                Err(e) => {
                    debug!("Arguments of tool call {} do not parse yet: {}", call_id, e);
                    return None;
                }
            }
            if self.current.as_deref() == Some(call_id) {
                self.current = None;
            }
        }
        self.snapshot(call_id)
    }

    /// Current view of a call, speculative while it is still streaming
    pub fn snapshot(&self, call_id: &str) -> Option<StructuredToolInvocation> {
        let call = self.calls.get(call_id)?;
        Some(to_invocation(call_id, call))
    }

    pub fn is_completed(&self, call_id: &str) -> bool {
        self.calls.get(call_id).is_some_and(PendingCall::is_completed)
    }

    /// Ids of calls that have not completed, in start order
    pub fn pending_ids(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter(|(_, call)| !call.is_completed())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove and return all completed calls in start order
    pub fn drain(&mut self) -> Vec<StructuredToolInvocation> {
        let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.calls)
            .into_iter()
            .partition(|(_, call)| call.is_completed());
        self.calls = pending.into_iter().collect();
        done.iter()
            .map(|(id, call)| to_invocation(id, call))
            .collect()
    }
}

fn to_invocation(call_id: &str, call: &PendingCall) -> StructuredToolInvocation {
    match &call.arguments {
        Some(arguments) => StructuredToolInvocation {
            call_id: call_id.to_string(),
            name: call.name.clone(),
            arguments: arguments.clone(),
            completed: true,
            partial: false,
        },
        None => StructuredToolInvocation {
            call_id: call_id.to_string(),
            name: call.name.clone(),
            arguments: speculative_parse(&call.raw_arguments)
                .filter(Value::is_object)
                .unwrap_or_else(|| Value::Object(Map::new())),
            completed: false,
            partial: true,
        },
    }
}

/// Best-effort parse of incomplete JSON text.
///
/// Open strings and containers are closed. When the tail cannot be repaired,
/// the text is cut back to the last complete member. Never fails, never
/// mutates anything; `None` means nothing usable was found.
pub fn speculative_parse(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let mut closers: Vec<char> = Vec::new();
    let mut cuts: Vec<(usize, Vec<char>)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in trimmed.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => {
                closers.push('}');
                cuts.push((i + 1, closers.clone()));
            }
            '[' => {
                closers.push(']');
                cuts.push((i + 1, closers.clone()));
            }
            '}' | ']' => {
                closers.pop();
            }
            ',' => cuts.push((i, closers.clone())),
            _ => {}
        }
    }

    let mut tail = trimmed.to_string();
    if in_string {
        if escaped {
            tail.pop();
        }
        tail.push('"');
    }
    if let Some(value) = close_fragment(&tail, &closers) {
        return Some(value);
    }

    cuts.iter()
        .rev()
        .take(MAX_REPAIR_ATTEMPTS)
        .find_map(|(cut, closers)| close_fragment(&trimmed[..*cut], closers))
}

fn close_fragment(prefix: &str, closers: &[char]) -> Option<Value> {
    let mut candidate = prefix.trim_end().trim_end_matches(',').to_string();
    if candidate.ends_with(':') {
        candidate.push_str("null");
    }
    candidate.extend(closers.iter().rev());
    serde_json::from_str(&candidate).ok()
}
