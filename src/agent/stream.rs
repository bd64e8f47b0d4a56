use crate::tools::accumulator::ToolCallAccumulator;
use crate::tools::core::ToolKind;
use crate::tools::parse::parse_assistant_message;
use crate::types::{ContentBlock, StructuredToolInvocation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

fn empty_arguments() -> Value {
    Value::Object(Map::new())
}

/// One event of an assistant response stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Text delta, possibly containing tag-encoded tool calls
    Text { text: String },
    ToolCallStart {
        id: String,
        name: String,
        #[serde(default = "empty_arguments")]
        arguments: Value,
    },
    /// Argument fragment; an empty id targets the call started last
    ToolCallDelta {
        #[serde(default)]
        id: String,
        fragment: String,
    },
    ToolCallStop { id: String },
}

#[derive(Debug)]
enum Segment {
    /// Cumulative raw text between structured calls
    Text(String),
    /// Structured call still owned by the accumulator
    Call(String),
    Finished(StructuredToolInvocation),
}

/// Turns stream events into the ordered block list of a turn.
///
/// The block list is re-derived from scratch on every change: text segments
/// are re-parsed, structured calls are snapshotted. Blocks of every segment
/// but the last are complete.
#[derive(Debug)]
pub struct MessageAssembler {
    segments: Vec<Segment>,
    accumulator: ToolCallAccumulator,
    tool_names: Vec<&'static str>,
    finished: bool,
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
            accumulator: ToolCallAccumulator::new(),
            tool_names: ToolKind::names(),
            finished: false,
        }
    }

    /// Apply an event. Returns whether the derived blocks may have changed.
    pub fn apply(&mut self, event: &StreamEvent) -> bool {
        if self.finished {
            warn!("Ignoring stream event after the stream finished: {:?}", event);
            return false;
        }
        match event {
            StreamEvent::Text { text } => {
                if text.is_empty() {
                    return false;
                }
                match self.segments.last_mut() {
                    Some(Segment::Text(buffer)) => buffer.push_str(text),
                    _ => self.segments.push(Segment::Text(text.clone())),
                }
                true
            }
            StreamEvent::ToolCallStart {
                id,
                name,
                arguments,
            } => match self.accumulator.start(id, name, arguments) {
                Ok(()) => {
                    self.segments.push(Segment::Call(id.clone()));
                    true
                }
                Err(e) => {
                    debug!("Tool call start rejected: {}", e);
                    false
                }
            },
            StreamEvent::ToolCallDelta { id, fragment } => self.accumulator.delta(id, fragment),
            StreamEvent::ToolCallStop { id } => {
                if self.accumulator.complete(id).is_none() {
                    debug!("Tool call {} stopped before its arguments parse", id);
                    return false;
                }
                self.collect_finished();
                true
            }
        }
    }

    /// Complete every pending call. Returns the ids whose arguments never parsed.
    pub fn finish(&mut self) -> Vec<String> {
        let mut failed = Vec::new();
        for id in self.accumulator.pending_ids() {
            if self.accumulator.complete(&id).is_none() {
                warn!("Tool call {} ended with truncated or invalid arguments", id);
                failed.push(id);
            }
        }
        self.collect_finished();
        self.finished = true;
        failed
    }

    fn collect_finished(&mut self) {
        for call in self.accumulator.drain() {
            let slot = self
                .segments
                .iter_mut()
                .find(|segment| matches!(segment, Segment::Call(id) if *id == call.call_id));
            if let Some(slot) = slot {
                *slot = Segment::Finished(call);
            }
        }
    }

    /// Current block list
    pub fn blocks(&self) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        let last = self.segments.len().saturating_sub(1);

        for (i, segment) in self.segments.iter().enumerate() {
            let open = i == last && !self.finished;
            match segment {
                Segment::Text(raw) => {
                    let mut parsed = parse_assistant_message(raw, &self.tool_names);
                    if !open {
                        parsed.iter_mut().for_each(|block| block.set_partial(false));
                    }
                    blocks.extend(parsed);
                }
                Segment::Finished(call) => blocks.push(ContentBlock::Structured(call.clone())),
                Segment::Call(id) => {
                    let Some(mut call) = self.accumulator.snapshot(id) else {
                        continue;
                    };
                    if self.finished {
                        // Never completed; presented as a failed call
                        call.partial = false;
                        blocks.push(ContentBlock::Structured(call));
                        continue;
                    }
                    blocks.push(ContentBlock::Structured(call));
                    // Later segments wait until this call completes
                    break;
                }
            }
        }

        blocks
    }
}
