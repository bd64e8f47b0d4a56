use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Value of a tag-encoded tool parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    /// Child elements, e.g. the `<item>` entries of an `<args>` parameter
    Nested(Parameters),
}

impl ParamValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(text) => Some(text),
            ParamValue::Nested(_) => None,
        }
    }

    pub fn as_nested(&self) -> Option<&Parameters> {
        match self {
            ParamValue::Text(_) => None,
            ParamValue::Nested(children) => Some(children),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            ParamValue::Text(text) => Value::String(text.clone()),
            ParamValue::Nested(children) => children.to_json(),
        }
    }
}

/// Ordered tool parameters.
///
/// Entries keep first-seen order. A name that appears several times (array-like
/// parameters) is stored as repeated entries rather than overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters {
    entries: Vec<(String, ParamValue)>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: ParamValue) {
        self.entries.push((name.into(), value));
    }

    /// Builder-style helper for text parameters
    pub fn with_text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, ParamValue::Text(value.into()));
        self
    }

    /// First value stored under `name`
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// First value stored under `name`, if it is text
    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_text)
    }

    /// Every value stored under `name`, in order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ParamValue> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// All entries in order, including repeated names
    pub fn iter(&self) -> impl Iterator<Item = &(String, ParamValue)> {
        self.entries.iter()
    }

    /// Distinct parameter names in first-seen order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (key, _) in &self.entries {
            if !names.contains(&key.as_str()) {
                names.push(key);
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flatten into a JSON object. Repeated names become arrays.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        for name in self.names() {
            let values: Vec<Value> = self.get_all(name).map(ParamValue::to_json).collect();
            let value = match <[Value; 1]>::try_from(values) {
                Ok([single]) => single,
                Err(values) => Value::Array(values),
            };
            object.insert(name.to_string(), value);
        }
        Value::Object(object)
    }
}

/// Free text emitted by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlock {
    pub content: String,
    pub partial: bool,
}

/// Tool invocation written in the tag encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagToolInvocation {
    pub name: String,
    pub parameters: Parameters,
    pub partial: bool,
}

impl TagToolInvocation {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.parameters.get_text(name)
    }

    /// Text value of a required parameter
    pub fn require_param(&self, name: &str) -> Result<&str, ToolError> {
        match self.param(name) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ToolError::ParseError(format!(
                "Missing value for required parameter '{name}'"
            ))),
        }
    }
}

/// Tool invocation delivered through the structured start/delta/stop events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredToolInvocation {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    /// Arguments were parsed from the complete argument text
    pub completed: bool,
    pub partial: bool,
}

/// One unit of presented assistant output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    TagTool(TagToolInvocation),
    Structured(StructuredToolInvocation),
}

impl ContentBlock {
    pub fn is_partial(&self) -> bool {
        match self {
            ContentBlock::Text(block) => block.partial,
            ContentBlock::TagTool(block) => block.partial,
            ContentBlock::Structured(block) => block.partial,
        }
    }

    pub fn set_partial(&mut self, partial: bool) {
        match self {
            ContentBlock::Text(block) => block.partial = partial,
            ContentBlock::TagTool(block) => block.partial = partial,
            ContentBlock::Structured(block) => block.partial = partial,
        }
    }

    pub fn new_text(content: impl Into<String>, partial: bool) -> Self {
        ContentBlock::Text(TextBlock {
            content: content.into(),
            partial,
        })
    }
}

/// Identifies the block a tool outcome answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationRef {
    /// Provider-issued call id of a structured invocation
    CallId(String),
    /// Tag-encoded invocation, addressed by its position in the turn
    Tag { name: String, block_index: usize },
}

/// Result of presenting one tool-invocation block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub reference: InvocationRef,
    pub result_text: String,
    pub is_error: bool,
}

/// Provider-facing tool response in the structured encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredToolResult {
    pub tool_use_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Entry of the outbound transcript sent back to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEntry {
    Text { text: String },
    ToolResult(StructuredToolResult),
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Failed to parse tool parameters: {0}")]
    ParseError(String),
}
