use std::collections::HashMap;

use super::spec::ToolKind;
use super::tool::ToolHandler;

/// Handlers for the tools a host supports
#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<ToolKind, Box<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any previous one for the same tool
    pub fn register(&mut self, kind: ToolKind, handler: Box<dyn ToolHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: ToolKind) -> Option<&dyn ToolHandler> {
        self.handlers.get(&kind).map(|handler| handler.as_ref())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
