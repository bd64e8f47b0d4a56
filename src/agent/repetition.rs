use crate::types::TagToolInvocation;
use serde_json::json;

/// Refuses a tool call repeated with identical parameters too many times
#[derive(Debug, Default)]
pub struct RepetitionGuard {
    limit: u32,
    previous: Option<String>,
    count: u32,
}

impl RepetitionGuard {
    /// `limit` identical consecutive calls are allowed; 0 disables the guard
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            previous: None,
            count: 0,
        }
    }

    /// Register a complete invocation. Returns `false` when it must not run.
    pub fn allow(&mut self, invocation: &TagToolInvocation) -> bool {
        if self.limit == 0 {
            return true;
        }

        let key = json!({
            "name": invocation.name,
            "parameters": invocation.parameters.to_json(),
        })
        .to_string();

        if self.previous.as_deref() == Some(key.as_str()) {
            self.count += 1;
        } else {
            self.previous = Some(key);
            self.count = 1;
        }

        if self.count > self.limit {
            // Start over so the model can try again after changing course
            self.previous = None;
            self.count = 0;
            return false;
        }
        true
    }
}
