pub mod console;

use crate::tools::core::ApprovalKind;
use async_trait::async_trait;
use thiserror::Error;

/// Messages the engine shows without waiting for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SayMessage {
    /// Assistant text. `partial` marks a preview that later updates replace.
    Text { text: String, partial: bool },
    /// Feedback the user attached to an approval
    UserFeedback(String),
    Error(String),
}

/// A question that blocks until the user answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskRequest {
    pub kind: ApprovalKind,
    pub tool: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskResponse {
    Approved { feedback: Option<String> },
    Denied { feedback: Option<String> },
}

#[derive(Error, Debug)]
pub enum UIError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Input not supported: {0}")]
    InputNotSupported(String),
}

/// Host surface the engine talks to while presenting a turn
#[async_trait]
pub trait UserInterface: Send + Sync {
    /// Display a message to the user
    async fn say(&self, message: SayMessage) -> Result<(), UIError>;

    /// Ask the user to approve an action
    async fn ask(&self, request: AskRequest) -> Result<AskResponse, UIError>;

    /// Close the browser session if one is open
    async fn close_browser_session(&self) -> Result<(), UIError> {
        Ok(())
    }
}
