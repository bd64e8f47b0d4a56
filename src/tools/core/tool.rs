use super::spec::ApprovalKind;
use crate::settings::AutoApproval;
use crate::tools::parse::strip_partial_closing_tag;
use crate::tools::responses;
use crate::types::TagToolInvocation;
use crate::ui::{AskRequest, AskResponse, SayMessage, UIError, UserInterface};
use anyhow::Result;
use tracing::{debug, warn};

/// What a handler left behind after one presentation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerRun {
    pub result: Option<String>,
    pub is_error: bool,
    /// The user denied an approval
    pub rejected: bool,
}

/// Callbacks handed to a tool handler for one invocation.
///
/// A handler reports exactly one result through [`ToolContext::push_result`]
/// or [`ToolContext::report_error`]. Later results are dropped.
pub struct ToolContext<'a> {
    ui: &'a dyn UserInterface,
    auto_approval: &'a AutoApproval,
    tool_name: String,
    partial: bool,
    approval_feedback: Option<String>,
    run: HandlerRun,
}

impl<'a> ToolContext<'a> {
    pub fn new(
        ui: &'a dyn UserInterface,
        auto_approval: &'a AutoApproval,
        invocation: &TagToolInvocation,
    ) -> Self {
        Self {
            ui,
            auto_approval,
            tool_name: invocation.name.clone(),
            partial: invocation.partial,
            approval_feedback: None,
            run: HandlerRun::default(),
        }
    }

    pub fn ui(&self) -> &dyn UserInterface {
        self.ui
    }

    /// Whether the invocation is still streaming
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// Ask the user to approve the action. Denials record the result.
    pub async fn approve(
        &mut self,
        kind: ApprovalKind,
        message: Option<String>,
    ) -> Result<bool, UIError> {
        if self.auto_approval.allows(kind) {
            debug!("Auto-approved {} ({:?})", self.tool_name, kind);
            return Ok(true);
        }

        let response = self
            .ui
            .ask(AskRequest {
                kind,
                tool: self.tool_name.clone(),
                message,
            })
            .await?;

        match response {
            AskResponse::Approved { feedback } => {
                if let Some(feedback) = feedback {
                    self.ui.say(SayMessage::UserFeedback(feedback.clone())).await?;
                    self.approval_feedback = Some(feedback);
                }
                Ok(true)
            }
            AskResponse::Denied { feedback } => {
                let text = match feedback {
                    Some(feedback) => {
                        self.ui.say(SayMessage::UserFeedback(feedback.clone())).await?;
                        responses::tool_denied_with_feedback(&feedback)
                    }
                    None => responses::tool_denied(),
                };
                self.set_result(text, false);
                self.run.rejected = true;
                Ok(false)
            }
        }
    }

    /// Show the error to the user and record it as the tool result
    pub async fn report_error(&mut self, action: &str, error: &anyhow::Error) {
        let message = format!("Error {action}:\n{error:#}");
        if let Err(e) = self.ui.say(SayMessage::Error(message)).await {
            warn!("Failed to display tool error: {}", e);
        }
        self.set_result(responses::tool_error(&format!("{error:#}")), true);
    }

    /// Record the tool result
    pub fn push_result(&mut self, content: impl Into<String>) {
        let mut content = content.into();
        // Feedback given with an approval travels with the result
        if let Some(feedback) = self.approval_feedback.take() {
            content = format!(
                "{content}\n\n{}",
                responses::tool_approved_with_feedback(&feedback)
            );
        }
        self.set_result(content, false);
    }

    /// Partial parameter text without a dangling closing-tag fragment
    pub fn strip_closing_tag(&self, tag: &str, text: Option<&str>) -> String {
        let text = text.unwrap_or_default();
        if self.partial {
            strip_partial_closing_tag(tag, text)
        } else {
            text.to_string()
        }
    }

    fn set_result(&mut self, content: String, is_error: bool) {
        if self.run.result.is_some() {
            warn!("Ignoring additional result from {}", self.tool_name);
            return;
        }
        self.run.result = Some(content);
        self.run.is_error = is_error;
    }

    pub fn finish(self) -> HandlerRun {
        self.run
    }
}

/// Behavior behind one tool name
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Present the invocation. Called again for every streaming update while
    /// `invocation.partial` is set.
    async fn handle(
        &self,
        context: &mut ToolContext<'_>,
        invocation: &TagToolInvocation,
    ) -> Result<()>;
}
