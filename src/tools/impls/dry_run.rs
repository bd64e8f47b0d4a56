use crate::tools::core::{ToolContext, ToolHandler, ToolKind, ToolRegistry};
use crate::tools::responses;
use crate::types::{ParamValue, TagToolInvocation, ToolError};
use crate::ui::SayMessage;
use anyhow::Result;
use async_trait::async_trait;

/// Handler that checks parameters and asks for approval, then reports what
/// it would have done. Used to replay recorded sessions without side effects.
pub struct DryRunTool {
    kind: ToolKind,
}

impl DryRunTool {
    pub fn new(kind: ToolKind) -> Self {
        Self { kind }
    }
}

fn required_params(kind: ToolKind) -> &'static [&'static str] {
    match kind {
        // Either `path` or `args`, checked separately
        ToolKind::ReadFile => &[],
        ToolKind::WriteToFile => &["path", "content"],
        ToolKind::ApplyDiff => &["path", "diff"],
        ToolKind::InsertContent => &["path", "line", "content"],
        ToolKind::SearchAndReplace => &["path", "search"],
        ToolKind::ListFiles | ToolKind::ListCodeDefinitionNames => &["path"],
        ToolKind::SearchFiles => &["path", "regex"],
        ToolKind::ExecuteCommand => &["command"],
        ToolKind::BrowserAction => &["action"],
        ToolKind::UseMcpTool => &["server_name", "tool_name"],
        ToolKind::AccessMcpResource => &["server_name", "uri"],
        ToolKind::AskFollowupQuestion => &["question"],
        ToolKind::AttemptCompletion => &["result"],
        ToolKind::SwitchMode => &["mode_slug"],
        ToolKind::NewTask => &["mode", "message"],
        ToolKind::FetchInstructions => &["task"],
        ToolKind::UpdateTodoList => &["todos"],
    }
}

fn check_params(kind: ToolKind, invocation: &TagToolInvocation) -> Result<(), ToolError> {
    for param in required_params(kind) {
        if invocation.require_param(param).is_err() {
            return Err(ToolError::ParseError(responses::missing_parameter(
                kind.name(),
                param,
            )));
        }
    }
    if kind == ToolKind::ReadFile
        && invocation.param("path").is_none()
        && invocation.parameters.get("args").and_then(ParamValue::as_nested).is_none()
    {
        return Err(ToolError::ParseError(
            "read_file needs either 'path' or 'args'".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl ToolHandler for DryRunTool {
    async fn handle(
        &self,
        context: &mut ToolContext<'_>,
        invocation: &TagToolInvocation,
    ) -> Result<()> {
        let description = self.kind.describe(&invocation.parameters);

        if context.is_partial() {
            // Preview the target while the call is still streaming
            if let Some(path) = invocation.param("path") {
                let path = context.strip_closing_tag("path", Some(path));
                let text = format!("{} {}", self.kind.name(), path);
                context
                    .ui()
                    .say(SayMessage::Text {
                        text,
                        partial: true,
                    })
                    .await?;
            }
            return Ok(());
        }

        check_params(self.kind, invocation)?;

        let message = serde_json::to_string_pretty(&invocation.parameters.to_json())?;
        if !context
            .approve(self.kind.approval_kind(), Some(message))
            .await?
        {
            return Ok(());
        }

        context.push_result(format!(
            "(dry run) {description} was approved; nothing was executed."
        ));
        Ok(())
    }
}

/// Registry with a dry-run handler for every tool
pub fn dry_run_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for kind in ToolKind::ALL {
        registry.register(kind, Box::new(DryRunTool::new(kind)));
    }
    registry
}
