use crate::types::Parameters;
use serde::{Deserialize, Serialize};

/// Groups that modes grant access to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolGroup {
    Read,
    Edit,
    Browser,
    Command,
    Mcp,
    Modes,
}

/// What a handler asks the user to approve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    ReadOnly,
    Write,
    Execute,
    Browser,
    Mcp,
    ModeSwitch,
    Followup,
    Completion,
}

/// The closed set of tools the engine knows how to present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    ReadFile,
    WriteToFile,
    ApplyDiff,
    InsertContent,
    SearchAndReplace,
    ListFiles,
    SearchFiles,
    ListCodeDefinitionNames,
    ExecuteCommand,
    BrowserAction,
    UseMcpTool,
    AccessMcpResource,
    AskFollowupQuestion,
    AttemptCompletion,
    SwitchMode,
    NewTask,
    FetchInstructions,
    UpdateTodoList,
}

impl ToolKind {
    pub const ALL: [ToolKind; 18] = [
        ToolKind::ReadFile,
        ToolKind::WriteToFile,
        ToolKind::ApplyDiff,
        ToolKind::InsertContent,
        ToolKind::SearchAndReplace,
        ToolKind::ListFiles,
        ToolKind::SearchFiles,
        ToolKind::ListCodeDefinitionNames,
        ToolKind::ExecuteCommand,
        ToolKind::BrowserAction,
        ToolKind::UseMcpTool,
        ToolKind::AccessMcpResource,
        ToolKind::AskFollowupQuestion,
        ToolKind::AttemptCompletion,
        ToolKind::SwitchMode,
        ToolKind::NewTask,
        ToolKind::FetchInstructions,
        ToolKind::UpdateTodoList,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::ReadFile => "read_file",
            ToolKind::WriteToFile => "write_to_file",
            ToolKind::ApplyDiff => "apply_diff",
            ToolKind::InsertContent => "insert_content",
            ToolKind::SearchAndReplace => "search_and_replace",
            ToolKind::ListFiles => "list_files",
            ToolKind::SearchFiles => "search_files",
            ToolKind::ListCodeDefinitionNames => "list_code_definition_names",
            ToolKind::ExecuteCommand => "execute_command",
            ToolKind::BrowserAction => "browser_action",
            ToolKind::UseMcpTool => "use_mcp_tool",
            ToolKind::AccessMcpResource => "access_mcp_resource",
            ToolKind::AskFollowupQuestion => "ask_followup_question",
            ToolKind::AttemptCompletion => "attempt_completion",
            ToolKind::SwitchMode => "switch_mode",
            ToolKind::NewTask => "new_task",
            ToolKind::FetchInstructions => "fetch_instructions",
            ToolKind::UpdateTodoList => "update_todo_list",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Tag names recognized by the message parser
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|kind| kind.name()).collect()
    }

    pub fn group(self) -> ToolGroup {
        match self {
            ToolKind::ReadFile
            | ToolKind::ListFiles
            | ToolKind::SearchFiles
            | ToolKind::ListCodeDefinitionNames
            | ToolKind::FetchInstructions => ToolGroup::Read,
            ToolKind::WriteToFile
            | ToolKind::ApplyDiff
            | ToolKind::InsertContent
            | ToolKind::SearchAndReplace => ToolGroup::Edit,
            ToolKind::ExecuteCommand => ToolGroup::Command,
            ToolKind::BrowserAction => ToolGroup::Browser,
            ToolKind::UseMcpTool | ToolKind::AccessMcpResource => ToolGroup::Mcp,
            ToolKind::AskFollowupQuestion
            | ToolKind::AttemptCompletion
            | ToolKind::SwitchMode
            | ToolKind::NewTask
            | ToolKind::UpdateTodoList => ToolGroup::Modes,
        }
    }

    /// Tools usable in every mode regardless of its groups
    pub fn is_always_available(self) -> bool {
        matches!(
            self,
            ToolKind::AskFollowupQuestion
                | ToolKind::AttemptCompletion
                | ToolKind::SwitchMode
                | ToolKind::NewTask
                | ToolKind::UpdateTodoList
        )
    }

    pub fn approval_kind(self) -> ApprovalKind {
        match self {
            ToolKind::AskFollowupQuestion => ApprovalKind::Followup,
            ToolKind::AttemptCompletion => ApprovalKind::Completion,
            ToolKind::SwitchMode | ToolKind::NewTask | ToolKind::UpdateTodoList => {
                ApprovalKind::ModeSwitch
            }
            kind => match kind.group() {
                ToolGroup::Read => ApprovalKind::ReadOnly,
                ToolGroup::Edit => ApprovalKind::Write,
                ToolGroup::Command => ApprovalKind::Execute,
                ToolGroup::Browser => ApprovalKind::Browser,
                ToolGroup::Mcp => ApprovalKind::Mcp,
                ToolGroup::Modes => ApprovalKind::ModeSwitch,
            },
        }
    }

    /// Short label used in transcript entries, e.g. `[read_file for 'a.py']`
    pub fn describe(self, params: &Parameters) -> String {
        let name = self.name();
        let param = |key: &str| params.get_text(key).unwrap_or_default();
        match self {
            ToolKind::ExecuteCommand => format!("[{name} for '{}']", param("command")),
            ToolKind::ReadFile => format!("[{name} for '{}']", read_targets(params).join(", ")),
            ToolKind::WriteToFile
            | ToolKind::ApplyDiff
            | ToolKind::InsertContent
            | ToolKind::SearchAndReplace
            | ToolKind::ListFiles
            | ToolKind::ListCodeDefinitionNames => format!("[{name} for '{}']", param("path")),
            ToolKind::SearchFiles => match params.get_text("file_pattern") {
                Some(pattern) => format!("[{name} for '{}' in '{pattern}']", param("regex")),
                None => format!("[{name} for '{}']", param("regex")),
            },
            ToolKind::BrowserAction => format!("[{name} for '{}']", param("action")),
            ToolKind::UseMcpTool | ToolKind::AccessMcpResource => {
                format!("[{name} for '{}']", param("server_name"))
            }
            ToolKind::AskFollowupQuestion => format!("[{name} for '{}']", param("question")),
            ToolKind::FetchInstructions => format!("[{name} for '{}']", param("task")),
            ToolKind::SwitchMode => match params.get_text("reason") {
                Some(reason) => format!("[{name} to '{}' because: {reason}]", param("mode_slug")),
                None => format!("[{name} to '{}']", param("mode_slug")),
            },
            ToolKind::NewTask => {
                format!("[{name} in {} mode: '{}']", param("mode"), param("message"))
            }
            ToolKind::AttemptCompletion | ToolKind::UpdateTodoList => format!("[{name}]"),
        }
    }
}

// `read_file` takes either a single `path` or an `<args>` list of `<file>` entries
fn read_targets(params: &Parameters) -> Vec<&str> {
    if let Some(path) = params.get_text("path") {
        return vec![path];
    }
    params
        .get_all("args")
        .filter_map(|args| args.as_nested())
        .flat_map(|args| args.iter().map(|(_, value)| value))
        .filter_map(|entry| entry.as_nested())
        .filter_map(|entry| entry.get_text("path"))
        .collect()
}
