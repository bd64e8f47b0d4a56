//! Modes and the tool permission gate

use crate::tools::core::{ToolGroup, ToolKind};
use crate::tools::validation::ValidationError;
use crate::types::Parameters;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOptions {
    #[serde(default, rename = "fileRegex", alias = "file_regex")]
    pub file_regex: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A tool group granted by a mode, optionally restricted to certain files.
/// Serialized as `"read"` or `["edit", { "fileRegex": "\\.md$" }]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupEntry {
    Group(ToolGroup),
    Restricted(ToolGroup, GroupOptions),
}

impl GroupEntry {
    pub fn group(&self) -> ToolGroup {
        match self {
            GroupEntry::Group(group) | GroupEntry::Restricted(group, _) => *group,
        }
    }

    pub fn options(&self) -> Option<&GroupOptions> {
        match self {
            GroupEntry::Group(_) => None,
            GroupEntry::Restricted(_, options) => Some(options),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeConfig {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub groups: Vec<GroupEntry>,
}

impl ModeConfig {
    fn new(slug: &str, name: &str, groups: Vec<GroupEntry>) -> Self {
        Self {
            slug: slug.to_string(),
            name: name.to_string(),
            groups,
        }
    }
}

pub fn builtin_modes() -> &'static [ModeConfig] {
    static MODES: OnceLock<Vec<ModeConfig>> = OnceLock::new();
    MODES.get_or_init(|| {
        use GroupEntry::Group;
        let full = || {
            vec![
                Group(ToolGroup::Read),
                Group(ToolGroup::Edit),
                Group(ToolGroup::Browser),
                Group(ToolGroup::Command),
                Group(ToolGroup::Mcp),
            ]
        };
        vec![
            ModeConfig::new("code", "Code", full()),
            ModeConfig::new(
                "architect",
                "Architect",
                vec![
                    Group(ToolGroup::Read),
                    GroupEntry::Restricted(
                        ToolGroup::Edit,
                        GroupOptions {
                            file_regex: Some(r"\.md$".to_string()),
                            description: Some("Markdown files only".to_string()),
                        },
                    ),
                    Group(ToolGroup::Browser),
                    Group(ToolGroup::Mcp),
                ],
            ),
            ModeConfig::new(
                "ask",
                "Ask",
                vec![
                    Group(ToolGroup::Read),
                    Group(ToolGroup::Browser),
                    Group(ToolGroup::Mcp),
                ],
            ),
            ModeConfig::new("debug", "Debug", full()),
            ModeConfig::new("orchestrator", "Orchestrator", Vec::new()),
        ]
    })
}

/// Custom modes take precedence over built-in modes with the same slug
pub fn find_mode<'a>(slug: &str, custom_modes: &'a [ModeConfig]) -> Option<&'a ModeConfig> {
    custom_modes
        .iter()
        .find(|mode| mode.slug == slug)
        .or_else(|| builtin_modes().iter().find(|mode| mode.slug == slug))
}

/// Decide whether `tool` may run in `mode`
pub fn is_tool_allowed_for_mode(
    tool: &str,
    mode: &str,
    custom_modes: &[ModeConfig],
    tool_requirements: &HashMap<String, bool>,
    parameters: &Parameters,
) -> Result<(), ValidationError> {
    let not_allowed = || ValidationError::ToolNotAllowed {
        tool: tool.to_string(),
        mode: mode.to_string(),
    };

    let kind = ToolKind::from_name(tool).ok_or_else(not_allowed)?;
    if kind.is_always_available() {
        return Ok(());
    }
    if tool_requirements.get(tool) == Some(&false) {
        return Err(not_allowed());
    }

    let config = find_mode(mode, custom_modes)
        .ok_or_else(|| ValidationError::UnknownMode(mode.to_string()))?;

    let entry = config
        .groups
        .iter()
        .find(|entry| entry.group() == kind.group())
        .ok_or_else(not_allowed)?;

    if let Some(options) = entry.options() {
        check_file_restriction(mode, options, parameters)?;
    }
    Ok(())
}

fn check_file_restriction(
    mode: &str,
    options: &GroupOptions,
    parameters: &Parameters,
) -> Result<(), ValidationError> {
    let (Some(pattern), Some(path)) = (&options.file_regex, parameters.get_text("path")) else {
        return Ok(());
    };
    let matches = match Regex::new(pattern) {
        Ok(regex) => regex.is_match(path),
        Err(e) => {
            warn!("Invalid file pattern '{}' in mode {}: {}", pattern, mode, e);
            false
        }
    };
    if matches {
        Ok(())
    } else {
        Err(ValidationError::FileRestriction {
            mode: mode.to_string(),
            pattern: pattern.clone(),
            description: options.description.clone(),
            path: path.to_string(),
        })
    }
}

/// Permission gate consulted before any tool runs
pub trait ModeValidator: Send + Sync {
    fn validate(
        &self,
        tool: &str,
        mode: &str,
        custom_modes: &[ModeConfig],
        tool_requirements: &HashMap<String, bool>,
        parameters: &Parameters,
    ) -> Result<(), ValidationError>;
}

/// Gate backed by the mode definitions above
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultModeValidator;

impl ModeValidator for DefaultModeValidator {
    fn validate(
        &self,
        tool: &str,
        mode: &str,
        custom_modes: &[ModeConfig],
        tool_requirements: &HashMap<String, bool>,
        parameters: &Parameters,
    ) -> Result<(), ValidationError> {
        is_tool_allowed_for_mode(tool, mode, custom_modes, tool_requirements, parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(tool: &str, mode: &str, parameters: &Parameters) -> Result<(), ValidationError> {
        is_tool_allowed_for_mode(tool, mode, &[], &HashMap::new(), parameters)
    }

    #[test]
    fn test_builtin_modes() {
        let none = Parameters::new();
        assert_eq!(check("execute_command", "code", &none), Ok(()));
        assert_eq!(check("read_file", "ask", &none), Ok(()));
        assert_eq!(
            check("write_to_file", "ask", &none),
            Err(ValidationError::ToolNotAllowed {
                tool: "write_to_file".to_string(),
                mode: "ask".to_string()
            })
        );
        assert!(check("read_file", "orchestrator", &none).is_err());
    }

    #[test]
    fn test_always_available_tools() {
        let none = Parameters::new();
        assert_eq!(check("attempt_completion", "orchestrator", &none), Ok(()));
        assert_eq!(check("switch_mode", "no-such-mode", &none), Ok(()));
    }

    #[test]
    fn test_unknown_mode_and_tool() {
        let none = Parameters::new();
        assert_eq!(
            check("read_file", "poet", &none),
            Err(ValidationError::UnknownMode("poet".to_string()))
        );
        assert!(check("format_disk", "code", &none).is_err());
    }

    #[test]
    fn test_file_restriction() {
        let markdown = Parameters::new().with_text("path", "docs/plan.md");
        assert_eq!(check("write_to_file", "architect", &markdown), Ok(()));

        let source = Parameters::new().with_text("path", "src/main.rs");
        let err = check("write_to_file", "architect", &source).unwrap_err();
        assert!(matches!(err, ValidationError::FileRestriction { .. }));
        assert!(err.to_string().contains("src/main.rs"));
    }

    #[test]
    fn test_tool_requirements_disable_tools() {
        let mut requirements = HashMap::new();
        requirements.insert("apply_diff".to_string(), false);
        let result = is_tool_allowed_for_mode(
            "apply_diff",
            "code",
            &[],
            &requirements,
            &Parameters::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_custom_mode_overrides_builtin() {
        let custom: Vec<ModeConfig> = serde_json::from_str(
            r#"[{"slug": "ask", "name": "Ask+", "groups": ["read", "command"]}]"#,
        )
        .unwrap();
        let result = is_tool_allowed_for_mode(
            "execute_command",
            "ask",
            &custom,
            &HashMap::new(),
            &Parameters::new(),
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_restricted_group_deserializes() {
        let entry: GroupEntry =
            serde_json::from_str(r#"["edit", {"fileRegex": "\\.rs$"}]"#).unwrap();
        assert_eq!(entry.group(), ToolGroup::Edit);
        assert_eq!(
            entry.options().and_then(|o| o.file_regex.as_deref()),
            Some(r"\.rs$")
        );
    }
}
