use crate::modes::ModeConfig;
use crate::tools::core::ApprovalKind;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable overriding the active mode slug
pub const MODE_ENV_VAR: &str = "ASSISTANT_TURN_MODE";

/// Approval kinds that skip the user prompt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoApproval {
    pub read_only: bool,
    pub write: bool,
    pub execute: bool,
    pub browser: bool,
    pub mcp: bool,
    pub mode_switch: bool,
}

impl AutoApproval {
    /// Everything that can be auto-approved
    pub fn all() -> Self {
        Self {
            read_only: true,
            write: true,
            execute: true,
            browser: true,
            mcp: true,
            mode_switch: true,
        }
    }

    pub fn allows(&self, kind: ApprovalKind) -> bool {
        match kind {
            ApprovalKind::ReadOnly => self.read_only,
            ApprovalKind::Write => self.write,
            ApprovalKind::Execute => self.execute,
            ApprovalKind::Browser => self.browser,
            ApprovalKind::Mcp => self.mcp,
            ApprovalKind::ModeSwitch => self.mode_switch,
            // Questions and completions always need the user
            ApprovalKind::Followup | ApprovalKind::Completion => false,
        }
    }
}

/// Engine settings loaded from ~/.config/assistant-turn/settings.json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub mode: String,
    pub custom_modes: Vec<ModeConfig>,
    /// Feature flags per tool name; `false` disables the tool
    pub tool_requirements: HashMap<String, bool>,
    pub auto_approval: AutoApproval,
    /// Identical consecutive tool calls allowed before refusing; 0 disables
    pub repetition_limit: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            mode: "code".to_string(),
            custom_modes: Vec::new(),
            tool_requirements: HashMap::new(),
            auto_approval: AutoApproval::default(),
            repetition_limit: 3,
        }
    }
}

impl EngineSettings {
    /// Load from `path`, or from the default location when `None`.
    /// A missing default file yields defaults; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = settings_path()?;
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    tracing::debug!("No settings at {}, using defaults", default_path.display());
                    Self::default()
                }
            }
        };
        settings.apply_mode_override(std::env::var(MODE_ENV_VAR).ok());
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings from {}", path.display()))
    }

    fn apply_mode_override(&mut self, mode: Option<String>) {
        if let Some(mode) = mode.filter(|mode| !mode.trim().is_empty()) {
            tracing::debug!("Mode overridden by {}: {}", MODE_ENV_VAR, mode);
            self.mode = mode.trim().to_string();
        }
    }
}

pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("assistant-turn"))
        .ok_or_else(|| anyhow!("Could not determine config directory"))
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("settings.json"))
}
