use super::repetition::RepetitionGuard;
use super::turn::Turn;
use crate::modes::ModeValidator;
use crate::settings::EngineSettings;
use crate::tools::core::{ToolKind, ToolRegistry};
use crate::types::TagToolInvocation;
use crate::ui::UserInterface;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Collaborators a task presents turns with
#[derive(Clone)]
pub struct TaskServices {
    pub ui: Arc<dyn UserInterface>,
    pub registry: Arc<ToolRegistry>,
    pub validator: Arc<dyn ModeValidator>,
}

#[derive(Debug)]
struct TaskState {
    mode: String,
    consecutive_mistakes: u32,
    repetition: RepetitionGuard,
    tool_usage: IndexMap<ToolKind, u32>,
}

/// State shared by every turn of one task
pub(crate) struct TaskShared {
    pub(crate) task_id: String,
    pub(crate) services: TaskServices,
    pub(crate) settings: EngineSettings,
    pub(crate) abort: CancellationToken,
    state: Mutex<TaskState>,
}

impl TaskShared {
    fn lock_state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn mode(&self) -> String {
        self.lock_state().mode.clone()
    }

    pub(crate) fn record_mistake(&self) -> u32 {
        let mut state = self.lock_state();
        state.consecutive_mistakes += 1;
        state.consecutive_mistakes
    }

    pub(crate) fn reset_mistakes(&self) {
        self.lock_state().consecutive_mistakes = 0;
    }

    pub(crate) fn record_tool_usage(&self, kind: ToolKind) {
        let count = {
            let mut state = self.lock_state();
            let count = state.tool_usage.entry(kind).or_insert(0);
            *count += 1;
            *count
        };
        info!(task = %self.task_id, tool = kind.name(), count, "Tool used");
    }

    /// Whether a complete invocation passes the repetition guard
    pub(crate) fn allow_repetition(&self, invocation: &TagToolInvocation) -> bool {
        self.lock_state().repetition.allow(invocation)
    }
}

/// One conversation task. Turns are created from it one at a time and share
/// its mistake counter, repetition guard, mode and abort signal.
pub struct AgentTask {
    shared: Arc<TaskShared>,
    turns: AtomicU64,
}

impl AgentTask {
    pub fn new(task_id: impl Into<String>, services: TaskServices, settings: EngineSettings) -> Self {
        let state = TaskState {
            mode: settings.mode.clone(),
            consecutive_mistakes: 0,
            repetition: RepetitionGuard::new(settings.repetition_limit),
            tool_usage: IndexMap::new(),
        };
        Self {
            shared: Arc::new(TaskShared {
                task_id: task_id.into(),
                services,
                settings,
                abort: CancellationToken::new(),
                state: Mutex::new(state),
            }),
            turns: AtomicU64::new(0),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.shared.task_id
    }

    /// Start presenting a new assistant response
    pub fn begin_turn(&self) -> Turn {
        let number = self.turns.fetch_add(1, Ordering::SeqCst) + 1;
        let turn_id = format!("{}-{}", self.shared.task_id, number);
        Turn::new(turn_id, self.shared.clone())
    }

    /// Stop the current and all later turns
    pub fn abort(&self) {
        self.shared.abort.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.abort.is_cancelled()
    }

    pub fn abort_token(&self) -> CancellationToken {
        self.shared.abort.clone()
    }

    pub fn mode(&self) -> String {
        self.shared.mode()
    }

    pub fn set_mode(&self, mode: impl Into<String>) {
        self.shared.lock_state().mode = mode.into();
    }

    pub fn consecutive_mistakes(&self) -> u32 {
        self.shared.lock_state().consecutive_mistakes
    }

    /// Complete invocations per tool, in first-use order
    pub fn tool_usage(&self) -> Vec<(ToolKind, u32)> {
        self.shared
            .lock_state()
            .tool_usage
            .iter()
            .map(|(kind, count)| (*kind, *count))
            .collect()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.shared.settings
    }
}
