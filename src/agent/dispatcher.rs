use super::task::TaskShared;
use crate::tools::core::{ToolContext, ToolKind};
use crate::tools::formatter::{bridge_to_tag, outcome_to_entry};
use crate::tools::parse::{strip_dangling_tag, strip_thinking_tags};
use crate::tools::responses;
use crate::tools::validation::{sanitize_tool_name, validate_structured_call};
use crate::types::{
    ContentBlock, InvocationRef, Parameters, StructuredToolInvocation, TagToolInvocation,
    TextBlock, ToolOutcome, TranscriptEntry,
};
use crate::ui::SayMessage;
use anyhow::anyhow;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Turn {turn_id} of task {task_id} was aborted")]
    Aborted { task_id: String, turn_id: String },
}

/// Presentation position within one turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cursor {
    pub blocks: Vec<ContentBlock>,
    pub index: usize,
    pub locked: bool,
    pub pending_rerun: bool,
    pub stream_complete: bool,
    pub outbound_ready: bool,
}

#[derive(Debug, Default)]
struct TurnState {
    cursor: Cursor,
    did_reject_tool: bool,
    did_already_use_tool: bool,
    outcomes: Vec<ToolOutcome>,
    transcript: Vec<TranscriptEntry>,
}

// Clears `locked` when a pass ends early through an error or a panic.
// Regular exits unlock in the same critical section that decides to stop.
struct CursorRelease<'a> {
    state: &'a Mutex<TurnState>,
    armed: bool,
}

impl<'a> CursorRelease<'a> {
    fn new(state: &'a Mutex<TurnState>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CursorRelease<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.cursor.locked = false;
        }
    }
}

/// Presents the blocks of one turn in order, one tool at most
pub struct Dispatcher {
    turn_id: String,
    task: Arc<TaskShared>,
    state: Mutex<TurnState>,
}

impl Dispatcher {
    pub(crate) fn new(turn_id: String, task: Arc<TaskShared>) -> Self {
        Self {
            turn_id,
            task,
            state: Mutex::new(TurnState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TurnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the block list with a newer derivation of the same stream
    pub fn update_blocks(&self, blocks: Vec<ContentBlock>) {
        let mut state = self.lock_state();
        if blocks.len() < state.cursor.index {
            warn!(
                "Block list shrank below the cursor ({} < {})",
                blocks.len(),
                state.cursor.index
            );
        }
        state.cursor.blocks = blocks;
    }

    pub fn mark_stream_complete(&self) {
        self.lock_state().cursor.stream_complete = true;
    }

    pub fn cursor(&self) -> Cursor {
        self.lock_state().cursor.clone()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.lock_state().transcript.clone()
    }

    pub fn outcomes(&self) -> Vec<ToolOutcome> {
        self.lock_state().outcomes.clone()
    }

    pub fn is_outbound_ready(&self) -> bool {
        self.lock_state().cursor.outbound_ready
    }

    /// A tool was rejected or already ran; the rest of the stream is unused
    pub fn should_interrupt(&self) -> bool {
        let state = self.lock_state();
        state.did_reject_tool || state.did_already_use_tool
    }

    /// Run presentation passes until the cursor catches up with the blocks.
    ///
    /// A call that arrives while a pass is running only schedules one more
    /// pass and returns immediately.
    pub async fn present(&self) -> Result<(), DispatchError> {
        {
            let mut state = self.lock_state();
            if state.cursor.locked {
                trace!("Presentation in progress, scheduling another pass");
                state.cursor.pending_rerun = true;
                return Ok(());
            }
            state.cursor.locked = true;
        }
        let release = CursorRelease::new(&self.state);

        loop {
            if self.task.abort.is_cancelled() {
                return Err(DispatchError::Aborted {
                    task_id: self.task.task_id.clone(),
                    turn_id: self.turn_id.clone(),
                });
            }

            let Some((index, block)) = self.next_block() else {
                release.disarm();
                return Ok(());
            };
            debug!("Presenting block {} of turn {}", index, self.turn_id);
            self.present_block(index, &block).await;

            if !self.advance(block.is_partial()) {
                release.disarm();
                return Ok(());
            }
        }
    }

    // Snapshot of the block under the cursor. When caught up the pass ends
    // and the cursor is unlocked under the same lock.
    fn next_block(&self) -> Option<(usize, ContentBlock)> {
        let mut state = self.lock_state();
        let cursor = &mut state.cursor;
        cursor.pending_rerun = false;
        match cursor.blocks.get(cursor.index) {
            Some(block) => Some((cursor.index, block.clone())),
            None => {
                if cursor.stream_complete {
                    cursor.outbound_ready = true;
                }
                cursor.locked = false;
                None
            }
        }
    }

    // Move past the presented block when possible. Returns whether to loop;
    // on `false` the cursor is already unlocked.
    fn advance(&self, was_partial: bool) -> bool {
        let mut state = self.lock_state();
        let settled = state.did_reject_tool || state.did_already_use_tool;
        let cursor = &mut state.cursor;
        if !was_partial || settled {
            cursor.index += 1;
            if cursor.index < cursor.blocks.len() {
                return true;
            }
        }
        if cursor.pending_rerun {
            return true;
        }
        if cursor.index >= cursor.blocks.len() && cursor.stream_complete {
            cursor.outbound_ready = true;
        }
        cursor.locked = false;
        false
    }

    fn is_settled(&self) -> (bool, bool) {
        let state = self.lock_state();
        (state.did_reject_tool, state.did_already_use_tool)
    }

    async fn present_block(&self, index: usize, block: &ContentBlock) {
        match block {
            ContentBlock::Text(text) => self.present_text(text).await,
            ContentBlock::TagTool(invocation) => {
                let reference = InvocationRef::Tag {
                    name: invocation.name.clone(),
                    block_index: index,
                };
                self.present_tool(reference, invocation.clone()).await
            }
            ContentBlock::Structured(call) => self.present_structured(call).await,
        }
    }

    async fn present_text(&self, block: &TextBlock) {
        let (rejected, used) = self.is_settled();
        if rejected || used {
            trace!("Suppressing text after tool use");
            return;
        }
        let content = strip_dangling_tag(&strip_thinking_tags(&block.content));
        if content.is_empty() {
            return;
        }
        let message = SayMessage::Text {
            text: content,
            partial: block.partial,
        };
        if let Err(e) = self.task.services.ui.say(message).await {
            warn!("Failed to display assistant text: {}", e);
        }
    }

    async fn present_structured(&self, call: &StructuredToolInvocation) {
        let reference = InvocationRef::CallId(call.call_id.clone());
        let label = format!("[{}]", call.name);

        if self.skip_if_settled(&label, call.partial) {
            return;
        }

        if !call.partial {
            if !call.completed {
                self.task.record_mistake();
                let message = responses::truncated_arguments(&call.name, &call.call_id);
                self.record_outcome(reference, &label, responses::tool_error(&message), true);
                return;
            }
            if let Err(e) = validate_structured_call(call) {
                self.task.record_mistake();
                self.record_outcome(reference, &label, responses::tool_error(&e.to_string()), true);
                return;
            }
        }

        let name = sanitize_tool_name(&call.name);
        if name != call.name {
            warn!("Sanitized tool name '{}' to '{}'", call.name, name);
        }
        let call = StructuredToolInvocation {
            name: name.into_owned(),
            ..call.clone()
        };

        match bridge_to_tag(&call, &ToolKind::names()) {
            Ok(invocation) => self.present_tool(reference, invocation).await,
            Err(e) if call.partial => debug!("Partial tool call {} not bridged yet: {}", call.call_id, e),
            Err(e) => {
                warn!("Failed to bridge tool call {}: {}", call.call_id, e);
                let message = match e {
                    crate::tools::BridgeError::UnknownTool(name) => responses::unknown_tool(&name),
                    other => other.to_string(),
                };
                self.record_outcome(reference, &label, responses::tool_error(&message), true);
            }
        }
    }

    async fn present_tool(&self, reference: InvocationRef, invocation: TagToolInvocation) {
        let kind = ToolKind::from_name(&invocation.name);
        let label = match kind {
            Some(kind) => kind.describe(&invocation.parameters),
            None => format!("[{}]", invocation.name),
        };

        if self.skip_if_settled(&label, invocation.partial) {
            return;
        }

        let handler = kind.and_then(|kind| self.task.services.registry.get(kind).map(|h| (kind, h)));
        let Some((kind, handler)) = handler else {
            if !invocation.partial {
                let message = responses::unknown_tool(&invocation.name);
                self.record_outcome(reference, &label, responses::tool_error(&message), true);
            }
            return;
        };

        if !invocation.partial {
            if kind != ToolKind::BrowserAction {
                if let Err(e) = self.task.services.ui.close_browser_session().await {
                    warn!("Failed to close browser session: {}", e);
                }
            }
            self.task.record_tool_usage(kind);
        }

        // Parameters of a partial invocation are incomplete, so file
        // restrictions are only checked once it is complete
        let empty = Parameters::new();
        let gate_parameters = if invocation.partial {
            &empty
        } else {
            &invocation.parameters
        };
        let mode = self.task.mode();
        if let Err(e) = self.task.services.validator.validate(
            &invocation.name,
            &mode,
            &self.task.settings.custom_modes,
            &self.task.settings.tool_requirements,
            gate_parameters,
        ) {
            let mistakes = self.task.record_mistake();
            debug!("Refused {} in mode {} ({} mistakes): {}", invocation.name, mode, mistakes, e);
            self.record_outcome(reference, &label, responses::tool_error(&e.to_string()), true);
            return;
        }

        if !invocation.partial && !self.task.allow_repetition(&invocation) {
            self.task.record_mistake();
            let limit = self.task.settings.repetition_limit;
            let message = responses::repeated_tool_call(&invocation.name, limit);
            self.record_outcome(reference, &label, responses::tool_error(&message), true);
            return;
        }

        let ui = self.task.services.ui.as_ref();
        let mut context = ToolContext::new(ui, &self.task.settings.auto_approval, &invocation);
        let result = AssertUnwindSafe(handler.handle(&mut context, &invocation))
            .catch_unwind()
            .await;
        let action = format!("executing {}", invocation.name);
        match result {
            Ok(Ok(())) => {}
            Ok(Err(error)) => context.report_error(&action, &error).await,
            Err(panic) => {
                let error = anyhow!("tool handler panicked: {}", panic_message(panic.as_ref()));
                context.report_error(&action, &error).await;
            }
        }
        let run = context.finish();

        if run.rejected {
            self.lock_state().did_reject_tool = true;
        }
        match run.result {
            Some(text) => {
                if !run.is_error && !run.rejected {
                    self.task.reset_mistakes();
                }
                self.record_outcome(reference, &label, text, run.is_error);
            }
            None if !invocation.partial => {
                self.task.reset_mistakes();
                self.record_outcome(reference, &label, String::new(), false);
            }
            None => {}
        }
    }

    // Tools after a rejected or executed tool are passed over without an outcome
    fn skip_if_settled(&self, label: &str, partial: bool) -> bool {
        let (rejected, used) = self.is_settled();
        if !rejected && !used {
            return false;
        }
        if rejected {
            debug!("Skipping {} (partial: {}) after a rejected tool", label, partial);
        } else {
            debug!("Skipping {} (partial: {}), a tool already ran in this turn", label, partial);
        }
        true
    }

    fn record_outcome(&self, reference: InvocationRef, label: &str, text: String, is_error: bool) {
        let outcome = ToolOutcome {
            reference,
            result_text: text,
            is_error,
        };
        let entry = outcome_to_entry(&outcome, label);
        let mut state = self.lock_state();
        state.transcript.push(entry);
        state.outcomes.push(outcome);
        state.did_already_use_tool = true;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
