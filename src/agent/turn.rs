use super::dispatcher::{Cursor, DispatchError, Dispatcher};
use super::stream::{MessageAssembler, StreamEvent};
use super::task::TaskShared;
use crate::types::{ContentBlock, ToolOutcome, TranscriptEntry};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// One assistant response being presented
pub struct Turn {
    turn_id: String,
    assembler: Mutex<MessageAssembler>,
    dispatcher: Dispatcher,
}

impl Turn {
    pub(crate) fn new(turn_id: String, task: Arc<TaskShared>) -> Self {
        Self {
            dispatcher: Dispatcher::new(turn_id.clone(), task),
            turn_id,
            assembler: Mutex::new(MessageAssembler::new()),
        }
    }

    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    fn lock_assembler(&self) -> MutexGuard<'_, MessageAssembler> {
        self.assembler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed one stream event and present whatever became presentable
    pub async fn handle_event(&self, event: &StreamEvent) -> Result<(), DispatchError> {
        {
            // Publish while the assembler is held so block lists arrive in order
            let mut assembler = self.lock_assembler();
            if !assembler.apply(event) {
                return Ok(());
            }
            self.dispatcher.update_blocks(assembler.blocks());
        }
        self.dispatcher.present().await
    }

    /// The stream ended: settle pending calls and run the final pass
    pub async fn finish_stream(&self) -> Result<(), DispatchError> {
        {
            let mut assembler = self.lock_assembler();
            let failed = assembler.finish();
            if !failed.is_empty() {
                debug!("Turn {} ended with unparseable tool calls: {:?}", self.turn_id, failed);
            }
            self.dispatcher.update_blocks(assembler.blocks());
            self.dispatcher.mark_stream_complete();
        }
        self.dispatcher.present().await
    }

    /// Present without new input, e.g. after an earlier pass was aborted
    pub async fn present(&self) -> Result<(), DispatchError> {
        self.dispatcher.present().await
    }

    /// True once a tool was rejected or executed. The host may stop reading
    /// the model stream and call [`Turn::finish_stream`].
    pub fn should_interrupt_stream(&self) -> bool {
        self.dispatcher.should_interrupt()
    }

    /// Every block was presented and the stream is complete
    pub fn is_outbound_ready(&self) -> bool {
        self.dispatcher.is_outbound_ready()
    }

    /// Entries to send back to the model
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.dispatcher.transcript()
    }

    pub fn outcomes(&self) -> Vec<ToolOutcome> {
        self.dispatcher.outcomes()
    }

    pub fn blocks(&self) -> Vec<ContentBlock> {
        self.lock_assembler().blocks()
    }

    pub fn cursor(&self) -> Cursor {
        self.dispatcher.cursor()
    }
}
