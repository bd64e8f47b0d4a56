mod dispatcher;
mod repetition;
mod stream;
mod task;
mod turn;

#[cfg(test)]
mod tests;

pub use dispatcher::{Cursor, DispatchError, Dispatcher};
pub use repetition::RepetitionGuard;
pub use stream::{MessageAssembler, StreamEvent};
pub use task::{AgentTask, TaskServices};
pub use turn::Turn;
