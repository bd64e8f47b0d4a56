//! Presentation engine for streamed assistant turns.
//!
//! Assistant output arrives as text with tag-encoded tool calls, as
//! structured start/delta/stop tool-call events, or both. A [`agent::Turn`]
//! assembles the stream into ordered content blocks and presents them one
//! at a time: text goes to the host UI, and at most one tool per turn is
//! validated, approved and executed through the [`tools::core::ToolRegistry`].

pub mod agent;
pub mod logging;
pub mod modes;
pub mod recording;
pub mod settings;
pub mod tools;
pub mod types;
pub mod ui;
