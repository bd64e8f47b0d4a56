pub mod accumulator;
pub mod core;
pub mod formatter;
pub mod impls;
pub mod parse;
pub mod responses;
pub mod validation;

pub use accumulator::{speculative_parse, ToolCallAccumulator};
pub use formatter::{bridge_to_tag, to_invocation_text, to_response, BridgeError};
pub use parse::parse_assistant_message;
pub use validation::ValidationError;
