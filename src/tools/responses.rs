//! Canonical texts sent back to the model as tool results

pub fn tool_denied() -> String {
    "The user denied this operation.".to_string()
}

pub fn tool_denied_with_feedback(feedback: &str) -> String {
    format!(
        "The user denied this operation and provided the following feedback:\n<feedback>\n{feedback}\n</feedback>"
    )
}

pub fn tool_approved_with_feedback(feedback: &str) -> String {
    format!(
        "The user approved this operation and provided the following context:\n<feedback>\n{feedback}\n</feedback>"
    )
}

pub fn tool_error(error: &str) -> String {
    format!("The tool execution failed with the following error:\n<error>\n{error}\n</error>")
}

pub fn missing_parameter(tool: &str, param: &str) -> String {
    format!(
        "Missing value for required parameter '{param}'. Please retry {tool} with a complete response."
    )
}

pub fn unknown_tool(name: &str) -> String {
    format!("Unknown tool '{name}'. Use one of the tools available in the current mode.")
}

pub fn truncated_arguments(name: &str, call_id: &str) -> String {
    format!("Tool call '{name}' ({call_id}) has truncated or invalid arguments.")
}

pub fn repeated_tool_call(name: &str, limit: u32) -> String {
    format!(
        "Tool '{name}' was called {limit} times in a row with identical parameters. \
         It was not run again; try a different approach."
    )
}
