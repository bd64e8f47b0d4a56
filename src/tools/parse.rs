use crate::types::{ContentBlock, ParamValue, Parameters, TagToolInvocation, TextBlock};
use regex::Regex;
use std::sync::OnceLock;
use tracing::trace;

/// Parameters whose value may itself contain closing tags; they end at the
/// last closing tag before the tool closes.
const RAW_PARAMS: &[&str] = &["content"];

/// Parameters holding child elements instead of text
const STRUCTURED_PARAMS: &[&str] = &["args"];

/// Split accumulated assistant text into text and tool blocks.
///
/// Only tags named in `tool_names` open a tool; any other tag stays text.
/// The parse is a pure function of its input, so it can run again on every
/// streaming update. The trailing text block is always partial, and an
/// unclosed tool consumes the rest of the message as a partial invocation.
pub fn parse_assistant_message(message: &str, tool_names: &[&str]) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    let mut text_start = 0;
    let mut pos = 0;

    while let Some(offset) = message[pos..].find('<') {
        let tag_start = pos + offset;
        let Some(name) = match_opening_tag(&message[tag_start..], tool_names) else {
            pos = tag_start + 1;
            continue;
        };

        push_text(&mut blocks, &message[text_start..tag_start], false);

        let body_start = tag_start + name.len() + 2;
        let (invocation, consumed) = parse_tool_body(name, &message[body_start..]);
        trace!(
            "Parsed tool block {} (partial: {}, params: {:?})",
            invocation.name,
            invocation.partial,
            invocation.parameters.names()
        );
        let partial = invocation.partial;
        blocks.push(ContentBlock::TagTool(invocation));
        if partial {
            return blocks;
        }

        pos = body_start + consumed;
        text_start = pos;
    }

    push_text(&mut blocks, &message[text_start..], true);
    blocks
}

fn push_text(blocks: &mut Vec<ContentBlock>, text: &str, partial: bool) {
    let content = text.trim();
    if !content.is_empty() {
        blocks.push(ContentBlock::Text(TextBlock {
            content: content.to_string(),
            partial,
        }));
    }
}

fn match_opening_tag<'a>(rest: &str, tool_names: &[&'a str]) -> Option<&'a str> {
    let after = rest.strip_prefix('<')?;
    tool_names
        .iter()
        .copied()
        .find(|name| after.strip_prefix(name).is_some_and(|tail| tail.starts_with('>')))
}

/// Name of the tag at the start of `rest` when it is a plain `<ident>` opener
fn opening_tag_name(rest: &str) -> Option<&str> {
    let after = rest.strip_prefix('<')?;
    let end = after.find('>')?;
    let name = &after[..end];
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some(name)
}

// Returns the invocation and how many bytes of `body` it consumed
fn parse_tool_body(name: &str, body: &str) -> (TagToolInvocation, usize) {
    let closing = format!("</{name}>");
    let mut parameters = Parameters::new();
    let mut pos = 0;

    loop {
        let Some(offset) = body[pos..].find('<') else {
            break;
        };
        let at = pos + offset;
        let rest = &body[at..];

        if rest.starts_with(&closing) {
            let invocation = TagToolInvocation {
                name: name.to_string(),
                parameters,
                partial: false,
            };
            return (invocation, at + closing.len());
        }

        let Some(param) = opening_tag_name(rest) else {
            pos = at + 1;
            continue;
        };

        let value_start = at + param.len() + 2;
        let value_text = &body[value_start..];
        match find_param_end(param, value_text, &closing) {
            Some(value_len) => {
                let value = param_value(param, &value_text[..value_len], false);
                parameters.push(param, value);
                pos = value_start + value_len + param.len() + 3;
            }
            None => {
                let value = param_value(param, &strip_dangling_tag(value_text), true);
                parameters.push(param, value);
                break;
            }
        }
    }

    let invocation = TagToolInvocation {
        name: name.to_string(),
        parameters,
        partial: true,
    };
    (invocation, body.len())
}

fn find_param_end(param: &str, value: &str, tool_closing: &str) -> Option<usize> {
    let closing = format!("</{param}>");
    if RAW_PARAMS.contains(&param) {
        let region = match value.find(tool_closing) {
            Some(end) => &value[..end],
            None => value,
        };
        region.rfind(&closing)
    } else {
        value.find(&closing)
    }
}

fn param_value(param: &str, raw: &str, partial: bool) -> ParamValue {
    if STRUCTURED_PARAMS.contains(&param) {
        ParamValue::Nested(parse_elements(raw, partial))
    } else if RAW_PARAMS.contains(&param) {
        // Keep indentation, drop the line breaks around the tags
        ParamValue::Text(raw.trim_matches(['\n', '\r']).to_string())
    } else {
        ParamValue::Text(raw.trim().to_string())
    }
}

/// Parse a sequence of `<name>value</name>` elements. Elements whose value
/// holds further elements become nested parameters.
fn parse_elements(raw: &str, allow_partial: bool) -> Parameters {
    let mut elements = Parameters::new();
    let mut pos = 0;

    while let Some(offset) = raw[pos..].find('<') {
        let at = pos + offset;
        let Some(name) = opening_tag_name(&raw[at..]) else {
            pos = at + 1;
            continue;
        };
        let inner_start = at + name.len() + 2;
        match find_matching_close(name, &raw[inner_start..]) {
            Some(inner_len) => {
                let inner = &raw[inner_start..inner_start + inner_len];
                elements.push(name, element_value(inner, false));
                pos = inner_start + inner_len + name.len() + 3;
            }
            None => {
                if allow_partial {
                    let inner = strip_dangling_tag(&raw[inner_start..]);
                    elements.push(name, element_value(&inner, true));
                }
                break;
            }
        }
    }

    elements
}

fn element_value(inner: &str, partial: bool) -> ParamValue {
    let trimmed = inner.trim();
    if trimmed.starts_with('<') {
        let children = parse_elements(trimmed, partial);
        if !children.is_empty() {
            return ParamValue::Nested(children);
        }
    }
    ParamValue::Text(trimmed.to_string())
}

// Closing tag for `name`, skipping nested elements of the same name
fn find_matching_close(name: &str, text: &str) -> Option<usize> {
    let opening = format!("<{name}>");
    let closing = format!("</{name}>");
    let mut depth = 0usize;
    let mut pos = 0;

    loop {
        let next_close = text[pos..].find(&closing)? + pos;
        let next_open = text[pos..].find(&opening).map(|offset| offset + pos);
        match next_open {
            Some(open) if open < next_close => {
                depth += 1;
                pos = open + opening.len();
            }
            _ if depth == 0 => return Some(next_close),
            _ => {
                depth -= 1;
                pos = next_close + closing.len();
            }
        }
    }
}

/// Remove a tag fragment that is still being streamed from the end of `text`,
/// e.g. `Hello <thin` or `done </resu`.
pub fn strip_dangling_tag(text: &str) -> String {
    if let Some(idx) = text.rfind('<') {
        let fragment = &text[idx + 1..];
        if !fragment.contains('>') {
            let name = fragment.strip_prefix('/').unwrap_or(fragment);
            if name.chars().all(|c| c.is_ascii_alphabetic() || c == '_') {
                return text[..idx].trim_end().to_string();
            }
        }
    }
    text.to_string()
}

/// Remove a partial `</tag>` from the end of a streaming parameter value,
/// together with one whitespace character before it.
pub fn strip_partial_closing_tag(tag: &str, text: &str) -> String {
    if let Some(idx) = text.rfind('<') {
        let fragment = &text[idx + 1..];
        let fragment = fragment.strip_prefix('/').unwrap_or(fragment);
        if tag.starts_with(fragment) {
            let mut head = &text[..idx];
            if let Some(last) = head.chars().last().filter(|c| c.is_whitespace()) {
                head = &head[..head.len() - last.len_utf8()];
            }
            return head.to_string();
        }
    }
    text.to_string()
}

/// Drop `<thinking>` markers, keeping the text between them
pub fn strip_thinking_tags(text: &str) -> String {
    static OPEN: OnceLock<Regex> = OnceLock::new();
    static CLOSE: OnceLock<Regex> = OnceLock::new();
    let open = OPEN.get_or_init(|| Regex::new(r"<thinking>\s?").expect("valid regex"));
    let close = CLOSE.get_or_init(|| Regex::new(r"\s?</thinking>").expect("valid regex"));
    let text = open.replace_all(text, "");
    close.replace_all(&text, "").into_owned()
}
