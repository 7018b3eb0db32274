//! Payload normalizer
//!
//! `output` payloads arrive in whatever shape the agent CLI happened to emit:
//! bare strings, JSON-encoded CLI envelopes, content-block arrays, full
//! provider responses, or wrapper objects around any of those. Each payload is
//! classified into a [`PayloadShape`] first and then handled by one exhaustive
//! match, so an unexpected shape yields nothing instead of a guess.

use agentrelay_protocol::ToolCommand;
use serde_json::Value;
use tracing::debug;

const MAX_DEPTH: usize = 8;

/// Text and tool calls extracted from one payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub text: String,
    pub tools: Vec<ToolCommand>,
}

impl Normalized {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.tools.is_empty()
    }
}

/// Recognized payload shapes
#[derive(Debug, PartialEq)]
pub enum PayloadShape<'a> {
    /// Legacy plain text
    Plain(&'a str),
    /// A JSON-encoded string, decoded once
    Encoded(Value),
    /// Looks like JSON but does not parse (partial frame mid-stream)
    Truncated,
    /// `[{type:"text",text}|{type:"tool_use",name,input}, ...]`
    Blocks(&'a [Value]),
    /// `{model, role, content}`; carries `content`
    ProviderResponse(&'a Value),
    /// `{content: {role, content}}` or `{role, content}`; carries the inner `content`
    Wrapped(&'a Value),
    /// `{type: "assistant", message: {...}}` from the CLI stream; carries `message`
    CliEnvelope(&'a Value),
    /// `{text: "..."}` or `{content: "..."}`
    TextObject(&'a str),
    Unrecognized,
}

/// Classify a payload. `allow_reparse` is true only for the outermost string.
pub fn classify(value: &Value, allow_reparse: bool) -> PayloadShape<'_> {
    match value {
        Value::String(s) => classify_string(s, allow_reparse),
        Value::Array(items) => PayloadShape::Blocks(items.as_slice()),
        Value::Object(map) => {
            let content = map.get("content");
            let type_tag = map.get("type").and_then(Value::as_str);

            if map.contains_key("model") && map.contains_key("role") {
                if let Some(content) = content {
                    return PayloadShape::ProviderResponse(content);
                }
            }

            if type_tag == Some("assistant") {
                if let Some(message) = map.get("message") {
                    return PayloadShape::CliEnvelope(message);
                }
            }

            if matches!(type_tag, Some("text") | Some("tool_use")) {
                return PayloadShape::Blocks(std::slice::from_ref(value));
            }

            // Other typed envelopes (system, user, result, thinking, ...)
            // carry nothing that belongs in the assistant transcript.
            if type_tag.is_some() {
                return PayloadShape::Unrecognized;
            }

            match content {
                Some(inner @ Value::Object(obj)) if obj.contains_key("content") => {
                    match obj.get("content") {
                        Some(c) if obj.contains_key("role") => PayloadShape::Wrapped(c),
                        _ => PayloadShape::Wrapped(inner),
                    }
                }
                Some(c @ Value::Array(_)) if map.contains_key("role") => PayloadShape::Wrapped(c),
                Some(Value::String(s)) => PayloadShape::TextObject(s),
                _ => match map.get("text") {
                    Some(Value::String(s)) => PayloadShape::TextObject(s),
                    _ => PayloadShape::Unrecognized,
                },
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => PayloadShape::Unrecognized,
    }
}

fn classify_string(s: &str, allow_reparse: bool) -> PayloadShape<'_> {
    let trimmed = s.trim_start();
    let looks_like_json = trimmed.starts_with('{') || trimmed.starts_with('[');
    if !looks_like_json || !allow_reparse {
        return PayloadShape::Plain(s);
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(decoded) => PayloadShape::Encoded(decoded),
        Err(_) => PayloadShape::Truncated,
    }
}

/// Extract plain text and tool calls from an `output` payload.
pub fn normalize(payload: &Value) -> Normalized {
    let mut out = Normalized::default();
    collect(payload, true, 0, &mut out);
    out
}

fn collect(value: &Value, allow_reparse: bool, depth: usize, out: &mut Normalized) {
    if depth > MAX_DEPTH {
        debug!(
            component = "normalizer",
            event = "normalizer.depth_exceeded",
            "Payload nesting too deep, ignoring remainder"
        );
        return;
    }

    match classify(value, allow_reparse) {
        PayloadShape::Plain(s) | PayloadShape::TextObject(s) => out.text.push_str(s),
        PayloadShape::Encoded(decoded) => collect(&decoded, false, depth + 1, out),
        PayloadShape::Truncated => {
            debug!(
                component = "normalizer",
                event = "normalizer.truncated_json",
                "Suppressing partial JSON payload"
            );
        }
        PayloadShape::Blocks(blocks) => {
            for block in blocks {
                collect_block(block, out);
            }
        }
        PayloadShape::ProviderResponse(content)
        | PayloadShape::Wrapped(content)
        | PayloadShape::CliEnvelope(content) => collect(content, false, depth + 1, out),
        PayloadShape::Unrecognized => {}
    }
}

fn collect_block(block: &Value, out: &mut Normalized) {
    match block.get("type").and_then(Value::as_str) {
        Some("text") => {
            if let Some(text) = block.get("text").and_then(Value::as_str) {
                out.text.push_str(text);
            }
        }
        Some("tool_use") => {
            let name = block
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            out.tools
                .push(ToolCommand::success(name, block.get("input").cloned()));
        }
        // thinking, tool_result, images: not part of text assembly
        _ => {}
    }
}
