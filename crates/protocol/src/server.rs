//! Server → Client frames

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::*;

/// Frames sent from server to client over the session socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Agent output; `data` is decoded separately with [`OutputPayload::parse`]
    Output { data: Value },
    Status { status: SessionStatus },
    ApprovalRequired { data: ApprovalRequired },
    DiffPreview { data: DiffPreview },
    Error {
        #[serde(default)]
        message: String,
    },
}

impl ServerFrame {
    /// Top-level `type` values this client understands.
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "output",
        "status",
        "approval_required",
        "diff_preview",
        "error",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Output { .. } => "output",
            ServerFrame::Status { .. } => "status",
            ServerFrame::ApprovalRequired { .. } => "approval_required",
            ServerFrame::DiffPreview { .. } => "diff_preview",
            ServerFrame::Error { .. } => "error",
        }
    }
}

/// Body of an `approval_required` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequired {
    pub request_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default = "default_category")]
    pub category: ApprovalCategory,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_at: Option<DateTime<Utc>>,
}

fn default_category() -> ApprovalCategory {
    ApprovalCategory::RequiresApproval
}

/// Inner payload of an `output` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutputPayload {
    /// Whole-chunk legacy text; `content` may be any of the shapes the
    /// normalizer understands.
    Text {
        #[serde(default, alias = "text")]
        content: Value,
    },
    Message {
        #[serde(default, alias = "message")]
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    ToolUse {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Delta {
        message_id: String,
        #[serde(default)]
        text: String,
        #[serde(default)]
        offset: usize,
    },
    StreamingBuffer {
        message_id: String,
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<usize>,
    },
    UserMessageSaved {
        id: String,
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    ToolBlocked {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Result of decoding an `output` frame's `data`
#[derive(Debug)]
pub enum OutputDecode {
    Payload(OutputPayload),
    /// `data.type` missing or not one this client knows
    UnknownKind(Option<String>),
    Malformed(serde_json::Error),
}

impl OutputPayload {
    pub const KNOWN_KINDS: &'static [&'static str] = &[
        "text",
        "message",
        "tool_use",
        "delta",
        "streaming_buffer",
        "user_message_saved",
        "tool_blocked",
    ];

    pub fn parse(data: &Value) -> OutputDecode {
        let kind = data.get("type").and_then(Value::as_str);
        match kind {
            Some(k) if Self::KNOWN_KINDS.contains(&k) => {
                match serde_json::from_value::<OutputPayload>(data.clone()) {
                    Ok(payload) => OutputDecode::Payload(payload),
                    Err(e) => OutputDecode::Malformed(e),
                }
            }
            other => OutputDecode::UnknownKind(other.map(str::to_string)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutputPayload::Text { .. } => "text",
            OutputPayload::Message { .. } => "message",
            OutputPayload::ToolUse { .. } => "tool_use",
            OutputPayload::Delta { .. } => "delta",
            OutputPayload::StreamingBuffer { .. } => "streaming_buffer",
            OutputPayload::UserMessageSaved { .. } => "user_message_saved",
            OutputPayload::ToolBlocked { .. } => "tool_blocked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_approval_required_with_iso_deadline() {
        let json = r#"{
          "type":"approval_required",
          "data":{
            "requestId":"rq-1",
            "toolName":"Bash",
            "toolInput":{"command":"rm -rf target"},
            "category":"dangerous",
            "timeoutAt":"2026-03-01T12:00:30Z"
          }
        }"#;

        let parsed: ServerFrame = serde_json::from_str(json).expect("parse approval_required");
        match parsed {
            ServerFrame::ApprovalRequired { data } => {
                assert_eq!(data.request_id, "rq-1");
                assert_eq!(data.tool_name, "Bash");
                assert_eq!(data.category, ApprovalCategory::Dangerous);
                assert_eq!(data.tool_input["command"], "rm -rf target");
                assert!(data.timeout_at.is_some());
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn approval_required_tolerates_missing_category_and_deadline() {
        let parsed: ServerFrame = serde_json::from_value(json!({
            "type": "approval_required",
            "data": {"requestId": "rq-2", "toolName": "Edit"}
        }))
        .expect("parse");
        match parsed {
            ServerFrame::ApprovalRequired { data } => {
                assert_eq!(data.category, ApprovalCategory::RequiresApproval);
                assert!(data.timeout_at.is_none());
                assert!(data.tool_input.is_null());
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn deserializes_status_and_diff_preview() {
        let status: ServerFrame =
            serde_json::from_str(r#"{"type":"status","status":"cancelled"}"#).expect("status");
        assert_eq!(
            status,
            ServerFrame::Status {
                status: SessionStatus::Cancelled
            }
        );

        let diff: ServerFrame = serde_json::from_value(json!({
            "type": "diff_preview",
            "data": {"id": "d1", "filePath": "src/lib.rs", "operation": "write", "content": "fn main() {}"}
        }))
        .expect("diff_preview");
        match diff {
            ServerFrame::DiffPreview { data } => {
                assert_eq!(data.file_path, "src/lib.rs");
                assert_eq!(data.operation, DiffOperation::Write);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn parses_delta_and_streaming_buffer_payloads() {
        let delta = OutputPayload::parse(&json!({
            "type": "delta", "messageId": "m1", "text": "Hel", "offset": 0
        }));
        match delta {
            OutputDecode::Payload(OutputPayload::Delta {
                message_id,
                text,
                offset,
            }) => {
                assert_eq!(message_id, "m1");
                assert_eq!(text, "Hel");
                assert_eq!(offset, 0);
            }
            other => panic!("unexpected decode: {:?}", other),
        }

        let snapshot = OutputPayload::parse(&json!({
            "type": "streaming_buffer", "messageId": "m1", "content": "Hello wor"
        }));
        assert!(matches!(
            snapshot,
            OutputDecode::Payload(OutputPayload::StreamingBuffer { offset: None, .. })
        ));
    }

    #[test]
    fn text_payload_accepts_text_alias() {
        let decoded = OutputPayload::parse(&json!({"type": "text", "text": "hi"}));
        match decoded {
            OutputDecode::Payload(OutputPayload::Text { content }) => assert_eq!(content, "hi"),
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn unknown_and_malformed_output_kinds() {
        assert!(matches!(
            OutputPayload::parse(&json!({"type": "thinking", "text": "hmm"})),
            OutputDecode::UnknownKind(Some(ref k)) if k == "thinking"
        ));
        assert!(matches!(
            OutputPayload::parse(&json!({"text": "no type"})),
            OutputDecode::UnknownKind(None)
        ));
        assert!(matches!(
            OutputPayload::parse(&json!({"type": "delta", "text": "missing id"})),
            OutputDecode::Malformed(_)
        ));
    }

    #[test]
    fn tool_blocked_uses_camel_case_fields() {
        let decoded = OutputPayload::parse(&json!({
            "type": "tool_blocked", "toolName": "WebFetch", "reason": "denied by policy"
        }));
        match decoded {
            OutputDecode::Payload(OutputPayload::ToolBlocked {
                tool_name, reason, ..
            }) => {
                assert_eq!(tool_name, "WebFetch");
                assert_eq!(reason.as_deref(), Some("denied by policy"));
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }
}
