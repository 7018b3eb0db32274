//! Frame decoder: raw socket text → [`ServerFrame`].
//!
//! Never fails loudly. Bad JSON, unknown frame types and malformed bodies are
//! logged and discarded so a misbehaving agent process can't take down the
//! transcript.

use agentrelay_protocol::ServerFrame;
use serde_json::Value;
use tracing::{debug, warn};

const PREVIEW_CHARS: usize = 200;

/// Decode one text frame. Returns `None` for anything that should be dropped.
pub fn decode_frame(raw: &str) -> Option<ServerFrame> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            warn!(
                component = "decoder",
                event = "decoder.frame.parse_error",
                error = %e,
                frame_preview = %preview(trimmed),
                "Failed to parse frame JSON"
            );
            return None;
        }
    };

    let frame_type = match value.get("type").and_then(Value::as_str) {
        Some(t) => t,
        None => {
            warn!(
                component = "decoder",
                event = "decoder.frame.missing_type",
                frame_preview = %preview(trimmed),
                "Frame has no type field"
            );
            return None;
        }
    };

    if !ServerFrame::KNOWN_TYPES.contains(&frame_type) {
        debug!(
            component = "decoder",
            event = "decoder.frame.unknown_type",
            frame_type = %frame_type,
            "Ignoring unknown frame type"
        );
        return None;
    }

    let frame_type = frame_type.to_string();
    match serde_json::from_value::<ServerFrame>(value) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(
                component = "decoder",
                event = "decoder.frame.malformed",
                frame_type = %frame_type,
                error = %e,
                frame_preview = %preview(trimmed),
                "Dropping malformed frame"
            );
            None
        }
    }
}

fn preview(raw: &str) -> &str {
    match raw.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrelay_protocol::SessionStatus;

    #[test]
    fn decodes_known_frames() {
        let frame = decode_frame(r#"{"type":"status","status":"running"}"#);
        assert_eq!(
            frame,
            Some(ServerFrame::Status {
                status: SessionStatus::Running
            })
        );

        let frame = decode_frame(r#"{"type":"error","message":"agent crashed"}"#);
        assert_eq!(
            frame,
            Some(ServerFrame::Error {
                message: "agent crashed".to_string()
            })
        );
    }

    #[test]
    fn output_frames_keep_raw_data() {
        let frame = decode_frame(r#"{"type":"output","data":{"type":"text","content":"hi"}}"#)
            .expect("output frame");
        match frame {
            ServerFrame::Output { data } => assert_eq!(data["content"], "hi"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn invalid_json_is_dropped() {
        assert!(decode_frame(r#"{"type":"output","data":{"type":"te"#).is_none());
        assert!(decode_frame("not json at all").is_none());
        assert!(decode_frame("   ").is_none());
    }

    #[test]
    fn unknown_and_untyped_frames_are_dropped() {
        assert!(decode_frame(r#"{"type":"heartbeat","ts":1}"#).is_none());
        assert!(decode_frame(r#"{"status":"running"}"#).is_none());
        assert!(decode_frame(r#"[1,2,3]"#).is_none());
    }

    #[test]
    fn malformed_known_frames_are_dropped() {
        assert!(decode_frame(r#"{"type":"status","status":"sleeping"}"#).is_none());
        assert!(decode_frame(r#"{"type":"approval_required","data":{}}"#).is_none());
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        assert_eq!(preview(&long).chars().count(), PREVIEW_CHARS);
        assert_eq!(preview("short"), "short");
    }
}
