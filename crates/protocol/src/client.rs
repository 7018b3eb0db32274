//! Client → Server frames

use serde::{Deserialize, Serialize};

/// Frames sent from client to server over the session socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    UserInput {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        permission_mode: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        files: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disable_web_tools: Option<bool>,
    },
    Cancel,
    ApprovalResponse {
        request_id: String,
        approved: bool,
    },
}

impl ClientMessage {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::UserInput { .. } => "user_input",
            ClientMessage::Cancel => "cancel",
            ClientMessage::ApprovalResponse { .. } => "approval_response",
        }
    }
}
