//! Terminal rendering for session events, history and approvals.

use agentrelay_engine::{ConnectionState, SessionEvent};
use agentrelay_protocol::{
    ApprovalRequest, ApprovalStatus, ChatMessage, DiffOperation, MessageRole, SessionStatus,
    ToolStatus,
};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use console::style;

const PREVIEW_CHARS: usize = 80;

/// Turns engine events into terminal text. Streaming text is printed
/// incrementally, so the renderer remembers how much of the open buffer is
/// already on screen.
#[derive(Debug, Default)]
pub struct Renderer {
    streaming_id: Option<String>,
    printed_chars: usize,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to write for `event`; may end mid-line while streaming.
    pub fn render(&mut self, event: &SessionEvent) -> String {
        match event {
            SessionEvent::StreamingUpdated { message_id, text } => {
                self.stream(message_id, text)
            }
            SessionEvent::MessageRendered(message) | SessionEvent::MessageUpdated(message) => {
                if self.streaming_id.as_deref() == Some(message.id.as_str()) {
                    let mut out = self.stream(&message.id, &message.content);
                    self.streaming_id = None;
                    self.printed_chars = 0;
                    out.push('\n');
                    out.push_str(&tool_lines(message));
                    return out;
                }
                let mut out = self.break_stream();
                out.push_str(&message_block(message));
                out
            }
            SessionEvent::MessageReplaced { .. } => String::new(),
            SessionEvent::StatusChanged(status) => {
                self.line(style(format!("· {}", status_label(*status))).dim().to_string())
            }
            SessionEvent::ApprovalRequested(request) => self.line(approval_prompt(request)),
            SessionEvent::ApprovalResolved(request) => self.line(approval_outcome(request)),
            SessionEvent::DiffPreview(diff) => {
                let op = match diff.operation {
                    DiffOperation::Edit => "edit",
                    DiffOperation::Write => "write",
                    DiffOperation::Delete => "delete",
                };
                self.line(format!("{} {} {}", style("±").cyan(), op, diff.file_path))
            }
            SessionEvent::Error { message } => {
                self.line(format!("{} {}", style("error:").red().bold(), message))
            }
            SessionEvent::ConnectionChanged(status) => {
                let label = match status.state {
                    ConnectionState::Disconnected => "disconnected",
                    ConnectionState::Connecting => "connecting",
                    ConnectionState::Connected => "connected",
                    ConnectionState::Error => "connection error",
                };
                let mut text = format!("· {}", label);
                if let Some(error) = &status.error {
                    text.push_str(&format!(" ({})", error));
                }
                self.line(style(text).dim().to_string())
            }
            SessionEvent::HistoryMerged { total, .. } => self.line(
                style(format!("· history synced ({} messages)", total))
                    .dim()
                    .to_string(),
            ),
            SessionEvent::StartFailed {
                message,
                git_init_required,
            } => {
                let mut text = format!("{} {}", style("start failed:").red().bold(), message);
                if *git_init_required {
                    text.push_str(&format!(
                        "\n{}",
                        style("  initialize a git repository in the task workspace, then retry")
                            .yellow()
                    ));
                }
                self.line(text)
            }
            SessionEvent::TranscriptReset { mode } => self.line(
                style(format!("──── new session ({}) ────", mode))
                    .bold()
                    .to_string(),
            ),
        }
    }

    fn stream(&mut self, message_id: &str, text: &str) -> String {
        let mut out = String::new();
        if self.streaming_id.as_deref() != Some(message_id) {
            if text.is_empty() {
                return out;
            }
            out.push_str(&self.break_stream());
            out.push_str(&format!("{} ", role_label(MessageRole::Assistant)));
            self.streaming_id = Some(message_id.to_string());
            self.printed_chars = 0;
        }

        let total = text.chars().count();
        if total < self.printed_chars {
            // Snapshot shorter than what is on screen; reprint it whole.
            out.push_str(&format!("\n{} ", role_label(MessageRole::Assistant)));
            out.push_str(text);
        } else {
            out.extend(text.chars().skip(self.printed_chars));
        }
        self.printed_chars = total;
        out
    }

    /// Close an unfinished streaming line before other output.
    fn break_stream(&mut self) -> String {
        if self.streaming_id.take().is_some() && self.printed_chars > 0 {
            self.printed_chars = 0;
            return "\n".to_string();
        }
        self.printed_chars = 0;
        String::new()
    }

    fn line(&mut self, text: String) -> String {
        let mut out = self.break_stream();
        out.push_str(&text);
        out.push('\n');
        out
    }
}

fn role_label(role: MessageRole) -> String {
    match role {
        MessageRole::User => style("you ›").green().bold().to_string(),
        MessageRole::Assistant => style("agent ›").magenta().bold().to_string(),
    }
}

fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Queued => "queued",
        SessionStatus::Running => "running",
        SessionStatus::Paused => "paused",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
        SessionStatus::Cancelled => "cancelled",
    }
}

fn tool_lines(message: &ChatMessage) -> String {
    message
        .commands
        .iter()
        .map(|command| {
            let mark = match command.status {
                ToolStatus::Success => style("✓").green(),
                ToolStatus::Error => style("✗").red(),
            };
            format!("  {} {}\n", mark, style(&command.name).dim())
        })
        .collect()
}

/// A complete message with its tool lines.
pub fn message_block(message: &ChatMessage) -> String {
    format!(
        "{} {}\n{}",
        role_label(message.role),
        message.content,
        tool_lines(message)
    )
}

fn approval_prompt(request: &ApprovalRequest) -> String {
    format!(
        "{} {} wants to run {} {}\n  {} /approve {}  or  /deny {} (expires {})",
        style("approval").yellow().bold(),
        style(&request.id).dim(),
        style(&request.tool_name).bold(),
        preview(&request.tool_input.to_string()),
        style("›").yellow(),
        request.id,
        request.id,
        request.timeout_at.format("%H:%M:%S"),
    )
}

fn approval_outcome(request: &ApprovalRequest) -> String {
    let verdict = match request.status {
        ApprovalStatus::Approved => style("approved").green(),
        ApprovalStatus::Rejected => style("denied").red(),
        ApprovalStatus::Pending => style("pending").yellow(),
    };
    match &request.decided_by {
        Some(by) => format!("· {} {} by {}", request.tool_name, verdict, by),
        None => format!("· {} {}", request.tool_name, verdict),
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

pub fn history_table(messages: &[ChatMessage]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Time", "Role", "Content", "Tools"]);
    for message in messages {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        let tools = message
            .commands
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            message.timestamp.clone().unwrap_or_default(),
            role.to_string(),
            message.content.clone(),
            tools,
        ]);
    }
    table
}

pub fn approvals_table(requests: &[ApprovalRequest]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Id", "Tool", "Category", "Input", "Expires"]);
    for request in requests {
        let category = serde_json::to_value(request.category)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        table.add_row(vec![
            request.id.clone(),
            request.tool_name.clone(),
            category,
            preview(&request.tool_input.to_string()),
            request.timeout_at.to_rfc3339(),
        ]);
    }
    table
}
