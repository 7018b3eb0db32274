//! Delta reassembler
//!
//! Accumulates streamed assistant text into the session's single in-flight
//! [`StreamingBuffer`]. Offset-addressed `delta` frames, whole-chunk legacy
//! `text`/`message` frames and `streaming_buffer` catch-up snapshots all land
//! here. Finalization turns the buffer into a terminal [`ChatMessage`].

use agentrelay_protocol::{is_local_id, new_local_id, ChatMessage, MessageRole, ToolCommand};
use tracing::{debug, warn};

/// Text being produced for one assistant message
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingBuffer {
    pub message_id: String,
    pub accumulated_text: String,
    /// Position just past the last accepted character, in chars
    pub last_offset: usize,
    pub tools: Vec<ToolCommand>,
}

impl StreamingBuffer {
    fn new(message_id: String) -> Self {
        Self {
            message_id,
            accumulated_text: String::new(),
            last_offset: 0,
            tools: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accumulated_text.is_empty() && self.tools.is_empty()
    }

    fn append(&mut self, text: &str) {
        self.accumulated_text.push_str(text);
        self.last_offset += text.chars().count();
    }

    fn into_message(self, timestamp: Option<String>) -> Option<ChatMessage> {
        if self.is_empty() {
            return None;
        }
        Some(ChatMessage {
            id: self.message_id,
            role: MessageRole::Assistant,
            content: self.accumulated_text,
            timestamp,
            commands: self.tools,
        })
    }
}

/// What a reassembler call produced
#[derive(Debug, Default, PartialEq)]
pub struct Reassembly {
    /// A previous buffer that had to be closed to make room
    pub finalized: Option<ChatMessage>,
    /// Whether the open buffer's visible content changed
    pub changed: bool,
}

/// Owns the (at most one) open streaming buffer for a session
#[derive(Debug, Default, Clone)]
pub struct DeltaReassembler {
    open: Option<StreamingBuffer>,
}

impl DeltaReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&StreamingBuffer> {
        self.open.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Called on `status: running`. Opens an ambient buffer if none is open;
    /// never opens a second one.
    pub fn ensure_open(&mut self) -> &StreamingBuffer {
        self.open
            .get_or_insert_with(|| StreamingBuffer::new(new_local_id()))
    }

    /// Apply an offset-addressed delta.
    pub fn apply_delta(&mut self, message_id: &str, text: &str, offset: usize) -> Reassembly {
        let mut result = Reassembly {
            finalized: self.switch_to(message_id),
            changed: false,
        };
        let buffer = self
            .open
            .get_or_insert_with(|| StreamingBuffer::new(message_id.to_string()));

        if offset == 0 && buffer.last_offset > 0 {
            debug!(
                component = "reassembler",
                event = "reassembler.delta.restart",
                message_id = %message_id,
                stale_len = buffer.last_offset,
                "Delta at offset 0 resets stale buffer"
            );
            buffer.accumulated_text.clear();
            buffer.last_offset = 0;
        }

        if offset < buffer.last_offset {
            // Redelivery: keep only the part we haven't seen yet.
            let overlap = buffer.last_offset - offset;
            let fresh: String = text.chars().skip(overlap).collect();
            if fresh.is_empty() {
                debug!(
                    component = "reassembler",
                    event = "reassembler.delta.duplicate",
                    message_id = %message_id,
                    offset = offset,
                    "Ignoring already-applied delta"
                );
                return result;
            }
            buffer.append(&fresh);
        } else {
            if offset > buffer.last_offset {
                warn!(
                    component = "reassembler",
                    event = "reassembler.delta.gap",
                    message_id = %message_id,
                    expected = buffer.last_offset,
                    offset = offset,
                    "Delta offset skips ahead; appending anyway"
                );
                buffer.last_offset = offset;
            }
            buffer.append(text);
        }

        result.changed = !text.is_empty();
        result
    }

    /// Append a whole-chunk legacy increment to the ambient buffer.
    pub fn append_chunk(&mut self, text: &str, message_id: Option<&str>) -> Reassembly {
        let buffer = self.open.get_or_insert_with(|| {
            StreamingBuffer::new(message_id.map(str::to_string).unwrap_or_else(new_local_id))
        });
        if let Some(id) = message_id {
            if buffer.is_empty() && buffer.message_id != id {
                buffer.message_id = id.to_string();
            }
        }
        buffer.append(text);
        Reassembly {
            finalized: None,
            changed: !text.is_empty(),
        }
    }

    /// Attach a tool invocation to the in-flight message.
    pub fn push_tool(&mut self, tool: ToolCommand) {
        self.open
            .get_or_insert_with(|| StreamingBuffer::new(new_local_id()))
            .tools
            .push(tool);
    }

    /// Replace the buffer with a catch-up snapshot after reconnect.
    pub fn replace_snapshot(
        &mut self,
        message_id: &str,
        content: &str,
        offset: Option<usize>,
    ) -> Reassembly {
        let finalized = self.switch_to(message_id);
        let buffer = self
            .open
            .get_or_insert_with(|| StreamingBuffer::new(message_id.to_string()));

        let len = content.chars().count();
        if let Some(reported) = offset {
            if reported != len {
                debug!(
                    component = "reassembler",
                    event = "reassembler.snapshot.offset_mismatch",
                    message_id = %message_id,
                    reported = reported,
                    content_len = len,
                    "Catch-up offset differs from content length; using content length"
                );
            }
        }
        buffer.accumulated_text = content.to_string();
        buffer.last_offset = len;

        Reassembly {
            finalized,
            changed: true,
        }
    }

    /// Close the open buffer. Returns a message when it held anything.
    pub fn finalize(&mut self, timestamp: Option<String>) -> Option<ChatMessage> {
        self.open.take().and_then(|b| b.into_message(timestamp))
    }

    /// Drop the open buffer without producing a message.
    pub fn clear(&mut self) {
        if let Some(buffer) = self.open.take() {
            debug!(
                component = "reassembler",
                event = "reassembler.cleared",
                message_id = %buffer.message_id,
                discarded_chars = buffer.last_offset,
                "Discarding in-flight buffer"
            );
        }
    }

    /// Prepare the open buffer for `message_id`: an empty or ambient-empty
    /// buffer is rebound, a populated buffer for another id is finalized.
    fn switch_to(&mut self, message_id: &str) -> Option<ChatMessage> {
        let buffer = self.open.as_mut()?;
        if buffer.message_id == message_id {
            return None;
        }
        if buffer.accumulated_text.is_empty() {
            // Tools gathered before the server named the message stay with it.
            if is_local_id(&buffer.message_id) || buffer.tools.is_empty() {
                buffer.message_id = message_id.to_string();
                buffer.last_offset = 0;
                return None;
            }
        }
        self.finalize(None)
    }
}
