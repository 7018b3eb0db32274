//! Dedup registry
//!
//! Decides whether a candidate message is already on screen. Server ids are
//! matched exactly; client-minted (`local-…`) ids fall back to matching on
//! role plus normalized content against persisted history.

use std::collections::HashSet;

use agentrelay_protocol::{is_local_id, ChatMessage, MessageRole};

/// Trim and collapse whitespace runs to a single space.
pub fn normalize_content(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub type ContentKey = (MessageRole, String);

pub fn content_key(message: &ChatMessage) -> ContentKey {
    (message.role, normalize_content(&message.content))
}

#[derive(Debug, Default, Clone)]
pub struct DedupRegistry {
    rendered: HashSet<String>,
    persisted: HashSet<ContentKey>,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_render(&self, message: &ChatMessage) -> bool {
        if self.rendered.contains(&message.id) {
            return false;
        }
        if is_local_id(&message.id) && self.persisted.contains(&content_key(message)) {
            return false;
        }
        true
    }

    pub fn mark_rendered(&mut self, id: impl Into<String>) {
        self.rendered.insert(id.into());
    }

    pub fn is_rendered(&self, id: &str) -> bool {
        self.rendered.contains(id)
    }

    /// Record persisted history: every id counts as rendered and every
    /// (role, content) pair becomes a fallback key for local ids.
    pub fn absorb_persisted(&mut self, messages: &[ChatMessage]) {
        for message in messages {
            self.rendered.insert(message.id.clone());
            self.persisted.insert(content_key(message));
        }
    }

    pub fn clear(&mut self) {
        self.rendered.clear();
        self.persisted.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty() && self.persisted.is_empty()
    }
}
