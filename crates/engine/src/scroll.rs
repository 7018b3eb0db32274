//! Scroll tracking across transcript rebuilds.
//!
//! Mode switches and history merges rebuild the transcript, and the view may
//! need several layout passes before it is tall enough to show a captured
//! position again. The tracker turns each layout pass into a [`ScrollCommand`].

/// Distance from the bottom (in view units) still treated as "at the bottom".
pub const BOTTOM_THRESHOLD: u32 = 48;

pub const DEFAULT_MAX_RESTORE_ATTEMPTS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollCommand {
    None,
    ToBottom,
    RestoreTo(u32),
}

#[derive(Debug, Clone)]
pub struct ScrollTracker {
    stick_to_bottom: bool,
    pending_restore: Option<u32>,
    attempts: u32,
    max_restore_attempts: u32,
}

impl Default for ScrollTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESTORE_ATTEMPTS)
    }
}

impl ScrollTracker {
    pub fn new(max_restore_attempts: u32) -> Self {
        Self {
            stick_to_bottom: true,
            pending_restore: None,
            attempts: 0,
            max_restore_attempts: max_restore_attempts.max(1),
        }
    }

    pub fn sticks_to_bottom(&self) -> bool {
        self.stick_to_bottom
    }

    pub fn pending_restore(&self) -> Option<u32> {
        self.pending_restore
    }

    /// Remember `offset` so it can be restored once content is rebuilt.
    pub fn capture(&mut self, offset: u32) {
        self.pending_restore = Some(offset);
        self.stick_to_bottom = false;
        self.attempts = 0;
    }

    pub fn reset_to_bottom(&mut self) {
        self.pending_restore = None;
        self.stick_to_bottom = true;
        self.attempts = 0;
    }

    /// A user scroll cancels any pending restore.
    pub fn on_user_scroll(&mut self, offset: u32, content_height: u32, viewport_height: u32) {
        self.pending_restore = None;
        self.attempts = 0;
        let max_offset = content_height.saturating_sub(viewport_height);
        self.stick_to_bottom = max_offset.saturating_sub(offset) <= BOTTOM_THRESHOLD;
    }

    pub fn on_layout(&mut self, content_height: u32, viewport_height: u32) -> ScrollCommand {
        let Some(target) = self.pending_restore else {
            return if self.stick_to_bottom {
                ScrollCommand::ToBottom
            } else {
                ScrollCommand::None
            };
        };

        if content_height >= target.saturating_add(viewport_height) {
            self.pending_restore = None;
            self.attempts = 0;
            return ScrollCommand::RestoreTo(target);
        }

        self.attempts += 1;
        if self.attempts >= self.max_restore_attempts {
            self.pending_restore = None;
            self.attempts = 0;
            return ScrollCommand::RestoreTo(content_height.saturating_sub(viewport_height));
        }
        ScrollCommand::None
    }
}
