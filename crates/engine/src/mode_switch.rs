//! What each session mode keeps and what it throws away.

use agentrelay_protocol::SessionMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptPolicy {
    Clear,
    Keep,
    ReplaceWithCarried,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollPolicy {
    StickToBottom,
    CaptureAndRestore,
}

/// Clearing plan for a mode switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSwitchPlan {
    pub mode: SessionMode,
    pub clear_dedup: bool,
    pub clear_buffers: bool,
    pub transcript: TranscriptPolicy,
    /// Diff previews and approvals
    pub clear_side_state: bool,
    pub scroll: ScrollPolicy,
    /// Retry keeps refetching earlier sessions' history alongside the new one.
    pub extend_chain: bool,
}

impl ModeSwitchPlan {
    pub fn for_mode(mode: SessionMode) -> Self {
        match mode {
            SessionMode::Renew => Self {
                mode,
                clear_dedup: true,
                clear_buffers: true,
                transcript: TranscriptPolicy::Clear,
                clear_side_state: true,
                scroll: ScrollPolicy::StickToBottom,
                extend_chain: false,
            },
            SessionMode::Retry => Self {
                mode,
                clear_dedup: false,
                clear_buffers: true,
                transcript: TranscriptPolicy::Keep,
                clear_side_state: false,
                scroll: ScrollPolicy::CaptureAndRestore,
                extend_chain: true,
            },
            SessionMode::Fork => Self {
                mode,
                clear_dedup: true,
                clear_buffers: true,
                transcript: TranscriptPolicy::ReplaceWithCarried,
                clear_side_state: true,
                scroll: ScrollPolicy::StickToBottom,
                extend_chain: false,
            },
        }
    }
}

/// Sessions whose history belongs to the current view, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionChain {
    ids: Vec<String>,
}

impl SessionChain {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn latest(&self) -> Option<&str> {
        self.ids.last().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Record the session a mode switch produced.
    pub fn advance(&mut self, plan: &ModeSwitchPlan, session_id: impl Into<String>) {
        let session_id = session_id.into();
        if !plan.extend_chain {
            self.ids.clear();
        }
        if !self.ids.contains(&session_id) {
            self.ids.push(session_id);
        }
    }

    /// Attach to an existing session without a mode switch.
    pub fn attach(&mut self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        if !self.ids.contains(&session_id) {
            self.ids.push(session_id);
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_preserves_what_renew_clears() {
        let renew = ModeSwitchPlan::for_mode(SessionMode::Renew);
        let retry = ModeSwitchPlan::for_mode(SessionMode::Retry);
        assert!(renew.clear_dedup && !retry.clear_dedup);
        assert_eq!(renew.transcript, TranscriptPolicy::Clear);
        assert_eq!(retry.transcript, TranscriptPolicy::Keep);
        assert!(renew.clear_buffers && retry.clear_buffers);
        assert_eq!(retry.scroll, ScrollPolicy::CaptureAndRestore);
    }

    #[test]
    fn fork_replaces_with_carried_context() {
        let fork = ModeSwitchPlan::for_mode(SessionMode::Fork);
        assert_eq!(fork.transcript, TranscriptPolicy::ReplaceWithCarried);
        assert!(fork.clear_side_state);
        assert_eq!(fork.scroll, ScrollPolicy::StickToBottom);
    }

    #[test]
    fn chain_follows_mode() {
        let mut chain = SessionChain::default();
        chain.attach("s1");
        chain.advance(&ModeSwitchPlan::for_mode(SessionMode::Retry), "s2");
        assert_eq!(chain.ids(), ["s1", "s2"]);

        chain.advance(&ModeSwitchPlan::for_mode(SessionMode::Renew), "s3");
        assert_eq!(chain.ids(), ["s3"]);

        chain.advance(&ModeSwitchPlan::for_mode(SessionMode::Retry), "s4");
        chain.advance(&ModeSwitchPlan::for_mode(SessionMode::Fork), "s5");
        assert_eq!(chain.latest(), Some("s5"));
        assert_eq!(chain.ids().len(), 1);
    }
}
