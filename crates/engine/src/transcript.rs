//! Transcript
//!
//! The ordered, deduplicated message list a user sees. Entries remember where
//! they came from so a history refetch can tell which live entries it
//! supersedes.

use std::collections::{HashMap, HashSet};

use agentrelay_protocol::{is_local_id, new_local_id, ChatMessage, MessageRole};
use tracing::debug;

use crate::dedup::{content_key, normalize_content, ContentKey, DedupRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    /// Context carried into a forked session
    Carried,
    /// Fetched from the history endpoint
    Persisted,
    /// Arrived over the socket
    Live,
    /// Optimistic local insert awaiting server confirmation
    Provisional,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub message: ChatMessage,
    pub origin: EntryOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveOutcome {
    Rendered,
    /// A provisional entry was swapped for the confirmed message in place
    Replaced { provisional_id: String },
    /// A live entry with the same id was rewritten with newer content
    Updated,
    Suppressed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub persisted: usize,
    pub kept_live: usize,
    pub dropped_live: usize,
}

#[derive(Debug, Default, Clone)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&TranscriptEntry> {
        self.entries.iter().find(|e| e.message.id == id)
    }

    /// Insert the user's message before the server has seen it.
    pub fn insert_provisional(&mut self, content: impl Into<String>) -> ChatMessage {
        let message = ChatMessage::user(new_local_id(), content);
        self.entries.push(TranscriptEntry {
            message: message.clone(),
            origin: EntryOrigin::Provisional,
        });
        message
    }

    /// Add a message that arrived over the socket.
    pub fn push_live(&mut self, message: ChatMessage, registry: &mut DedupRegistry) -> LiveOutcome {
        if registry.is_rendered(&message.id) {
            return if self.update_live(&message) {
                LiveOutcome::Updated
            } else {
                LiveOutcome::Suppressed
            };
        }

        if message.role == MessageRole::User && !is_local_id(&message.id) {
            if let Some(provisional_id) = self.replace_provisional(&message) {
                registry.mark_rendered(message.id);
                return LiveOutcome::Replaced { provisional_id };
            }
        }

        if !registry.should_render(&message) {
            return LiveOutcome::Suppressed;
        }

        registry.mark_rendered(message.id.clone());
        self.entries.push(TranscriptEntry {
            message,
            origin: EntryOrigin::Live,
        });
        LiveOutcome::Rendered
    }

    /// Handle `user_message_saved`.
    pub fn confirm_user_message(
        &mut self,
        id: impl Into<String>,
        content: impl Into<String>,
        timestamp: Option<String>,
        registry: &mut DedupRegistry,
    ) -> LiveOutcome {
        let mut message = ChatMessage::user(id, content);
        message.timestamp = timestamp;
        self.push_live(message, registry)
    }

    /// A message flushed early (disconnect, cancel) can be finished later
    /// under the same id. Persisted entries are never rewritten.
    fn update_live(&mut self, message: &ChatMessage) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.origin == EntryOrigin::Live && e.message.id == message.id)
        else {
            return false;
        };
        if entry.message.content == message.content && entry.message.commands == message.commands
        {
            return false;
        }
        entry.message = message.clone();
        true
    }

    fn replace_provisional(&mut self, confirmed: &ChatMessage) -> Option<String> {
        let wanted = normalize_content(&confirmed.content);
        let entry = self.entries.iter_mut().find(|e| {
            e.origin == EntryOrigin::Provisional
                && e.message.role == confirmed.role
                && normalize_content(&e.message.content) == wanted
        })?;
        let provisional_id = std::mem::replace(&mut entry.message, confirmed.clone()).id;
        entry.origin = EntryOrigin::Live;
        Some(provisional_id)
    }

    /// Rebuild the list around freshly fetched history.
    ///
    /// Order: carried context, then history (first occurrence of each id),
    /// then whatever live or provisional entries history has not yet caught
    /// up with.
    pub fn merge_persisted(
        &mut self,
        history: Vec<ChatMessage>,
        registry: &mut DedupRegistry,
    ) -> MergeSummary {
        let previous = std::mem::take(&mut self.entries);

        let carried_ids: HashSet<String> = previous
            .iter()
            .filter(|e| e.origin == EntryOrigin::Carried)
            .map(|e| e.message.id.clone())
            .collect();
        // Ids already on screen before this merge; their history rows have
        // been matched against earlier and can't absorb another local entry.
        let known_ids: HashSet<String> = previous
            .iter()
            .filter(|e| !is_local_id(&e.message.id))
            .map(|e| e.message.id.clone())
            .collect();

        let mut history_ids = HashSet::new();
        let mut persisted = Vec::with_capacity(history.len());
        for message in history {
            if carried_ids.contains(&message.id) || !history_ids.insert(message.id.clone()) {
                continue;
            }
            persisted.push(message);
        }
        registry.absorb_persisted(&persisted);

        let mut unclaimed: HashMap<ContentKey, usize> = HashMap::new();
        for message in persisted.iter().filter(|m| !known_ids.contains(&m.id)) {
            *unclaimed.entry(content_key(message)).or_default() += 1;
        }

        let mut summary = MergeSummary {
            persisted: persisted.len(),
            ..MergeSummary::default()
        };

        let mut carried = Vec::new();
        let mut live = Vec::new();
        for entry in previous {
            match entry.origin {
                EntryOrigin::Carried => carried.push(entry),
                EntryOrigin::Persisted => {}
                EntryOrigin::Live | EntryOrigin::Provisional => {
                    if history_ids.contains(&entry.message.id) {
                        summary.dropped_live += 1;
                        continue;
                    }
                    if is_local_id(&entry.message.id) {
                        if let Some(count) = unclaimed.get_mut(&content_key(&entry.message)) {
                            if *count > 0 {
                                *count -= 1;
                                summary.dropped_live += 1;
                                continue;
                            }
                        }
                    }
                    live.push(entry);
                }
            }
        }
        summary.kept_live = live.len();

        self.entries = carried;
        self.entries.extend(persisted.into_iter().map(|message| TranscriptEntry {
            message,
            origin: EntryOrigin::Persisted,
        }));
        self.entries.extend(live);

        debug!(
            component = "transcript",
            event = "transcript.merged",
            persisted = summary.persisted,
            kept_live = summary.kept_live,
            dropped_live = summary.dropped_live,
            total = self.entries.len(),
            "Merged persisted history"
        );
        summary
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Replace the transcript with context carried into a fork.
    pub fn seed_carried(&mut self, messages: Vec<ChatMessage>, registry: &mut DedupRegistry) {
        self.entries.clear();
        for message in messages {
            registry.mark_rendered(message.id.clone());
            self.entries.push(TranscriptEntry {
                message,
                origin: EntryOrigin::Carried,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(t: &Transcript) -> Vec<&str> {
        t.messages().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn persisted_then_live_same_id_renders_once() {
        let mut reg = DedupRegistry::new();
        let mut t = Transcript::new();
        t.merge_persisted(vec![ChatMessage::assistant("m1", "Hello")], &mut reg);
        let outcome = t.push_live(ChatMessage::assistant("m1", "Hello"), &mut reg);
        assert_eq!(outcome, LiveOutcome::Suppressed);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn live_entry_is_rewritten_when_finished_later() {
        let mut reg = DedupRegistry::new();
        let mut t = Transcript::new();
        t.push_live(ChatMessage::assistant("a0", "before"), &mut reg);
        t.push_live(ChatMessage::assistant("m1", "Wor"), &mut reg);
        t.push_live(ChatMessage::user("u2", "after"), &mut reg);

        let outcome = t.push_live(ChatMessage::assistant("m1", "World!"), &mut reg);
        assert_eq!(outcome, LiveOutcome::Updated);
        assert_eq!(ids(&t), vec!["a0", "m1", "u2"]);
        assert_eq!(t.get("m1").unwrap().message.content, "World!");

        let again = t.push_live(ChatMessage::assistant("m1", "World!"), &mut reg);
        assert_eq!(again, LiveOutcome::Suppressed);
    }

    #[test]
    fn persisted_entry_is_not_rewritten_by_live() {
        let mut reg = DedupRegistry::new();
        let mut t = Transcript::new();
        t.merge_persisted(vec![ChatMessage::assistant("m1", "Hello")], &mut reg);
        let outcome = t.push_live(ChatMessage::assistant("m1", "Hel"), &mut reg);
        assert_eq!(outcome, LiveOutcome::Suppressed);
        assert_eq!(t.get("m1").unwrap().message.content, "Hello");
    }

    #[test]
    fn live_then_persisted_same_id_renders_once() {
        let mut reg = DedupRegistry::new();
        let mut t = Transcript::new();
        t.push_live(ChatMessage::assistant("m1", "Hello"), &mut reg);
        t.merge_persisted(vec![ChatMessage::assistant("m1", "Hello")], &mut reg);
        assert_eq!(ids(&t), vec!["m1"]);
        assert_eq!(t.entries()[0].origin, EntryOrigin::Persisted);
    }

    #[test]
    fn repeated_merges_are_idempotent() {
        let mut reg = DedupRegistry::new();
        let mut t = Transcript::new();
        let history = vec![
            ChatMessage::user("u1", "hi"),
            ChatMessage::assistant("a1", "hello"),
        ];
        t.merge_persisted(history.clone(), &mut reg);
        t.merge_persisted(history.clone(), &mut reg);
        t.merge_persisted(history, &mut reg);
        assert_eq!(ids(&t), vec!["u1", "a1"]);
    }

    #[test]
    fn duplicate_ids_within_history_collapse() {
        let mut reg = DedupRegistry::new();
        let mut t = Transcript::new();
        let summary = t.merge_persisted(
            vec![
                ChatMessage::user("u1", "hi"),
                ChatMessage::user("u1", "hi"),
            ],
            &mut reg,
        );
        assert_eq!(summary.persisted, 1);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn provisional_is_replaced_in_place_on_confirmation() {
        let mut reg = DedupRegistry::new();
        let mut t = Transcript::new();
        t.push_live(ChatMessage::assistant("a0", "earlier"), &mut reg);
        let provisional = t.insert_provisional("run the tests");
        t.push_live(ChatMessage::assistant("a1", "later"), &mut reg);

        let outcome = t.confirm_user_message("u9", "run the tests", None, &mut reg);
        assert_eq!(
            outcome,
            LiveOutcome::Replaced {
                provisional_id: provisional.id
            }
        );
        assert_eq!(ids(&t), vec!["a0", "u9", "a1"]);
        assert_eq!(t.entries()[1].origin, EntryOrigin::Live);

        // A second confirmation for the same id is a no-op
        let again = t.confirm_user_message("u9", "run the tests", None, &mut reg);
        assert_eq!(again, LiveOutcome::Suppressed);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn provisional_absorbed_by_history_content() {
        let mut reg = DedupRegistry::new();
        let mut t = Transcript::new();
        t.insert_provisional("fix  the bug");
        t.merge_persisted(vec![ChatMessage::user("u1", "fix the bug")], &mut reg);
        assert_eq!(ids(&t), vec!["u1"]);
    }

    #[test]
    fn one_persisted_row_absorbs_one_local_entry() {
        let mut reg = DedupRegistry::new();
        let mut t = Transcript::new();
        t.insert_provisional("yes");
        t.insert_provisional("yes");
        let summary = t.merge_persisted(vec![ChatMessage::user("u1", "yes")], &mut reg);
        assert_eq!(summary.dropped_live, 1);
        assert_eq!(summary.kept_live, 1);
        assert_eq!(t.len(), 2);
        assert_eq!(t.entries()[0].message.id, "u1");
        assert_eq!(t.entries()[1].origin, EntryOrigin::Provisional);
    }

    #[test]
    fn old_history_rows_do_not_absorb_new_local_entries() {
        let mut reg = DedupRegistry::new();
        let mut t = Transcript::new();
        t.merge_persisted(vec![ChatMessage::user("u1", "yes")], &mut reg);
        t.insert_provisional("yes");
        t.merge_persisted(vec![ChatMessage::user("u1", "yes")], &mut reg);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn carried_entries_stay_first() {
        let mut reg = DedupRegistry::new();
        let mut t = Transcript::new();
        t.seed_carried(
            vec![
                ChatMessage::user("c1", "original question"),
                ChatMessage::assistant("c2", "original answer"),
            ],
            &mut reg,
        );
        t.insert_provisional("follow up");
        t.merge_persisted(
            vec![
                ChatMessage::user("c1", "original question"),
                ChatMessage::user("n1", "follow up"),
            ],
            &mut reg,
        );
        assert_eq!(ids(&t), vec!["c1", "c2", "n1"]);
        assert_eq!(t.entries()[0].origin, EntryOrigin::Carried);
    }

    #[test]
    fn unconfirmed_live_entries_survive_merge() {
        let mut reg = DedupRegistry::new();
        let mut t = Transcript::new();
        t.push_live(ChatMessage::assistant("a2", "streamed"), &mut reg);
        t.merge_persisted(vec![ChatMessage::user("u1", "q")], &mut reg);
        assert_eq!(ids(&t), vec!["u1", "a2"]);
    }
}
