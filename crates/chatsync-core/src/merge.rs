//! Merge-by-id semantics of the message sink.
//!
//! Appends are a set union keyed on message id that preserves first-seen
//! order: stored messages are never reordered, replaced or removed, and a
//! resubmitted prefix is ignored. Both stores apply these rules so that
//! concurrent flushes of overlapping batches converge on the same result.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::model::{ChatSession, Message};

/// Result of a single-message append.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// The message was new and has been stored.
    Appended(Message),
    /// A message with the same id was already stored; it is returned as is.
    Existing(Message),
}

impl AppendOutcome {
    pub fn message(&self) -> &Message {
        match self {
            AppendOutcome::Appended(m) | AppendOutcome::Existing(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            AppendOutcome::Appended(m) | AppendOutcome::Existing(m) => m,
        }
    }

    pub fn was_appended(&self) -> bool {
        matches!(self, AppendOutcome::Appended(_))
    }
}

/// Result of a batch merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// How many messages of the batch were new.
    pub appended: usize,
    /// Stored message count after the merge.
    pub message_count: usize,
}

/// Filter `incoming` down to the messages whose id is neither in
/// `existing_ids` nor repeated earlier in the batch, keeping input order.
pub fn unseen<'a, I>(existing_ids: I, incoming: Vec<Message>) -> Vec<Message>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: HashSet<String> = existing_ids.into_iter().map(str::to_owned).collect();
    incoming
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect()
}

impl ChatSession {
    /// Append one message unless its id is already stored.
    pub fn append_message(&mut self, message: Message, now: DateTime<Utc>) -> AppendOutcome {
        if let Some(existing) = self.messages.iter().find(|m| m.id == message.id) {
            return AppendOutcome::Existing(existing.clone());
        }
        self.messages.push(message.clone());
        self.touch(now);
        AppendOutcome::Appended(message)
    }

    /// Union `incoming` into the stored messages by id.
    pub fn merge_messages(&mut self, incoming: Vec<Message>, now: DateTime<Utc>) -> MergeOutcome {
        let fresh = unseen(self.messages.iter().map(|m| m.id.as_str()), incoming);
        let appended = fresh.len();
        if appended > 0 {
            self.messages.extend(fresh);
            self.touch(now);
        }
        MergeOutcome {
            appended,
            message_count: self.message_count,
        }
    }

    /// Overwrite the message list (used when promoting onto an existing
    /// session). Duplicate ids in `messages` keep their first occurrence.
    pub fn replace_messages(&mut self, messages: Vec<Message>, now: DateTime<Utc>) {
        self.messages = unseen(std::iter::empty::<&str>(), messages);
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.message_count = self.messages.len();
        self.updated_at = now;
        self.refresh_title();
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SessionKind, DEFAULT_TITLE};
    use uuid::Uuid;

    fn session() -> ChatSession {
        ChatSession::new(Uuid::new_v4(), SessionKind::Ephemeral, None, Utc::now())
    }

    fn ids(s: &ChatSession) -> Vec<&str> {
        s.messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn appending_same_id_twice_keeps_one_copy() {
        let mut s = session();
        let first = Message::with_id("a", "user", "hi");
        assert!(s.append_message(first.clone(), Utc::now()).was_appended());

        let again = Message::with_id("a", "user", "edited");
        let outcome = s.append_message(again, Utc::now());
        assert!(!outcome.was_appended());
        assert_eq!(outcome.message().content, "hi");
        assert_eq!(s.message_count, 1);
    }

    #[test]
    fn batch_merge_is_a_union_by_id() {
        let mut s = session();
        s.merge_messages(
            vec![Message::with_id("m1", "user", "1"), Message::with_id("m2", "assistant", "2")],
            Utc::now(),
        );
        let outcome = s.merge_messages(
            vec![
                Message::with_id("m1", "user", "1"),
                Message::with_id("m2", "assistant", "2"),
                Message::with_id("m3", "user", "3"),
            ],
            Utc::now(),
        );
        assert_eq!(outcome, MergeOutcome { appended: 1, message_count: 3 });
        assert_eq!(ids(&s), ["m1", "m2", "m3"]);
    }

    #[test]
    fn duplicates_inside_a_batch_keep_first_occurrence() {
        let fresh = unseen(
            ["x"],
            vec![
                Message::with_id("b", "user", "first"),
                Message::with_id("x", "user", "stored"),
                Message::with_id("b", "user", "second"),
            ],
        );
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].content, "first");
    }

    #[test]
    fn empty_merge_does_not_touch_updated_at() {
        let mut s = session();
        let before = s.updated_at;
        let later = before + chrono::Duration::seconds(5);
        let outcome = s.merge_messages(Vec::new(), later);
        assert_eq!(outcome.appended, 0);
        assert_eq!(s.updated_at, before);
    }

    #[test]
    fn first_user_message_names_the_session() {
        let mut s = session();
        assert_eq!(s.title, DEFAULT_TITLE);
        s.merge_messages(
            vec![
                Message::with_id("s", "system", "be nice"),
                Message::with_id("u", "user", "plan a trip to Lisbon"),
            ],
            Utc::now(),
        );
        assert_eq!(s.title, "plan a trip to Lisbon");

        s.append_message(Message::with_id("u2", "user", "something else"), Utc::now());
        assert_eq!(s.title, "plan a trip to Lisbon");
    }

    #[test]
    fn replace_overwrites_and_recounts() {
        let mut s = session();
        s.merge_messages(vec![Message::with_id("old", "user", "x")], Utc::now());
        s.replace_messages(
            vec![Message::with_id("n1", "user", "a"), Message::with_id("n1", "user", "b")],
            Utc::now(),
        );
        assert_eq!(ids(&s), ["n1"]);
        assert_eq!(s.message_count, 1);
    }
}
