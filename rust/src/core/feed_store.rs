// Ordered, deduplicated message list for one conversation.

use std::collections::HashSet;

use crate::state::{Message, MessageId};

#[derive(Debug, Default, Clone)]
pub struct FeedStore {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl FeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `messages` in order, skipping any id already present (including
    /// repeats within `messages`). Returns the indices actually filled.
    pub fn insert_at_end(&mut self, messages: Vec<Message>) -> Vec<usize> {
        let mut inserted = Vec::new();
        for m in messages {
            if !self.ids.insert(m.id.clone()) {
                continue;
            }
            inserted.push(self.messages.len());
            self.messages.push(m);
        }
        inserted
    }

    /// Prepends a historical page in the order received. Duplicates are dropped
    /// first; survivors keep their relative order. Returns `0..n` for the `n`
    /// messages that landed.
    pub fn insert_at_start(&mut self, messages: Vec<Message>) -> Vec<usize> {
        let mut page: Vec<Message> = Vec::with_capacity(messages.len());
        for m in messages {
            if self.ids.insert(m.id.clone()) {
                page.push(m);
            }
        }
        let n = page.len();
        if n > 0 {
            page.append(&mut self.messages);
            self.messages = page;
        }
        (0..n).collect()
    }

    /// `None` when the id is absent; the store is left untouched.
    pub fn remove_by_id(&mut self, id: &str) -> Option<usize> {
        if !self.ids.remove(id) {
            return None;
        }
        let index = self.messages.iter().position(|m| m.id == id)?;
        self.messages.remove(index);
        Some(index)
    }

    pub fn count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn message_at(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn find(&self, id: &str) -> Option<&Message> {
        if !self.ids.contains(id) {
            return None;
        }
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn first(&self) -> Option<&Message> {
        self.messages.first()
    }

    /// First position whose message was sent strictly after `timestamp`.
    pub fn index_of_message_sent_after(&self, timestamp: i64) -> Option<usize> {
        self.messages.iter().position(|m| m.timestamp > timestamp)
    }

    /// Last position whose message was sent strictly before `timestamp`.
    pub fn index_of_message_sent_before(&self, timestamp: i64) -> Option<usize> {
        self.messages.iter().rposition(|m| m.timestamp < timestamp)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::state::MessageBody;

    pub fn msg(id: &str, sender: &str, ts: i64) -> Message {
        Message {
            id: id.to_string(),
            sender_id: sender.to_string(),
            recipient_id: "peer".to_string(),
            body: MessageBody::text(format!("body of {id}")),
            timestamp: ts,
            reply: None,
        }
    }

    fn ids(store: &FeedStore) -> Vec<&str> {
        store.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn insert_at_end_skips_existing_ids() {
        let mut store = FeedStore::new();
        assert_eq!(
            store.insert_at_end(vec![msg("a", "me", 1), msg("b", "me", 2)]),
            vec![0, 1]
        );
        assert_eq!(
            store.insert_at_end(vec![msg("b", "me", 2), msg("c", "me", 3)]),
            vec![2]
        );
        assert_eq!(ids(&store), vec!["a", "b", "c"]);
    }

    #[test]
    fn insert_at_end_dedups_within_one_call() {
        let mut store = FeedStore::new();
        let inserted = store.insert_at_end(vec![msg("a", "me", 1), msg("a", "me", 1)]);
        assert_eq!(inserted, vec![0]);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn successive_prepends_stack_older_pages_first() {
        let mut store = FeedStore::new();
        store.insert_at_end(vec![msg("e1", "me", 100)]);
        // P1 then P2 (older), overlapping on "p1a".
        assert_eq!(
            store.insert_at_start(vec![msg("p1a", "me", 50), msg("p1b", "me", 60)]),
            vec![0, 1]
        );
        assert_eq!(
            store.insert_at_start(vec![
                msg("p2a", "me", 10),
                msg("p2b", "me", 20),
                msg("p1a", "me", 50),
            ]),
            vec![0, 1]
        );
        assert_eq!(ids(&store), vec!["p2a", "p2b", "p1a", "p1b", "e1"]);
    }

    #[test]
    fn prepend_of_only_duplicates_changes_nothing() {
        let mut store = FeedStore::new();
        store.insert_at_end(vec![msg("a", "me", 1)]);
        assert!(store.insert_at_start(vec![msg("a", "me", 1)]).is_empty());
        assert_eq!(ids(&store), vec!["a"]);
    }

    #[test]
    fn interleaved_inserts_keep_each_id_once() {
        let mut store = FeedStore::new();
        let pool: Vec<Message> = (0..10).map(|i| msg(&format!("m{i}"), "me", i)).collect();
        for round in 0..5usize {
            let slice: Vec<Message> = pool[round..round + 4].to_vec();
            if round % 2 == 0 {
                store.insert_at_start(slice);
            } else {
                store.insert_at_end(slice);
            }
        }
        let seen: HashSet<&str> = ids(&store).into_iter().collect();
        assert_eq!(seen.len(), store.count());
        assert_eq!(store.count(), 8);
    }

    #[test]
    fn remove_by_id_reports_position_then_not_found() {
        let mut store = FeedStore::new();
        store.insert_at_end(vec![msg("a", "me", 1), msg("b", "me", 2), msg("c", "me", 3)]);
        assert_eq!(store.remove_by_id("b"), Some(1));
        assert_eq!(ids(&store), vec!["a", "c"]);
        assert_eq!(store.remove_by_id("b"), None);
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn removed_id_can_be_inserted_again() {
        let mut store = FeedStore::new();
        store.insert_at_end(vec![msg("a", "me", 1)]);
        store.remove_by_id("a");
        assert_eq!(store.insert_at_end(vec![msg("a", "me", 1)]), vec![0]);
    }

    #[test]
    fn timestamp_lookups() {
        let mut store = FeedStore::new();
        store.insert_at_end(vec![msg("a", "me", 10), msg("b", "me", 20), msg("c", "me", 30)]);
        assert_eq!(store.index_of_message_sent_after(10), Some(1));
        assert_eq!(store.index_of_message_sent_after(30), None);
        assert_eq!(store.index_of_message_sent_before(30), Some(1));
        assert_eq!(store.index_of_message_sent_before(10), None);
        assert_eq!(store.message_at(2).map(|m| m.id.as_str()), Some("c"));
        assert!(store.message_at(3).is_none());
        assert_eq!(store.find("b").map(|m| m.timestamp), Some(20));
    }
}
