// In-process event source: history with tombstones, cursor paging, live fan-out.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use flume::{Receiver, Sender};

use super::EventSource;
use crate::error::SourceError;
use crate::state::{Message, MessageId, TypingStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub conversation_id: String,
    pub before: Option<MessageId>,
    pub page_size: u32,
}

#[derive(Debug)]
struct Entry {
    message: Message,
    // Removed entries stay so a cursor pointing at them still resolves.
    removed: bool,
}

#[derive(Default)]
struct Inner {
    history: HashMap<String, Vec<Entry>>,
    added_subs: HashMap<String, Vec<Sender<Message>>>,
    removed_subs: HashMap<String, Vec<Sender<MessageId>>>,
    typing_subs: HashMap<String, Vec<Sender<TypingStatus>>>,
    typing: HashMap<String, HashMap<String, bool>>,
    fetch_failures: VecDeque<SourceError>,
    subscribe_failures: VecDeque<SourceError>,
    send_failures: VecDeque<SourceError>,
    fetch_calls: Vec<FetchCall>,
    unsubscribe_calls: HashMap<String, usize>,
}

#[derive(Default)]
pub struct InMemoryEventSource {
    inner: Mutex<Inner>,
}

impl InMemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    /// Appends history without notifying subscribers. Creates the conversation
    /// if needed, so seeding an empty vec declares an empty conversation.
    pub fn seed(&self, conversation_id: &str, messages: Vec<Message>) {
        let mut inner = self.lock();
        let history = inner
            .history
            .entry(conversation_id.to_string())
            .or_default();
        history.extend(messages.into_iter().map(|message| Entry {
            message,
            removed: false,
        }));
    }

    /// Appends to history and pushes to every live subscriber.
    pub fn push_message(&self, conversation_id: &str, message: Message) {
        let mut inner = self.lock();
        inner
            .history
            .entry(conversation_id.to_string())
            .or_default()
            .push(Entry {
                message: message.clone(),
                removed: false,
            });
        if let Some(subs) = inner.added_subs.get_mut(conversation_id) {
            subs.retain(|tx| tx.send(message.clone()).is_ok());
        }
    }

    /// Re-delivers an already pushed message, as an at-least-once backend may.
    pub fn redeliver(&self, conversation_id: &str, message: Message) {
        let mut inner = self.lock();
        if let Some(subs) = inner.added_subs.get_mut(conversation_id) {
            subs.retain(|tx| tx.send(message.clone()).is_ok());
        }
    }

    /// Tombstones a message and notifies removal subscribers. Returns whether
    /// a live entry was found.
    pub fn remove_message(&self, conversation_id: &str, message_id: &str) -> bool {
        let mut inner = self.lock();
        let found = inner
            .history
            .get_mut(conversation_id)
            .and_then(|h| {
                h.iter_mut()
                    .find(|e| !e.removed && e.message.id == message_id)
            })
            .map(|e| e.removed = true)
            .is_some();
        if let Some(subs) = inner.removed_subs.get_mut(conversation_id) {
            subs.retain(|tx| tx.send(message_id.to_string()).is_ok());
        }
        found
    }

    pub fn fail_next_fetch(&self, err: SourceError) {
        self.lock().fetch_failures.push_back(err);
    }

    pub fn fail_next_send(&self, err: SourceError) {
        self.lock().send_failures.push_back(err);
    }

    /// The next `subscribe_added` call fails with `err`.
    pub fn fail_next_subscribe(&self, err: SourceError) {
        self.lock().subscribe_failures.push_back(err);
    }

    /// Publishes a typing change as another participant would.
    pub fn push_typing(&self, conversation_id: &str, status: TypingStatus) {
        let mut inner = self.lock();
        inner
            .typing
            .entry(conversation_id.to_string())
            .or_default()
            .insert(status.user_id.clone(), status.is_typing);
        if let Some(subs) = inner.typing_subs.get_mut(conversation_id) {
            subs.retain(|tx| tx.send(status.clone()).is_ok());
        }
    }

    /// Last published typing state of `user_id`.
    pub fn is_typing(&self, conversation_id: &str, user_id: &str) -> bool {
        self.lock()
            .typing
            .get(conversation_id)
            .and_then(|t| t.get(user_id))
            .copied()
            .unwrap_or(false)
    }

    pub fn fetch_calls(&self) -> Vec<FetchCall> {
        self.lock().fetch_calls.clone()
    }

    pub fn unsubscribe_count(&self, conversation_id: &str) -> usize {
        *self.lock().unsubscribe_calls.get(conversation_id).unwrap_or(&0)
    }

    pub fn is_subscribed(&self, conversation_id: &str) -> bool {
        let inner = self.lock();
        inner
            .added_subs
            .get(conversation_id)
            .is_some_and(|s| !s.is_empty())
            || inner
                .removed_subs
                .get(conversation_id)
                .is_some_and(|s| !s.is_empty())
            || inner
                .typing_subs
                .get(conversation_id)
                .is_some_and(|s| !s.is_empty())
    }

    /// Live (non-removed) history, ascending.
    pub fn history(&self, conversation_id: &str) -> Vec<Message> {
        self.lock()
            .history
            .get(conversation_id)
            .map(|h| {
                h.iter()
                    .filter(|e| !e.removed)
                    .map(|e| e.message.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl EventSource for InMemoryEventSource {
    fn fetch_page(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        page_size: u32,
    ) -> Result<Vec<Message>, SourceError> {
        let mut inner = self.lock();
        inner.fetch_calls.push(FetchCall {
            conversation_id: conversation_id.to_string(),
            before: before.map(ToString::to_string),
            page_size,
        });
        if let Some(err) = inner.fetch_failures.pop_front() {
            return Err(err);
        }
        let history = inner
            .history
            .get(conversation_id)
            .ok_or_else(|| SourceError::UnknownConversation(conversation_id.to_string()))?;

        let end = match before {
            None => history.len(),
            Some(id) => history
                .iter()
                .position(|e| e.message.id == id)
                .ok_or_else(|| SourceError::Transient(format!("unknown cursor {id}")))?,
        };
        let mut page: Vec<Message> = history[..end]
            .iter()
            .rev()
            .filter(|e| !e.removed)
            .take(page_size as usize)
            .map(|e| e.message.clone())
            .collect();
        page.reverse();
        Ok(page)
    }

    fn subscribe_added(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> Result<Receiver<Message>, SourceError> {
        let mut inner = self.lock();
        if let Some(err) = inner.subscribe_failures.pop_front() {
            return Err(err);
        }
        let (tx, rx) = flume::unbounded();
        let newest: Vec<Message> = inner
            .history
            .get(conversation_id)
            .map(|h| {
                let mut v: Vec<Message> = h
                    .iter()
                    .rev()
                    .filter(|e| !e.removed)
                    .take(limit as usize)
                    .map(|e| e.message.clone())
                    .collect();
                v.reverse();
                v
            })
            .unwrap_or_default();
        for m in newest {
            let _ = tx.send(m);
        }
        inner
            .added_subs
            .entry(conversation_id.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    fn subscribe_removed(&self, conversation_id: &str) -> Result<Receiver<MessageId>, SourceError> {
        let (tx, rx) = flume::unbounded();
        self.lock()
            .removed_subs
            .entry(conversation_id.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    fn subscribe_typing(
        &self,
        conversation_id: &str,
    ) -> Result<Receiver<TypingStatus>, SourceError> {
        let (tx, rx) = flume::unbounded();
        self.lock()
            .typing_subs
            .entry(conversation_id.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    fn unsubscribe(&self, conversation_id: &str) {
        let mut inner = self.lock();
        inner.added_subs.remove(conversation_id);
        inner.removed_subs.remove(conversation_id);
        inner.typing_subs.remove(conversation_id);
        *inner
            .unsubscribe_calls
            .entry(conversation_id.to_string())
            .or_insert(0) += 1;
    }

    fn send_message(&self, conversation_id: &str, message: Message) -> Result<(), SourceError> {
        if let Some(err) = self.lock().send_failures.pop_front() {
            return Err(err);
        }
        self.push_message(conversation_id, message);
        Ok(())
    }

    fn set_typing(&self, conversation_id: &str, status: TypingStatus) -> Result<(), SourceError> {
        self.push_typing(conversation_id, status);
        Ok(())
    }
}
