// Pagination state machine + live event application for one conversation.
//
// Pure: no IO, no channels. The core asks it what to fetch, feeds back what
// arrived, and forwards the resulting render instructions.

use std::collections::VecDeque;

use super::config::LiveSubscribeMode;
use super::feed_store::FeedStore;
use crate::error::SourceError;
use crate::state::{Message, MessageId, SyncState};
use crate::updates::{RenderInstruction, ScrollAnchor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PageRequest {
    /// Oldest message loaded so far; `None` before the first page.
    pub(crate) before: Option<MessageId>,
}

#[derive(Debug, Clone)]
enum LiveEvent {
    Added(Message),
    Removed(MessageId),
}

/// Pagination position: the oldest message a page has brought in.
#[derive(Debug, Clone)]
struct Cursor {
    message_id: MessageId,
    timestamp: i64,
}

#[derive(Debug)]
pub(crate) struct Synchronizer {
    local_user_id: String,
    mode: LiveSubscribeMode,
    state: SyncState,
    cursor: Option<Cursor>,
    store: FeedStore,
    // Live events held back until they can be applied without landing inside
    // a page merge. Drained strictly front to back.
    pending_live: VecDeque<LiveEvent>,
    // Live adds are only applied once this is set (history exhausted, or the
    // first page landed in `OnFirstPage` mode). Never cleared.
    applying_live: bool,
}

impl Synchronizer {
    pub(crate) fn new(local_user_id: impl Into<String>, mode: LiveSubscribeMode) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            mode,
            state: SyncState::Idle,
            cursor: None,
            store: FeedStore::new(),
            pending_live: VecDeque::new(),
            applying_live: false,
        }
    }

    pub(crate) fn state(&self) -> SyncState {
        self.state
    }

    pub(crate) fn store(&self) -> &FeedStore {
        &self.store
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> Option<&str> {
        self.cursor.as_ref().map(|c| c.message_id.as_str())
    }

    #[cfg(test)]
    pub(crate) fn pending_live_len(&self) -> usize {
        self.pending_live.len()
    }

    /// `None` unless idle: at most one page request is ever in flight, and
    /// none once history is exhausted.
    pub(crate) fn request_older_page(&mut self) -> Option<PageRequest> {
        if self.state != SyncState::Idle {
            tracing::debug!(state = ?self.state, "older page request ignored");
            return None;
        }
        self.state = SyncState::LoadingOlderPage;
        Some(PageRequest {
            before: self.cursor.as_ref().map(|c| c.message_id.clone()),
        })
    }

    /// Merge a page (ascending, oldest first) answering the in-flight request.
    pub(crate) fn apply_page(&mut self, page: Vec<Message>) -> Vec<RenderInstruction> {
        let mut render = Vec::new();
        if self.state != SyncState::LoadingOlderPage {
            tracing::debug!(state = ?self.state, "page without request; dropped");
            return render;
        }

        let previous_top = self.store.first().map(|m| m.id.clone());
        let page_len = page.len();
        let inserted = self.store.insert_at_start(page);

        if inserted.is_empty() {
            if page_len > 0 {
                // Everything handed back is already loaded; asking again
                // from the same cursor would loop.
                tracing::info!(page_len, "page made no progress; treating as exhausted");
            }
            self.exhaust(&mut render);
            self.flush_live(&mut render);
            return render;
        }

        self.state = SyncState::Idle;
        self.advance_cursor();
        if inserted.len() < page_len {
            tracing::debug!(
                dropped = page_len - inserted.len(),
                "page overlapped loaded messages"
            );
        }
        let anchor = previous_top.map(|message_id| ScrollAnchor {
            message_id,
            index: inserted.len(),
        });
        let first_page = anchor.is_none();
        render.push(RenderInstruction::InsertedAt {
            indices: inserted,
            anchor,
        });
        if first_page {
            render.push(RenderInstruction::ScrollToBottom { animated: false });
        }
        if self.mode == LiveSubscribeMode::OnFirstPage {
            self.applying_live = true;
        }
        self.flush_live(&mut render);
        render
    }

    /// The in-flight request failed. Back to idle so the caller may retry; the
    /// store is untouched.
    pub(crate) fn fail_page(&mut self, err: &SourceError) -> Vec<RenderInstruction> {
        let mut render = Vec::new();
        if self.state != SyncState::LoadingOlderPage {
            return render;
        }
        self.state = SyncState::Idle;
        render.push(RenderInstruction::PageLoadFailed {
            reason: err.to_string(),
        });
        self.flush_live(&mut render);
        render
    }

    pub(crate) fn on_live_message_added(&mut self, message: Message) -> Vec<RenderInstruction> {
        self.enqueue_live(LiveEvent::Added(message))
    }

    pub(crate) fn on_live_message_removed(
        &mut self,
        message_id: MessageId,
    ) -> Vec<RenderInstruction> {
        self.enqueue_live(LiveEvent::Removed(message_id))
    }

    /// The cursor only ever moves to an older message. A source answering
    /// with messages newer than the cursor leaves it where it was.
    fn advance_cursor(&mut self) {
        let Some(top) = self.store.first() else {
            return;
        };
        match &self.cursor {
            Some(c) if top.timestamp > c.timestamp => tracing::warn!(
                cursor = %c.message_id,
                top = %top.id,
                "page is newer than the cursor; cursor kept"
            ),
            _ => {
                self.cursor = Some(Cursor {
                    message_id: top.id.clone(),
                    timestamp: top.timestamp,
                })
            }
        }
    }

    fn enqueue_live(&mut self, event: LiveEvent) -> Vec<RenderInstruction> {
        let mut render = Vec::new();
        self.pending_live.push_back(event);
        self.flush_live(&mut render);
        if !self.pending_live.is_empty() {
            tracing::debug!(pending = self.pending_live.len(), state = ?self.state, "live event buffered");
        }
        render
    }

    fn exhaust(&mut self, render: &mut Vec<RenderInstruction>) {
        self.state = SyncState::HistoryExhausted;
        self.applying_live = true;
        render.push(RenderInstruction::HistoryExhausted);
    }

    fn accepts(&self, event: &LiveEvent) -> bool {
        if self.state == SyncState::LoadingOlderPage {
            return false;
        }
        match event {
            LiveEvent::Added(_) => self.applying_live,
            LiveEvent::Removed(_) => true,
        }
    }

    fn flush_live(&mut self, render: &mut Vec<RenderInstruction>) {
        while self.pending_live.front().is_some_and(|e| self.accepts(e)) {
            if let Some(event) = self.pending_live.pop_front() {
                self.apply_live(event, render);
            }
        }
    }

    fn apply_live(&mut self, event: LiveEvent, render: &mut Vec<RenderInstruction>) {
        match event {
            LiveEvent::Added(message) => {
                let from_peer = message.sender_id != self.local_user_id;
                let message_id = message.id.clone();
                let indices = self.store.insert_at_end(vec![message]);
                if indices.is_empty() {
                    tracing::debug!(%message_id, "live add already present");
                    return;
                }
                render.push(RenderInstruction::AppendedAt { indices });
                if from_peer {
                    render.push(RenderInstruction::ScrollToBottom { animated: true });
                }
            }
            LiveEvent::Removed(message_id) => match self.store.remove_by_id(&message_id) {
                Some(index) => render.push(RenderInstruction::RemovedAt { index }),
                None => tracing::info!(%message_id, "live remove for unknown message"),
            },
        }
    }
}
