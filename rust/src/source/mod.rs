mod memory;

use flume::Receiver;

use crate::error::SourceError;
use crate::state::{Message, MessageId, TypingStatus};

pub use memory::{FetchCall, InMemoryEventSource};

/// The messaging backend a conversation feed is synchronized against.
///
/// Calls may block; the core runs them off its actor thread. Streams end when
/// the source drops its sending half, which `unsubscribe` must do.
pub trait EventSource: Send + Sync + 'static {
    /// Up to `page_size` messages older than `before` (or the newest ones when
    /// `before` is `None`), ascending. An empty page means history is exhausted.
    fn fetch_page(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        page_size: u32,
    ) -> Result<Vec<Message>, SourceError>;

    /// Messages added to the conversation from now on, preceded by the newest
    /// `limit` existing ones. Delivery is at-least-once.
    fn subscribe_added(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> Result<Receiver<Message>, SourceError>;

    fn subscribe_removed(&self, conversation_id: &str) -> Result<Receiver<MessageId>, SourceError>;

    /// Typing changes of the conversation's participants, the local user's
    /// own included.
    fn subscribe_typing(
        &self,
        conversation_id: &str,
    ) -> Result<Receiver<TypingStatus>, SourceError>;

    /// Releases every stream of the conversation. Idempotent.
    fn unsubscribe(&self, conversation_id: &str);

    fn send_message(&self, conversation_id: &str, message: Message) -> Result<(), SourceError>;

    /// Publishes the local user's typing state.
    fn set_typing(&self, conversation_id: &str, status: TypingStatus) -> Result<(), SourceError>;
}
