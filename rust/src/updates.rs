use crate::error::SourceError;
use crate::state::{FeedState, Message, MessageId, TypingStatus};
use crate::FeedAction;

/// Where the renderer should keep the viewport pinned after a prepend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScrollAnchor {
    /// The message that was topmost before the prepend.
    pub message_id: MessageId,
    /// Its index after the prepend.
    pub index: usize,
}

/// A feed mutation described for the UI layer. Instructions are emitted in
/// the order the store was mutated and must be applied in that order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderInstruction {
    AppendedAt {
        indices: Vec<usize>,
    },
    /// `anchor` is `None` for the first page of a conversation.
    InsertedAt {
        indices: Vec<usize>,
        anchor: Option<ScrollAnchor>,
    },
    RemovedAt {
        index: usize,
    },
    ScrollToBottom {
        animated: bool,
    },
    HistoryExhausted,
    PageLoadFailed {
        reason: String,
    },
    SendFailed {
        reason: String,
    },
}

#[derive(Clone, Debug)]
pub enum FeedUpdate {
    /// Full snapshot after every state change.
    FullState(FeedState),
    Render {
        rev: u64,
        conversation_id: String,
        instructions: Vec<RenderInstruction>,
    },
}

impl FeedUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            FeedUpdate::FullState(s) => s.rev,
            FeedUpdate::Render { rev, .. } => *rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(FeedAction),
    Internal(Box<InternalEvent>),
}

/// Results of work the core handed off, tagged with the session token of the
/// conversation that started it.
#[derive(Debug)]
pub enum InternalEvent {
    PageFetched {
        token: u64,
        result: Result<Vec<Message>, SourceError>,
    },
    LiveMessageAdded {
        token: u64,
        message: Message,
    },
    LiveMessageRemoved {
        token: u64,
        message_id: MessageId,
    },
    SendCompleted {
        token: u64,
        message: Message,
        result: Result<(), SourceError>,
    },
    TypingChanged {
        token: u64,
        status: TypingStatus,
    },
    ToastAutoDismiss {
        token: u64,
    },
}
