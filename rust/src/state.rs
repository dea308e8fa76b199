use serde::{Deserialize, Serialize};

/// Identifier of a message, unique within one conversation.
pub type MessageId = String;

/// What a message carries. Text and media are mutually exclusive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageBody {
    Text { text: String },
    Media { url: String },
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        MessageBody::Text { text: text.into() }
    }

    pub fn media(url: impl Into<String>) -> Self {
        MessageBody::Media { url: url.into() }
    }
}

/// Snapshot of the message being replied to, frozen at send time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub message_id: MessageId,
    pub sender_id: String,
    pub body: MessageBody,
}

/// An immutable chat message. Messages are only ever inserted or removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: MessageBody,
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
}

impl Message {
    pub fn reply_snapshot(&self) -> ReplyRef {
        ReplyRef {
            message_id: self.id.clone(),
            sender_id: self.sender_id.clone(),
            body: self.body.clone(),
        }
    }
}

/// A participant started or stopped typing in a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingStatus {
    pub user_id: String,
    pub is_typing: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    LoadingOlderPage,
    HistoryExhausted,
}

/// Who the local user is. Passed in explicitly rather than read from globals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedContext {
    pub local_user_id: String,
}

impl FeedContext {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConversationView {
    pub conversation_id: String,
    pub counterpart_id: String,
    pub sync: SyncState,
    pub messages: Vec<Message>,
    pub reply_target: Option<ReplyRef>,
    pub live_subscribed: bool,
    pub counterpart_typing: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FeedState {
    pub rev: u64,
    pub local_user_id: String,
    pub conversation: Option<ConversationView>,
    pub toast: Option<String>,
}

impl FeedState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            local_user_id: String::new(),
            conversation: None,
            toast: None,
        }
    }
}

pub fn now_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}
