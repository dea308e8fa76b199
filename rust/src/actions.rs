use crate::state::MessageId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedAction {
    // Lifecycle
    OpenConversation {
        conversation_id: String,
        counterpart_id: String,
    },
    CloseConversation,

    // History
    RequestOlderPage,

    // Compose
    SendMessage {
        text: String,
    },
    ReplyTo {
        message_id: MessageId,
    },
    CancelReply,
    /// Carries the message into another conversation as the reference of the
    /// next message sent there.
    ForwardMessage {
        message_id: MessageId,
        to_conversation_id: String,
        to_counterpart_id: String,
    },
    SetTyping {
        is_typing: bool,
    },

    // UI
    ClearToast,
}

impl FeedAction {
    /// Log-safe action tag (never includes message text).
    pub fn tag(&self) -> &'static str {
        match self {
            // Lifecycle
            FeedAction::OpenConversation { .. } => "OpenConversation",
            FeedAction::CloseConversation => "CloseConversation",

            // History
            FeedAction::RequestOlderPage => "RequestOlderPage",

            // Compose
            FeedAction::SendMessage { .. } => "SendMessage",
            FeedAction::ReplyTo { .. } => "ReplyTo",
            FeedAction::CancelReply => "CancelReply",
            FeedAction::ForwardMessage { .. } => "ForwardMessage",
            FeedAction::SetTyping { .. } => "SetTyping",

            // UI
            FeedAction::ClearToast => "ClearToast",
        }
    }
}
