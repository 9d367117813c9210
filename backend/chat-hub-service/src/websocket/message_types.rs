use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Inbound WebSocket actions from client to server
///
/// Fields that do not belong to an action are ignored, so clients may always
/// send the full `{action, message_id, content}` shape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WsInboundAction {
    Create {
        #[serde(default)]
        content: String,
    },
    Edit {
        message_id: i64,
        #[serde(default)]
        content: String,
    },
    Delete {
        message_id: i64,
    },
    /// Any action kind this server does not handle.
    #[serde(other)]
    Unknown,
}

impl WsInboundAction {
    /// Decode one text or binary frame.
    pub fn decode(frame: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(frame)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WsInboundAction::Create { .. } => "create",
            WsInboundAction::Edit { .. } => "edit",
            WsInboundAction::Delete { .. } => "delete",
            WsInboundAction::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Create,
    Edit,
    Delete,
    ReadMessages,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Create => "create",
            EventAction::Edit => "edit",
            EventAction::Delete => "delete",
            EventAction::ReadMessages => "read_messages",
        }
    }
}

/// Outbound WebSocket event from server to client
///
/// Every field is always serialized; the ones that do not apply to an action
/// stay zero or empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsOutboundEvent {
    pub action: EventAction,
    pub message_id: i64,
    pub content: String,
    pub sender_id: i64,
    pub chat_id: i64,
    pub role_id: i32,
    pub login: String,
}

impl WsOutboundEvent {
    fn empty(action: EventAction, chat_id: i64, sender_id: i64) -> Self {
        Self {
            action,
            message_id: 0,
            content: String::new(),
            sender_id,
            chat_id,
            role_id: 0,
            login: String::new(),
        }
    }

    pub fn created(
        chat_id: i64,
        message_id: i64,
        sender_id: i64,
        content: String,
        login: String,
        role_id: i32,
    ) -> Self {
        Self {
            message_id,
            content,
            login,
            role_id,
            ..Self::empty(EventAction::Create, chat_id, sender_id)
        }
    }

    pub fn edited(chat_id: i64, message_id: i64, sender_id: i64, content: String) -> Self {
        Self {
            message_id,
            content,
            ..Self::empty(EventAction::Edit, chat_id, sender_id)
        }
    }

    pub fn deleted(chat_id: i64, message_id: i64, sender_id: i64) -> Self {
        Self {
            message_id,
            ..Self::empty(EventAction::Delete, chat_id, sender_id)
        }
    }

    /// `sender_id` is the reader whose unread messages were marked.
    pub fn read_messages(chat_id: i64, reader_id: i64) -> Self {
        Self::empty(EventAction::ReadMessages, chat_id, reader_id)
    }

    /// Serialize once; the same bytes are shared by every recipient.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}
