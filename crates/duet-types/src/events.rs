use serde::{Deserialize, Serialize};

use crate::models::{ChatId, Message};

/// One frame as it arrives on the websocket, before it is turned into a
/// [`ClientCommand`]. Missing or `null` fields read as zero / empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Commands sent FROM client TO server over the websocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Ping,
    SendMessage { chat_id: ChatId, content: String },
    JoinChat { chat_id: ChatId },
    MarkRead { chat_id: ChatId },
    /// Unrecognised `type`; logged and otherwise ignored.
    Unknown(String),
}

impl ClientCommand {
    /// Decode a text frame. Fails only if the frame is not a JSON envelope;
    /// an unrecognised `type` decodes to [`ClientCommand::Unknown`].
    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<WireFrame>(raw).map(Self::from)
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::SendMessage { .. } => "send_message",
            Self::JoinChat { .. } => "join_chat",
            Self::MarkRead { .. } => "mark_read",
            Self::Unknown(kind) => kind,
        }
    }
}

impl From<WireFrame> for ClientCommand {
    fn from(frame: WireFrame) -> Self {
        let chat_id = frame.chat_id.unwrap_or_default();
        match frame.kind.as_str() {
            "ping" => Self::Ping,
            "send_message" => Self::SendMessage {
                chat_id,
                content: frame.content.unwrap_or_default(),
            },
            "join_chat" => Self::JoinChat { chat_id },
            "mark_read" => Self::MarkRead { chat_id },
            _ => Self::Unknown(frame.kind),
        }
    }
}

/// Events sent FROM server TO client. Serialized as
/// `{"type": "<snake_case variant>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once, right after the connection is registered
    Connected { message: String },

    /// Reply to a client `ping`, carrying the server's unix time
    Pong { timestamp: i64 },

    /// A message was persisted in a chat the recipient belongs to
    NewMessage(Message),

    JoinedChat { chat_id: ChatId, message: String },

    MessagesMarkedRead { chat_id: ChatId },

    /// A command was rejected; the connection stays open
    Error { error: String },
}

impl ServerEvent {
    pub fn connected() -> Self {
        Self::Connected {
            message: "Connected to chat server".into(),
        }
    }

    pub fn pong_now() -> Self {
        Self::Pong {
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn joined(chat_id: ChatId) -> Self {
        Self::JoinedChat {
            chat_id,
            message: "Joined chat successfully".into(),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            error: reason.into(),
        }
    }

    /// The wire `type` tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Pong { .. } => "pong",
            Self::NewMessage(_) => "new_message",
            Self::JoinedChat { .. } => "joined_chat",
            Self::MessagesMarkedRead { .. } => "messages_marked_read",
            Self::Error { .. } => "error",
        }
    }
}
