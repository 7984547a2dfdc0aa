//! Wire protocol spoken over the WebSocket.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{ConversationId, MessageId, UserId};

/// Events a connected client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Open the thread with another user
    OpenThread { counterpart: UserId },

    /// Send a message to another user
    SendMessage(OutgoingMessage),

    /// Mark every message authored by `counterpart` in the shared thread as seen
    MarkSeen { counterpart: UserId },

    /// Ask for a fresh sidebar
    RequestSidebar,
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Every user that currently has at least one live connection
    OnlineUsers(Vec<UserId>),

    /// Reply to `OpenThread`
    ThreadOpened(ThreadPayload),

    /// Full message list of a conversation after it changed
    MessagesUpdated(MessagesPayload),

    /// Recomputed sidebar for the receiving user
    SidebarUpdated(Vec<SidebarEntry>),

    /// Failure acknowledgment for an inbound event
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub receiver: UserId,
    #[serde(flatten)]
    pub content: MessageContent,
}

/// Body of a message. Any field may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub video_url: String,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Public profile of a user. Never carries credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerProfile {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub profile_pic: String,
}

/// A message as seen by clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub author: UserId,
    #[serde(flatten)]
    pub content: MessageContent,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadPayload {
    pub user: PeerProfile,
    /// Presence of `user` at the moment the thread was opened
    pub online: bool,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesPayload {
    pub conversation_id: ConversationId,
    pub messages: Vec<ChatMessage>,
}

/// One row of a user's sidebar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidebarEntry {
    pub conversation_id: ConversationId,
    pub counterpart: PeerProfile,
    pub last_message: Option<ChatMessage>,
    /// Messages authored by `counterpart` that the owner has not seen
    pub unseen_count: u32,
    pub online: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Invalid,
    Store,
    RateLimited,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

impl ServerEvent {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            kind,
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Short name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::OpenThread { .. } => "open_thread",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::MarkSeen { .. } => "mark_seen",
            ClientEvent::RequestSidebar => "request_sidebar",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_message_wire_shape() {
        let receiver = UserId::new();
        let raw = json!({
            "event": "send_message",
            "data": { "receiver": receiver, "text": "hello", "image_url": "img://1" }
        })
        .to_string();

        let event = ClientEvent::from_json(&raw).unwrap();
        assert_eq!(
            event,
            ClientEvent::SendMessage(OutgoingMessage {
                receiver,
                content: MessageContent {
                    text: "hello".into(),
                    image_url: "img://1".into(),
                    video_url: String::new(),
                },
            })
        );
    }

    #[test]
    fn test_request_sidebar_without_data() {
        let event = ClientEvent::from_json(r#"{"event":"request_sidebar"}"#).unwrap();
        assert_eq!(event, ClientEvent::RequestSidebar);
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(ClientEvent::from_json(r#"{"event":"delete_everything"}"#).is_err());
        assert!(ClientEvent::from_json("not json").is_err());
    }

    #[test]
    fn test_server_event_tagging() {
        let user = UserId::new();
        let value: serde_json::Value =
            serde_json::from_str(&ServerEvent::OnlineUsers(vec![user]).to_json().unwrap())
                .unwrap();
        assert_eq!(value["event"], "online_users");
        assert_eq!(value["data"][0], user.to_string());

        let value: serde_json::Value = serde_json::from_str(
            &ServerEvent::error(ErrorKind::NotFound, "no such user")
                .to_json()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["data"]["kind"], "not_found");
    }
}
