//! Domain model structs persisted in the SQLite database.
//!
//! Conversions into the wire types of `parley_shared::protocol` live here so
//! the server can hand rows to clients without re-mapping fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::protocol::{ChatMessage, MessageContent, PeerProfile};
use parley_shared::{ConversationId, MessageId, PairKey, UserId};

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Public profile of a user account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: UserId,
    pub name: String,
    pub email: String,
    /// Reference to the avatar image (may be empty).
    pub profile_pic: String,
    pub created_at: DateTime<Utc>,
}

impl From<Profile> for PeerProfile {
    fn from(profile: Profile) -> Self {
        PeerProfile {
            id: profile.id,
            name: profile.name,
            email: profile.email,
            profile_pic: profile.profile_pic,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// The thread between two users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub pair: PairKey,
    pub created_at: DateTime<Utc>,
    /// Time of the latest appended message (creation time if none yet).
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub author: UserId,
    pub content: MessageContent,
    /// Flips to `true` once the other participant has read it; never reset.
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for ChatMessage {
    fn from(message: Message) -> Self {
        ChatMessage {
            id: message.id,
            conversation_id: message.conversation_id,
            author: message.author,
            content: message.content,
            seen: message.seen,
            created_at: message.created_at,
        }
    }
}
