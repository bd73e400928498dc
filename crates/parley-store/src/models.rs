//! Domain records exchanged with the backing service.
//!
//! Every struct derives `Serialize` and `Deserialize`; rows returned by a
//! [`Backend`](crate::Backend) decode straight into them.

use chrono::{DateTime, Utc};
use parley_shared::{ChatId, MessageId, UserId};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user.  Owned by the auth provider; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self) -> &str {
        display_name(&self.full_name, &self.email)
    }
}

/// Public profile fields of a chat counterpart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> &str {
        display_name(&self.full_name, &self.email)
    }
}

fn display_name<'a>(full_name: &'a Option<String>, email: &'a str) -> &'a str {
    match full_name.as_deref() {
        Some(name) if !name.trim().is_empty() => name,
        _ => email,
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A conversation between exactly two users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub user1_id: UserId,
    pub user2_id: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Chat {
    pub fn involves(&self, user: UserId) -> bool {
        self.user1_id == user || self.user2_id == user
    }

    /// The participant that is not `me`.
    pub fn counterpart(&self, me: UserId) -> UserId {
        if self.user1_id == me {
            self.user2_id
        } else {
            self.user1_id
        }
    }
}

/// A chat as listed for one user, with the other participant's profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatEntry {
    #[serde(flatten)]
    pub chat: Chat,
    #[serde(default)]
    pub other_user: Option<UserProfile>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// The fields of a replied-to message shown above a reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyPreview {
    pub id: MessageId,
    pub content: String,
    pub sender_id: UserId,
}

/// A single chat message.
///
/// `reply_to` is a weak reference: the target may have been deleted, in
/// which case no preview resolves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    #[serde(
        default,
        deserialize_with = "first_of_embed",
        skip_serializing_if = "Option::is_none"
    )]
    pub reply_to_message: Option<ReplyPreview>,
}

impl Message {
    pub fn preview(&self) -> ReplyPreview {
        ReplyPreview {
            id: self.id,
            content: self.content.clone(),
            sender_id: self.sender_id,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

/// Accept an embedded relation as an object, `null`, or an array; an array
/// resolves to its first element.
fn first_of_embed<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => None,
        Some(OneOrMany::One(value)) => Some(value),
        Some(OneOrMany::Many(values)) => values.into_iter().next(),
    })
}

// ---------------------------------------------------------------------------
// Inserts
// ---------------------------------------------------------------------------

/// Row shape for creating a chat.
#[derive(Debug, Clone, Serialize)]
pub struct NewChat {
    pub user1_id: UserId,
    pub user2_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Row shape for sending a message.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub reply_to: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}
