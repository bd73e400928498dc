//! Presentation Layer: plain rows derived from the stores, ready to render.
//! Nothing here talks to the backend or holds state of its own.

use chrono::{DateTime, TimeZone, Utc};
use parley_shared::{ChatId, MessageId, UserId};
use parley_store::{ChatEntry, Message, ReplyPreview};

pub const UNKNOWN_USER: &str = "Unknown User";
pub const NO_MESSAGES_YET: &str = "No messages yet";

/// Two-letter avatar fallback: the first two characters of the email,
/// uppercased.
pub fn initials(email: &str) -> String {
    email.chars().take(2).flat_map(char::to_uppercase).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatListItem {
    pub chat_id: ChatId,
    pub other_user_id: UserId,
    pub title: String,
    pub initials: String,
    pub preview: String,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// List rows for `me`.  When the counterpart's profile did not resolve, the
/// id still comes from the chat itself.
pub fn chat_list(entries: &[ChatEntry], me: UserId) -> Vec<ChatListItem> {
    entries
        .iter()
        .map(|entry| {
            let (title, email) = match &entry.other_user {
                Some(user) => (user.display_name().to_string(), user.email.as_str()),
                None => (UNKNOWN_USER.to_string(), UNKNOWN_USER),
            };
            ChatListItem {
                chat_id: entry.chat.id,
                other_user_id: entry
                    .other_user
                    .as_ref()
                    .map_or_else(|| entry.chat.counterpart(me), |u| u.id),
                title,
                initials: initials(email),
                preview: entry
                    .chat
                    .last_message
                    .clone()
                    .unwrap_or_else(|| NO_MESSAGES_YET.to_string()),
                last_message_at: entry.chat.last_message_at,
            }
        })
        .collect()
}

/// One message as the thread shows it.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub message: Message,
    pub is_own: bool,
    /// Starts a run of messages from the same sender.
    pub first_in_group: bool,
    /// Ends the run; only these carry a time label.
    pub last_in_group: bool,
    pub reply: Option<ReplyPreview>,
    pub time_label: Option<String>,
}

impl MessageRow {
    /// Only the sender may delete a message.
    pub fn can_delete(&self) -> bool {
        self.is_own
    }
}

/// `HH:MM` in the given zone.
pub fn time_label<Tz: TimeZone>(at: DateTime<Utc>, zone: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.with_timezone(zone).format("%H:%M").to_string()
}

/// The preview to show above `message`: the embedded one if the load
/// carried it, otherwise whatever the list has under `reply_to`.  A deleted
/// target resolves to nothing.
pub fn resolve_reply(message: &Message, messages: &[Message]) -> Option<ReplyPreview> {
    if let Some(embedded) = &message.reply_to_message {
        return Some(embedded.clone());
    }
    let target: MessageId = message.reply_to?;
    messages
        .iter()
        .find(|m| m.id == target)
        .map(Message::preview)
}

/// Lay out an ordered thread.  Groups are runs of adjacent messages from
/// one sender; there is no time-gap rule.
pub fn thread_rows<Tz: TimeZone>(
    messages: &[Message],
    me: Option<UserId>,
    zone: &Tz,
) -> Vec<MessageRow>
where
    Tz::Offset: std::fmt::Display,
{
    messages
        .iter()
        .enumerate()
        .map(|(i, message)| {
            let sender = message.sender_id;
            let first_in_group = i == 0 || messages[i - 1].sender_id != sender;
            let last_in_group = messages.get(i + 1).map_or(true, |next| next.sender_id != sender);
            MessageRow {
                message: message.clone(),
                is_own: me == Some(sender),
                first_in_group,
                last_in_group,
                reply: resolve_reply(message, messages),
                time_label: last_in_group.then(|| time_label(message.created_at, zone)),
            }
        })
        .collect()
}
