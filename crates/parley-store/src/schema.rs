//! Static description of the three collections the backing service exposes.
//!
//! Column names arriving from callers are checked against this table before
//! they are ever spliced into SQL.

use parley_shared::constants::{TABLE_CHATS, TABLE_MESSAGES, TABLE_USERS};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Uuid,
    Text,
    /// RFC-3339 instant, stored normalised to UTC with microseconds.
    Timestamp,
    Bool,
}

/// Value the service fills in when an insert omits the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDefault {
    NewUuid,
    Now,
    False,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column {
        name,
        kind,
        nullable: false,
        default: None,
    }
}

const fn nullable(name: &'static str, kind: ColumnKind) -> Column {
    Column {
        name,
        kind,
        nullable: true,
        default: None,
    }
}

const fn defaulted(name: &'static str, kind: ColumnKind, default: ColumnDefault) -> Column {
    Column {
        name,
        kind,
        nullable: false,
        default: Some(default),
    }
}

const USERS: &[Column] = &[
    col("id", ColumnKind::Uuid),
    col("email", ColumnKind::Text),
    nullable("full_name", ColumnKind::Text),
    nullable("avatar_url", ColumnKind::Text),
    defaulted("created_at", ColumnKind::Timestamp, ColumnDefault::Now),
];

const CHATS: &[Column] = &[
    defaulted("id", ColumnKind::Uuid, ColumnDefault::NewUuid),
    col("user1_id", ColumnKind::Uuid),
    col("user2_id", ColumnKind::Uuid),
    defaulted("created_at", ColumnKind::Timestamp, ColumnDefault::Now),
    nullable("last_message", ColumnKind::Text),
    nullable("last_message_at", ColumnKind::Timestamp),
];

const MESSAGES: &[Column] = &[
    defaulted("id", ColumnKind::Uuid, ColumnDefault::NewUuid),
    col("chat_id", ColumnKind::Uuid),
    col("sender_id", ColumnKind::Uuid),
    col("content", ColumnKind::Text),
    defaulted("created_at", ColumnKind::Timestamp, ColumnDefault::Now),
    defaulted("is_read", ColumnKind::Bool, ColumnDefault::False),
    nullable("reply_to", ColumnKind::Uuid),
];

/// A named collection in the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    Chats,
    Messages,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Users => TABLE_USERS,
            Table::Chats => TABLE_CHATS,
            Table::Messages => TABLE_MESSAGES,
        }
    }

    pub fn columns(self) -> &'static [Column] {
        match self {
            Table::Users => USERS,
            Table::Chats => CHATS,
            Table::Messages => MESSAGES,
        }
    }

    /// Look up a column, failing for names the table does not have.
    pub fn column(self, name: &str) -> Result<&'static Column, StoreError> {
        self.columns()
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: self.name(),
                column: name.to_string(),
            })
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
