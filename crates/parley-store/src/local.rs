//! SQLite-backed implementation of the [`Backend`] capability.
//!
//! One [`LocalServer`] owns the database and the change hub; each principal
//! talks to it through its own [`LocalBackend`] handle, so two users can
//! share one server the way two browsers share one hosted project.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use parley_shared::UserId;
use rusqlite::ErrorCode;
use serde_json::Value;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::changes::{ChangeEvent, ChangeFilter, ChangeHub, Subscription};
use crate::database::Database;
use crate::error::{BackendError, Result, StoreError};
use crate::query::{Filter, Row, Select};
use crate::schema::Table;
use crate::sql;

pub struct LocalServer {
    db: Mutex<Database>,
    hub: ChangeHub,
}

impl LocalServer {
    /// Open (or create) a server backed by the database file at `path`.
    pub fn open(path: &Path) -> Result<Arc<Self>> {
        Ok(Self::with_database(Database::open_at(path)?))
    }

    /// Open a throwaway server backed by an in-memory database.
    pub fn open_in_memory() -> Result<Arc<Self>> {
        Ok(Self::with_database(Database::open_in_memory()?))
    }

    pub fn with_database(db: Database) -> Arc<Self> {
        Arc::new(Self {
            db: Mutex::new(db),
            hub: ChangeHub::new(),
        })
    }

    /// A backend handle acting as `session` (`None` = signed out).
    pub fn connect(self: &Arc<Self>, session: Option<UserId>) -> LocalBackend {
        info!(
            session = %session.map(|u| u.short()).unwrap_or_else(|| "anonymous".into()),
            "local backend session opened"
        );
        LocalBackend {
            server: Arc::clone(self),
            session,
        }
    }

    /// Number of live change subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

#[derive(Clone)]
pub struct LocalBackend {
    server: Arc<LocalServer>,
    session: Option<UserId>,
}

/// Constraint violations are the service refusing the write; everything
/// else is a store failure.
fn classify(err: StoreError) -> BackendError {
    match err {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(code, message))
            if code.code == ErrorCode::ConstraintViolation =>
        {
            BackendError::Rejected(message.unwrap_or_else(|| code.to_string()))
        }
        StoreError::UnknownColumn { .. }
        | StoreError::InvalidValue { .. }
        | StoreError::MissingColumn { .. } => BackendError::Rejected(err.to_string()),
        other => BackendError::Store(other),
    }
}

fn text<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

#[async_trait]
impl Backend for LocalBackend {
    async fn select(&self, query: Select) -> std::result::Result<Vec<Row>, BackendError> {
        let db = self.server.lock()?;
        let conn = db.conn();

        let rows = sql::select_rows(
            conn,
            query.table,
            &query.filters,
            query.order.as_ref(),
            query.limit,
        )
        .map_err(classify)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut projected = sql::project(row, query.table, &query.columns).map_err(classify)?;
            for embed in &query.embeds {
                let value = sql::resolve_embed(conn, query.table, embed, row).map_err(classify)?;
                projected.insert(embed.alias.clone(), value);
            }
            out.push(projected);
        }

        debug!(table = %query.table, rows = out.len(), "select");
        Ok(out)
    }

    async fn insert(
        &self,
        table: Table,
        rows: Vec<Row>,
    ) -> std::result::Result<Vec<Row>, BackendError> {
        let mut db = self.server.lock()?;
        let tx = db.conn_mut().transaction().map_err(StoreError::from)?;

        let mut stored = Vec::with_capacity(rows.len());
        let mut summaries = Vec::new();
        for row in &rows {
            let inserted = sql::insert_row(&tx, table, row).map_err(classify)?;
            if table == Table::Messages {
                if let (Some(chat_id), Some(content), Some(at)) = (
                    text(&inserted, "chat_id"),
                    text(&inserted, "content"),
                    text(&inserted, "created_at"),
                ) {
                    if let Some((old, new)) =
                        sql::record_last_message(&tx, chat_id, content, at).map_err(classify)?
                    {
                        summaries.push(ChangeEvent::updated(Table::Chats, old, new));
                    }
                }
            }
            stored.push(inserted);
        }
        tx.commit().map_err(StoreError::from)?;

        // Published while the write lock is still held, so subscribers see
        // events in commit order.
        for row in &stored {
            self.server
                .hub
                .publish(&ChangeEvent::inserted(table, row.clone()));
        }
        for event in &summaries {
            self.server.hub.publish(event);
        }
        drop(db);

        debug!(%table, rows = stored.len(), "insert");
        Ok(stored)
    }

    async fn delete(
        &self,
        table: Table,
        filters: Vec<Filter>,
    ) -> std::result::Result<Vec<Row>, BackendError> {
        let mut db = self.server.lock()?;
        let tx = db.conn_mut().transaction().map_err(StoreError::from)?;
        let removed = sql::delete_rows(&tx, table, &filters).map_err(classify)?;
        tx.commit().map_err(StoreError::from)?;

        for row in &removed {
            self.server
                .hub
                .publish(&ChangeEvent::deleted(table, row.clone()));
        }
        drop(db);

        debug!(%table, rows = removed.len(), "delete");
        Ok(removed)
    }

    async fn current_user(&self) -> std::result::Result<Option<UserId>, BackendError> {
        Ok(self.session)
    }

    async fn subscribe(
        &self,
        filter: ChangeFilter,
    ) -> std::result::Result<Subscription, BackendError> {
        Ok(self.server.hub.subscribe(filter))
    }
}
