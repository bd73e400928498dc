//! The backing-service capability consumed by the client.

use std::sync::Arc;

use async_trait::async_trait;
use parley_shared::UserId;

use crate::changes::{ChangeFilter, Subscription};
use crate::error::BackendError;
use crate::query::{Filter, Row, Select};
use crate::schema::Table;

/// Query, mutation, identity and change-event access to the hosted store.
///
/// Implementations impose their own timeouts; callers add none.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Rows matching `query`, with embeds resolved inline.
    async fn select(&self, query: Select) -> Result<Vec<Row>, BackendError>;

    /// Insert `rows` atomically and return them as stored.
    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<Vec<Row>, BackendError>;

    /// Delete every row matching all `filters` and return the removed rows.
    async fn delete(&self, table: Table, filters: Vec<Filter>) -> Result<Vec<Row>, BackendError>;

    /// The authenticated principal, or `None` when signed out.
    async fn current_user(&self) -> Result<Option<UserId>, BackendError>;

    /// Start receiving change events matching `filter`.
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, BackendError>;
}

pub type SharedBackend = Arc<dyn Backend>;
