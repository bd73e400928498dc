//! # parley-store
//!
//! The backing service of the Parley messenger, seen from the client side.
//!
//! [`Backend`] is the capability the client consumes: filtered selects with
//! inline relation embeds, inserts, deletes, the current principal, and
//! change-event subscriptions.  [`LocalServer`] implements it on top of a
//! SQLite database so the client can run (and be tested) without a hosted
//! service.

pub mod backend;
pub mod changes;
pub mod database;
pub mod local;
pub mod migrations;
pub mod models;
pub mod query;
pub mod schema;

mod error;
mod sql;

pub use backend::{Backend, SharedBackend};
pub use changes::{ChangeEvent, ChangeFilter, ChangeKind, Subscription};
pub use database::Database;
pub use error::{BackendError, StoreError};
pub use local::{LocalBackend, LocalServer};
pub use models::*;
pub use query::{Direction, Embed, Filter, Row, Select};
pub use schema::Table;
