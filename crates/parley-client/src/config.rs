//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client starts with zero
//! configuration.  `RUST_LOG` is read by [`init_tracing`](crate::init_tracing),
//! not here.

use std::path::PathBuf;

use parley_shared::constants::{SEARCH_MIN_QUERY_CHARS, SEARCH_RESULT_LIMIT};
use parley_store::Database;

use crate::error::Result;

pub const ENV_DATABASE: &str = "PARLEY_DATABASE";
pub const ENV_SEARCH_MIN_CHARS: &str = "PARLEY_SEARCH_MIN_CHARS";
pub const ENV_SEARCH_LIMIT: &str = "PARLEY_SEARCH_LIMIT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// SQLite file of the local backend.
    /// Env: `PARLEY_DATABASE`
    /// Default: the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Queries shorter than this skip the backend entirely.
    /// Env: `PARLEY_SEARCH_MIN_CHARS`
    /// Default: `2`
    pub search_min_chars: usize,

    /// Maximum users returned per search (at least 1).
    /// Env: `PARLEY_SEARCH_LIMIT`
    /// Default: `5`
    pub search_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            search_min_chars: SEARCH_MIN_QUERY_CHARS,
            search_limit: SEARCH_RESULT_LIMIT,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_DATABASE).filter(|p| !p.trim().is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(val) = lookup(ENV_SEARCH_MIN_CHARS) {
            match val.trim().parse::<usize>() {
                Ok(n) => config.search_min_chars = n,
                Err(e) => tracing::warn!(value = %val, error = %e, "Invalid {ENV_SEARCH_MIN_CHARS}, using default"),
            }
        }

        if let Some(val) = lookup(ENV_SEARCH_LIMIT) {
            match val.trim().parse::<usize>() {
                Ok(n) => config.search_limit = n.max(1),
                Err(e) => tracing::warn!(value = %val, error = %e, "Invalid {ENV_SEARCH_LIMIT}, using default"),
            }
        }

        config
    }

    /// Resolved database location.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Database::default_path()?),
        }
    }
}
