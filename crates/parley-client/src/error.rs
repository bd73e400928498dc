use parley_store::{BackendError, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Malformed row: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Not signed in")]
    Unauthenticated,

    #[error("No chat is open")]
    NoOpenChat,

    #[error("Backend returned no {0} row")]
    MissingRow(&'static str),

    #[error("Thread state lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, ClientError>;
