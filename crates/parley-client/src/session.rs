//! Session accessor: who is signed in, asked of the backend on demand.

use parley_shared::UserId;
use parley_store::SharedBackend;

use crate::error::{ClientError, Result};

#[derive(Clone)]
pub struct Session {
    backend: SharedBackend,
}

impl Session {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// The current principal, or `None` when signed out.  Not cached here.
    pub async fn current_user_id(&self) -> Result<Option<UserId>> {
        Ok(self.backend.current_user().await?)
    }

    pub async fn require_user(&self) -> Result<UserId> {
        self.current_user_id()
            .await?
            .ok_or(ClientError::Unauthenticated)
    }
}
