//! # parley-client
//!
//! Client-side state of the Parley two-party messenger: who is signed in,
//! which chats they have, and the live, ordered message thread of the chat
//! that is open.  Everything durable lives behind a
//! [`Backend`](parley_store::Backend); this crate subscribes to its change
//! events and keeps local view state consistent with it.

pub mod config;
pub mod directory;
pub mod session;
pub mod state;
pub mod thread;
pub mod view;

mod error;
mod rows;

#[cfg(test)]
mod testing;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use directory::{ChatDirectory, LiveChatList};
pub use error::{ClientError, Result};
pub use session::Session;
pub use state::AppState;
pub use thread::{Composer, DeleteOutcome, MessageThread, Phase, ThreadSnapshot};

const DEFAULT_LOG_FILTER: &str = "parley_client=debug,parley_store=info,warn";

/// Install the global `tracing` subscriber.  `RUST_LOG` overrides the
/// default filter.  Calling it twice is harmless.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
