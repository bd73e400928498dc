//! # parley-shared
//!
//! Identifiers and constants shared by the Parley store and client crates.

pub mod constants;
pub mod types;

pub use types::{ChatId, MessageId, UserId};
