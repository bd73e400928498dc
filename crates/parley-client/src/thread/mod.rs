//! Message Thread Store: the ordered, live message list of one open chat.

mod state;
mod store;

pub use state::{Phase, ThreadSnapshot};
pub use store::{Composer, DeleteOutcome, MessageThread};
