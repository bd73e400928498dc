//! The synchronous half of the thread store: every local transition the
//! thread can make, with no I/O.  [`MessageThread`](super::MessageThread)
//! drives it from backend results and change events.

use std::collections::HashMap;

use parley_shared::{ChatId, MessageId};
use parley_store::{ChangeEvent, ChangeKind, Message, Row};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No chat open.
    Idle,
    /// A chat is open and its history has not arrived yet.
    Loading,
    Ready,
}

/// What a view renders: the open chat and its messages, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSnapshot {
    pub chat_id: Option<ChatId>,
    pub phase: Phase,
    pub messages: Vec<Message>,
}

impl ThreadSnapshot {
    pub fn idle() -> Self {
        Self {
            chat_id: None,
            phase: Phase::Idle,
            messages: Vec::new(),
        }
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }
}

/// A message hidden by an unconfirmed delete, with where it sat.
#[derive(Debug, Clone)]
pub(crate) struct Tentative {
    pub chat_id: ChatId,
    pub index: usize,
    pub message: Message,
}

#[derive(Debug)]
pub(crate) struct ThreadState {
    chat_id: Option<ChatId>,
    /// Bumped on every open/close; results tagged with an older value are
    /// for a chat that is no longer shown.
    generation: u64,
    phase: Phase,
    messages: Vec<Message>,
    loads_in_flight: usize,
    buffered: Vec<ChangeEvent>,
    tentative: HashMap<MessageId, Tentative>,
}

fn row_id(row: &Row) -> Option<MessageId> {
    row.get("id")?.as_str()?.parse().ok()
}

fn row_chat(row: &Row) -> Option<ChatId> {
    row.get("chat_id")?.as_str()?.parse().ok()
}

impl Default for ThreadState {
    fn default() -> Self {
        Self {
            chat_id: None,
            generation: 0,
            phase: Phase::Idle,
            messages: Vec::new(),
            loads_in_flight: 0,
            buffered: Vec::new(),
            tentative: HashMap::new(),
        }
    }
}

impl ThreadState {
    pub fn chat_id(&self) -> Option<ChatId> {
        self.chat_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn snapshot(&self) -> ThreadSnapshot {
        ThreadSnapshot {
            chat_id: self.chat_id,
            phase: self.phase,
            messages: self.messages.clone(),
        }
    }

    fn reset(&mut self, chat_id: Option<ChatId>, phase: Phase) -> u64 {
        self.generation += 1;
        self.chat_id = chat_id;
        self.phase = phase;
        self.messages.clear();
        self.loads_in_flight = 0;
        self.buffered.clear();
        self.tentative.clear();
        self.generation
    }

    /// Switch to `chat`, dropping everything known about the previous one.
    pub fn open(&mut self, chat: ChatId) -> u64 {
        self.reset(Some(chat), Phase::Loading)
    }

    pub fn close(&mut self) {
        self.reset(None, Phase::Idle);
    }

    fn buffering(&self) -> bool {
        self.phase == Phase::Loading || self.loads_in_flight > 0
    }

    /// Mark a history fetch as started.  Change events are held back until
    /// it lands or fails.
    pub fn begin_load(&mut self) -> Option<(u64, ChatId)> {
        let chat = self.chat_id?;
        self.loads_in_flight += 1;
        Some((self.generation, chat))
    }

    /// Install a fetched history, then replay whatever arrived meanwhile.
    pub fn finish_load(&mut self, generation: u64, fetched: Vec<Message>) -> bool {
        if generation != self.generation {
            debug!(generation, current = self.generation, "dropping stale history");
            return false;
        }
        self.loads_in_flight = self.loads_in_flight.saturating_sub(1);
        self.phase = Phase::Ready;
        self.messages = fetched
            .into_iter()
            .filter(|m| !self.tentative.contains_key(&m.id))
            .collect();
        self.replay();
        true
    }

    /// A fetch failed.  A thread that never loaded stays `Loading` with its
    /// buffer intact so the next load can still replay it.
    pub fn fail_load(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.loads_in_flight = self.loads_in_flight.saturating_sub(1);
        if self.phase == Phase::Ready && self.loads_in_flight == 0 {
            self.replay();
            return true;
        }
        false
    }

    fn replay(&mut self) {
        if self.loads_in_flight > 0 {
            return;
        }
        let buffered = std::mem::take(&mut self.buffered);
        if !buffered.is_empty() {
            debug!(events = buffered.len(), "replaying buffered changes");
        }
        for event in &buffered {
            self.apply(event);
        }
    }

    /// Feed one change event from the chat's subscription.  Returns whether
    /// the visible list changed.
    pub fn apply_change(&mut self, generation: u64, event: &ChangeEvent) -> bool {
        if generation != self.generation {
            return false;
        }
        let Some(chat) = self.chat_id else {
            return false;
        };
        if event.record().and_then(row_chat) != Some(chat) {
            warn!(%chat, "ignoring change for another chat");
            return false;
        }
        if self.buffering() {
            self.buffered.push(event.clone());
            return false;
        }
        self.apply(event)
    }

    fn apply(&mut self, event: &ChangeEvent) -> bool {
        match event.kind {
            ChangeKind::Insert => {
                let Some(row) = &event.new else {
                    return false;
                };
                let message: Message = match serde_json::from_value(Value::Object(row.clone())) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "undecodable message insert");
                        return false;
                    }
                };
                if self.tentative.contains_key(&message.id)
                    || self.messages.iter().any(|m| m.id == message.id)
                {
                    return false;
                }
                // Appended as delivered; commit order is arrival order.
                self.messages.push(message);
                true
            }
            ChangeKind::Delete => {
                let Some(id) = event.old.as_ref().and_then(row_id) else {
                    return false;
                };
                let before = self.messages.len();
                self.messages.retain(|m| m.id != id);
                before != self.messages.len()
            }
            ChangeKind::Update => false,
        }
    }

    /// First phase of an optimistic delete: hide the message.  Returns
    /// `false` if it is not on screen.
    pub fn begin_delete(&mut self, id: MessageId) -> bool {
        let Some(chat_id) = self.chat_id else {
            return false;
        };
        let Some(index) = self.messages.iter().position(|m| m.id == id) else {
            return false;
        };
        let message = self.messages.remove(index);
        self.tentative.insert(
            id,
            Tentative {
                chat_id,
                index,
                message,
            },
        );
        true
    }

    /// The backend removed it; forget the stash.
    pub fn confirm_delete(&mut self, id: MessageId) {
        self.tentative.remove(&id);
    }

    /// The backend kept it.  The stash is handed back so it can be put back
    /// if the reconciling reload also fails.
    pub fn abandon_delete(&mut self, id: MessageId) -> Option<Tentative> {
        self.tentative.remove(&id)
    }

    /// Put an abandoned message back where it was, if that chat is still
    /// the one shown and nothing has re-added it.
    pub fn restore(&mut self, generation: u64, tentative: Tentative) -> bool {
        if generation != self.generation
            || self.chat_id != Some(tentative.chat_id)
            || self.messages.iter().any(|m| m.id == tentative.message.id)
        {
            return false;
        }
        let index = tentative.index.min(self.messages.len());
        self.messages.insert(index, tentative.message);
        true
    }
}
