use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use parley_shared::{ChatId, MessageId, UserId};
use parley_store::{
    ChangeFilter, ChangeKind, Direction, Embed, Filter, Message, NewMessage, ReplyPreview,
    Select, SharedBackend, Subscription, Table,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::state::{Phase, ThreadSnapshot, ThreadState};
use crate::error::{ClientError, Result};
use crate::rows::{decode, encode};

const MESSAGE_COLUMNS: &[&str] = &[
    "id",
    "content",
    "sender_id",
    "created_at",
    "is_read",
    "chat_id",
    "reply_to",
];
const REPLY_COLUMNS: &[&str] = &["id", "content", "sender_id"];

/// Text being typed and the message it answers, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Composer {
    pub draft: String,
    pub reply_target: Option<ReplyPreview>,
}

impl Composer {
    fn clear(&mut self) {
        self.draft.clear();
        self.reply_target = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The backend removed the message.
    Confirmed,
    /// The backend kept it; the thread was reconciled.
    RolledBack,
    /// Nothing to do: no sender, no open chat, or the message is not shown.
    Skipped,
}

type Shared = Arc<Mutex<ThreadState>>;

fn lock(state: &Shared) -> Result<MutexGuard<'_, ThreadState>> {
    state.lock().map_err(|_| ClientError::LockPoisoned)
}

pub struct MessageThread {
    backend: SharedBackend,
    me: Option<UserId>,
    state: Shared,
    view: Arc<watch::Sender<ThreadSnapshot>>,
    pump: Option<JoinHandle<()>>,
    composer: Composer,
}

impl MessageThread {
    /// `me` is the sender for outgoing messages and deletes; without one
    /// the thread is read-only.
    pub fn new(backend: SharedBackend, me: Option<UserId>) -> Self {
        let (view, _) = watch::channel(ThreadSnapshot::idle());
        Self {
            backend,
            me,
            state: Arc::new(Mutex::new(ThreadState::default())),
            view: Arc::new(view),
            pump: None,
            composer: Composer::default(),
        }
    }

    pub fn snapshot(&self) -> ThreadSnapshot {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ThreadSnapshot> {
        self.view.subscribe()
    }

    pub fn chat_id(&self) -> Option<ChatId> {
        self.view.borrow().chat_id
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.composer.draft = text.into();
    }

    pub fn reply_to(&mut self, message: &Message) {
        self.composer.reply_target = Some(message.preview());
    }

    pub fn cancel_reply(&mut self) {
        self.composer.reply_target = None;
    }

    fn publish(&self, state: &ThreadState) {
        self.view.send_replace(state.snapshot());
    }

    fn stop_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }

    /// Show `chat`: drop the previous chat's subscription, subscribe to
    /// this one, then fetch its history.
    ///
    /// If subscribing fails the thread goes back to idle.  If only the
    /// history fetch fails the thread stays `Loading` with its subscription
    /// live and buffering; [`reload`](Self::reload) retries the fetch.
    pub async fn open(&mut self, chat: ChatId) -> Result<()> {
        self.stop_pump();
        self.composer.clear();

        let generation = {
            let mut state = lock(&self.state)?;
            let generation = state.open(chat);
            self.publish(&state);
            generation
        };
        info!(%chat, "opening thread");

        let subscribed = self
            .backend
            .subscribe(
                ChangeFilter::kinds(Table::Messages, &[ChangeKind::Insert, ChangeKind::Delete])
                    .where_eq("chat_id", chat),
            )
            .await;
        let subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(%chat, error = %e, "Failed to subscribe to messages");
                self.close();
                return Err(e.into());
            }
        };
        self.pump = Some(spawn_pump(
            subscription,
            generation,
            Arc::clone(&self.state),
            Arc::clone(&self.view),
        ));

        self.reload().await
    }

    /// Back to idle; the subscription ends here.
    pub fn close(&mut self) {
        self.stop_pump();
        self.composer.clear();
        if let Ok(mut state) = lock(&self.state) {
            state.close();
            self.publish(&state);
        }
    }

    async fn fetch(&self, chat: ChatId) -> Result<Vec<Message>> {
        let rows = self
            .backend
            .select(
                Select::from(Table::Messages)
                    .columns(MESSAGE_COLUMNS)
                    .embed(Embed::many(
                        "reply_to_message",
                        Table::Messages,
                        "reply_to",
                        REPLY_COLUMNS,
                    ))
                    .filter(Filter::eq("chat_id", chat))
                    .order_by("created_at", Direction::Ascending),
            )
            .await?;
        rows.into_iter().map(decode).collect()
    }

    /// Replace the list with the backend's, keeping changes that arrive
    /// while the fetch is in flight.
    pub async fn reload(&self) -> Result<()> {
        let begun = lock(&self.state)?.begin_load();
        let Some((generation, chat)) = begun else {
            return Err(ClientError::NoOpenChat);
        };

        match self.fetch(chat).await {
            Ok(messages) => {
                let count = messages.len();
                let mut state = lock(&self.state)?;
                if state.finish_load(generation, messages) {
                    self.publish(&state);
                    debug!(%chat, count, "messages loaded");
                }
                Ok(())
            }
            Err(e) => {
                error!(%chat, error = %e, "Failed to load messages");
                let mut state = lock(&self.state)?;
                if state.fail_load(generation) {
                    self.publish(&state);
                }
                Err(e)
            }
        }
    }

    /// Insert a message into the open chat.  Blank content or a missing
    /// sender is a local no-op.  The new message is not shown until its
    /// insert event comes back.  The composer is cleared once the insert
    /// has been issued, whether or not it succeeded.
    pub async fn send_message(
        &mut self,
        content: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Option<MessageId>> {
        let Some(sender) = self.me else {
            return Ok(None);
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        let Some(chat) = self.chat_id() else {
            return Err(ClientError::NoOpenChat);
        };

        let row = encode(&NewMessage {
            chat_id: chat,
            sender_id: sender,
            content: content.to_string(),
            reply_to,
            created_at: Utc::now(),
        })?;
        let result = self.backend.insert(Table::Messages, vec![row]).await;
        self.composer.clear();

        let inserted = match result {
            Ok(rows) => rows,
            Err(e) => {
                error!(%chat, error = %e, "Failed to send message");
                return Err(e.into());
            }
        };
        let message: Message = decode(
            inserted
                .into_iter()
                .next()
                .ok_or(ClientError::MissingRow("messages"))?,
        )?;
        debug!(%chat, message = %message.id, "message sent");
        Ok(Some(message.id))
    }

    /// Send the composer's draft as a reply to its reply target, if any.
    pub async fn submit(&mut self) -> Result<Option<MessageId>> {
        let draft = self.composer.draft.clone();
        let reply_to = self.composer.reply_target.as_ref().map(|r| r.id);
        self.send_message(&draft, reply_to).await
    }

    /// Delete one of the caller's own messages.  It disappears at once; if
    /// the backend refuses (or finds nothing to delete under the sender
    /// filter), the thread is reloaded.  If that reload fails too, the
    /// message is put back where it was.
    pub async fn delete_message(&self, id: MessageId) -> Result<DeleteOutcome> {
        let Some(me) = self.me else {
            return Ok(DeleteOutcome::Skipped);
        };
        let generation = {
            let mut state = lock(&self.state)?;
            if state.phase() != Phase::Ready || !state.begin_delete(id) {
                return Ok(DeleteOutcome::Skipped);
            }
            self.publish(&state);
            state.generation()
        };

        let result = self
            .backend
            .delete(
                Table::Messages,
                vec![Filter::eq("id", id), Filter::eq("sender_id", me)],
            )
            .await;

        match result {
            Ok(removed) if !removed.is_empty() => {
                lock(&self.state)?.confirm_delete(id);
                info!(message = %id, "message deleted");
                return Ok(DeleteOutcome::Confirmed);
            }
            Ok(_) => warn!(message = %id, "delete matched nothing, reconciling"),
            Err(e) => error!(message = %id, error = %e, "Failed to delete message"),
        }

        let stash = lock(&self.state)?.abandon_delete(id);
        if let Err(e) = self.reload().await {
            warn!(message = %id, error = %e, "reload failed, restoring message locally");
            if let Some(stash) = stash {
                let mut state = lock(&self.state)?;
                if state.restore(generation, stash) {
                    self.publish(&state);
                }
            }
        }
        Ok(DeleteOutcome::RolledBack)
    }
}

impl Drop for MessageThread {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

/// Feed the chat's change events into the state until aborted.
fn spawn_pump(
    mut subscription: Subscription,
    generation: u64,
    state: Shared,
    view: Arc<watch::Sender<ThreadSnapshot>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let Ok(mut guard) = state.lock() else {
                error!("thread state poisoned, stopping event pump");
                break;
            };
            if guard.apply_change(generation, &event) {
                view.send_replace(guard.snapshot());
            }
        }
        debug!("message subscription ended");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use parley_store::Backend;

    use super::*;
    use crate::testing::{eventually, wait_for, Fixture, TestBackend};

    async fn thread_for(fx: &Fixture, who: UserId, chat: ChatId) -> MessageThread {
        let mut thread = MessageThread::new(fx.backend(who), Some(who));
        thread.open(chat).await.unwrap();
        thread
    }

    fn contents(snapshot: &ThreadSnapshot) -> Vec<&str> {
        snapshot.messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn loads_in_chronological_order_with_reply_previews() {
        let fx = Fixture::new().await;
        let chat = fx.chat_between(fx.alice, fx.bob).await;
        let first = fx.post(chat, fx.alice, "first").await;
        fx.post(chat, fx.bob, "second").await;

        let mut bob = thread_for(&fx, fx.bob, chat).await;
        let original = bob.snapshot().messages[0].clone();
        bob.reply_to(&original);
        bob.set_draft("answering");
        bob.submit().await.unwrap();

        let alice = thread_for(&fx, fx.alice, chat).await;
        let snapshot = alice.snapshot();
        assert_eq!(snapshot.phase, Phase::Ready);
        assert_eq!(contents(&snapshot), vec!["first", "second", "answering"]);
        assert!(snapshot
            .messages
            .windows(2)
            .all(|w| w[0].created_at <= w[1].created_at));

        let reply = &snapshot.messages[2];
        assert_eq!(reply.reply_to, Some(first));
        let preview = reply.reply_to_message.as_ref().unwrap();
        assert_eq!(preview.id, first);
        assert_eq!(preview.content, "first");
        assert_eq!(preview.sender_id, fx.alice);
    }

    #[tokio::test]
    async fn sent_message_arrives_through_the_subscription() {
        let fx = Fixture::new().await;
        let chat = fx.chat_between(fx.alice, fx.bob).await;
        let mut alice = thread_for(&fx, fx.alice, chat).await;
        let bob = thread_for(&fx, fx.bob, chat).await;

        let mut bob_view = bob.watch();
        let mut alice_view = alice.watch();
        let id = alice.send_message("hi", None).await.unwrap().unwrap();

        let seen = wait_for(&mut bob_view, |s| s.contains(id)).await;
        assert_eq!(contents(&seen), vec!["hi"]);
        assert_eq!(seen.messages[0].sender_id, fx.alice);
        wait_for(&mut alice_view, |s| s.contains(id)).await;
    }

    #[tokio::test]
    async fn blank_messages_are_not_sent() {
        let fx = Fixture::new().await;
        let chat = fx.chat_between(fx.alice, fx.bob).await;
        let mut alice = thread_for(&fx, fx.alice, chat).await;

        alice.set_draft("   \n");
        assert_eq!(alice.submit().await.unwrap(), None);
        assert_eq!(alice.composer().draft, "   \n");
        assert!(fx.stored_message_ids(chat).await.is_empty());

        let mut anonymous = MessageThread::new(fx.backend(fx.alice), None);
        anonymous.open(chat).await.unwrap();
        assert_eq!(anonymous.send_message("hello", None).await.unwrap(), None);
        assert!(fx.stored_message_ids(chat).await.is_empty());
    }

    #[tokio::test]
    async fn composer_is_cleared_even_when_the_insert_fails() {
        let fx = Fixture::new().await;
        let chat = fx.chat_between(fx.alice, fx.bob).await;
        let mut alice = thread_for(&fx, fx.alice, chat).await;
        let target = fx.post(chat, fx.bob, "question").await;
        let mut view = alice.watch();
        let question = wait_for(&mut view, |s| s.contains(target)).await.messages[0].clone();

        // The chat disappears under the thread, so the insert hits the
        // foreign key.
        fx.admin()
            .delete(Table::Messages, vec![Filter::eq("chat_id", chat)])
            .await
            .unwrap();
        fx.admin()
            .delete(Table::Chats, vec![Filter::eq("id", chat)])
            .await
            .unwrap();

        alice.reply_to(&question);
        alice.set_draft("answer");
        assert!(alice.submit().await.is_err());
        assert_eq!(alice.composer(), &Composer::default());
    }

    #[tokio::test]
    async fn optimistic_delete_hides_before_confirmation() {
        let fx = Fixture::new().await;
        let chat = fx.chat_between(fx.alice, fx.bob).await;
        let id = fx.post(chat, fx.alice, "oops").await;
        fx.post(chat, fx.alice, "fine").await;

        let (backend, gate) = TestBackend::gated(fx.server.connect(Some(fx.alice)));
        let mut thread = MessageThread::new(Arc::new(backend), Some(fx.alice));
        thread.open(chat).await.unwrap();
        let thread = Arc::new(thread);

        let deleting = {
            let thread = Arc::clone(&thread);
            tokio::spawn(async move { thread.delete_message(id).await })
        };
        gate.entered.notified().await;
        assert!(!thread.snapshot().contains(id));
        assert_eq!(fx.stored_message_ids(chat).await.len(), 2);

        gate.release.notify_one();
        assert_eq!(deleting.await.unwrap().unwrap(), DeleteOutcome::Confirmed);
        assert_eq!(fx.stored_message_ids(chat).await.len(), 1);
        assert_eq!(contents(&thread.snapshot()), vec!["fine"]);
    }

    #[tokio::test]
    async fn non_sender_delete_is_restored_by_reload() {
        let fx = Fixture::new().await;
        let chat = fx.chat_between(fx.alice, fx.bob).await;
        let id = fx.post(chat, fx.alice, "mine").await;

        let backend = Arc::new(TestBackend::new(fx.server.connect(Some(fx.bob))));
        let mut bob = MessageThread::new(backend.clone(), Some(fx.bob));
        bob.open(chat).await.unwrap();
        let mut view = bob.watch();
        let selects = backend.select_count();

        assert_eq!(bob.delete_message(id).await.unwrap(), DeleteOutcome::RolledBack);
        assert_eq!(backend.select_count(), selects + 1);
        assert_eq!(fx.stored_message_ids(chat).await, vec![id.to_string()]);
        let restored = wait_for(&mut view, |s| s.contains(id)).await;
        assert_eq!(contents(&restored), vec!["mine"]);
    }

    #[tokio::test]
    async fn failed_delete_and_failed_reload_restore_in_place() {
        let fx = Fixture::new().await;
        let chat = fx.chat_between(fx.alice, fx.bob).await;
        fx.post(chat, fx.alice, "a").await;
        let id = fx.post(chat, fx.alice, "b").await;
        fx.post(chat, fx.alice, "c").await;

        let backend = Arc::new(TestBackend::new(fx.server.connect(Some(fx.alice))));
        let mut alice = MessageThread::new(backend.clone(), Some(fx.alice));
        alice.open(chat).await.unwrap();

        backend.fail_deletes.store(true, Ordering::SeqCst);
        backend.fail_selects.store(true, Ordering::SeqCst);
        assert_eq!(alice.delete_message(id).await.unwrap(), DeleteOutcome::RolledBack);
        assert_eq!(contents(&alice.snapshot()), vec!["a", "b", "c"]);
        assert_eq!(fx.stored_message_ids(chat).await.len(), 3);
    }

    #[tokio::test]
    async fn deleting_an_unknown_message_is_skipped() {
        let fx = Fixture::new().await;
        let chat = fx.chat_between(fx.alice, fx.bob).await;
        let alice = thread_for(&fx, fx.alice, chat).await;
        assert_eq!(
            alice.delete_message(MessageId::new()).await.unwrap(),
            DeleteOutcome::Skipped
        );

        let idle = MessageThread::new(fx.backend(fx.alice), Some(fx.alice));
        assert_eq!(idle.snapshot().phase, Phase::Idle);
        assert_eq!(
            idle.delete_message(MessageId::new()).await.unwrap(),
            DeleteOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn switching_chats_ignores_the_previous_one() {
        let fx = Fixture::new().await;
        let carol = UserId::new();
        fx.add_user(carol, "carol@example.com", None).await;
        let with_bob = fx.chat_between(fx.alice, fx.bob).await;
        let with_carol = fx.chat_between(fx.alice, carol).await;
        fx.post(with_bob, fx.bob, "from bob").await;

        let mut alice = thread_for(&fx, fx.alice, with_bob).await;
        assert_eq!(contents(&alice.snapshot()), vec!["from bob"]);
        assert_eq!(fx.server.subscriber_count(), 1);

        alice.open(with_carol).await.unwrap();
        eventually(|| fx.server.subscriber_count() == 1).await;
        let mut view = alice.watch();

        fx.post(with_bob, fx.bob, "late from bob").await;
        let marker = fx.post(with_carol, carol, "from carol").await;
        let seen = wait_for(&mut view, |s| s.contains(marker)).await;
        assert_eq!(seen.chat_id, Some(with_carol));
        assert_eq!(contents(&seen), vec!["from carol"]);
    }

    #[tokio::test]
    async fn close_and_drop_end_the_subscription() {
        let fx = Fixture::new().await;
        let chat = fx.chat_between(fx.alice, fx.bob).await;

        let mut alice = thread_for(&fx, fx.alice, chat).await;
        assert_eq!(fx.server.subscriber_count(), 1);
        alice.close();
        eventually(|| fx.server.subscriber_count() == 0).await;
        assert_eq!(alice.snapshot(), ThreadSnapshot::idle());

        let bob = thread_for(&fx, fx.bob, chat).await;
        assert_eq!(fx.server.subscriber_count(), 1);
        drop(bob);
        eventually(|| fx.server.subscriber_count() == 0).await;

        // Nothing left to notify; posting still works.
        tokio::time::sleep(Duration::from_millis(10)).await;
        fx.post(chat, fx.alice, "after").await;
    }

    #[tokio::test]
    async fn failed_subscribe_leaves_the_thread_idle() {
        let fx = Fixture::new().await;
        let chat = fx.chat_between(fx.alice, fx.bob).await;
        let backend = Arc::new(TestBackend::new(fx.server.connect(Some(fx.alice))));
        backend.fail_subscribes.store(true, Ordering::SeqCst);

        let mut alice = MessageThread::new(backend.clone(), Some(fx.alice));
        assert!(alice.open(chat).await.is_err());
        assert_eq!(alice.snapshot(), ThreadSnapshot::idle());
        assert_eq!(backend.select_count(), 0);
        assert!(matches!(alice.reload().await, Err(ClientError::NoOpenChat)));

        backend.fail_subscribes.store(false, Ordering::SeqCst);
        alice.open(chat).await.unwrap();
        assert_eq!(alice.snapshot().phase, Phase::Ready);
        assert_eq!(fx.server.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn failed_first_load_keeps_listening_until_reload() {
        let fx = Fixture::new().await;
        let chat = fx.chat_between(fx.alice, fx.bob).await;
        fx.post(chat, fx.bob, "before").await;
        let backend = Arc::new(TestBackend::new(fx.server.connect(Some(fx.alice))));
        backend.fail_selects.store(true, Ordering::SeqCst);

        let mut alice = MessageThread::new(backend.clone(), Some(fx.alice));
        assert!(alice.open(chat).await.is_err());
        assert_eq!(alice.snapshot().phase, Phase::Loading);
        assert_eq!(fx.server.subscriber_count(), 1);

        let during = fx.post(chat, fx.bob, "during").await;

        backend.fail_selects.store(false, Ordering::SeqCst);
        alice.reload().await.unwrap();
        let mut view = alice.watch();
        let seen = wait_for(&mut view, |s| s.contains(during)).await;
        assert_eq!(seen.phase, Phase::Ready);
        assert_eq!(contents(&seen), vec!["before", "during"]);
    }

    #[tokio::test]
    async fn reload_without_a_chat_is_an_error() {
        let fx = Fixture::new().await;
        let thread = MessageThread::new(fx.backend(fx.alice), Some(fx.alice));
        assert!(matches!(thread.reload().await, Err(ClientError::NoOpenChat)));
    }
}
