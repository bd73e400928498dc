//! Shared fixtures for the client's unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parley_shared::{ChatId, MessageId, UserId};
use parley_store::{
    Backend, BackendError, ChangeFilter, Filter, LocalBackend, LocalServer, Row, Select,
    SharedBackend, Subscription, Table,
};
use serde_json::{json, Value};
use tokio::sync::{watch, Notify};

const WAIT: Duration = Duration::from_secs(2);

fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

/// A local server with two registered users.
pub(crate) struct Fixture {
    pub server: Arc<LocalServer>,
    pub alice: UserId,
    pub bob: UserId,
}

impl Fixture {
    pub async fn new() -> Self {
        let server = LocalServer::open_in_memory().unwrap();
        let fixture = Self {
            server,
            alice: UserId::new(),
            bob: UserId::new(),
        };
        fixture.add_user(fixture.alice, "alice@example.com", Some("Alice Liddell")).await;
        fixture.add_user(fixture.bob, "bob@example.com", None).await;
        fixture
    }

    pub fn admin(&self) -> LocalBackend {
        self.server.connect(None)
    }

    pub fn backend(&self, who: UserId) -> SharedBackend {
        Arc::new(self.server.connect(Some(who)))
    }

    pub async fn add_user(&self, id: UserId, email: &str, full_name: Option<&str>) {
        self.admin()
            .insert(
                Table::Users,
                vec![row(json!({ "id": id, "email": email, "full_name": full_name }))],
            )
            .await
            .unwrap();
    }

    pub async fn chat_between(&self, a: UserId, b: UserId) -> ChatId {
        let rows = self
            .admin()
            .insert(Table::Chats, vec![row(json!({ "user1_id": a, "user2_id": b }))])
            .await
            .unwrap();
        rows[0]["id"].as_str().unwrap().parse().unwrap()
    }

    pub async fn post(&self, chat: ChatId, sender: UserId, content: &str) -> MessageId {
        let rows = self
            .admin()
            .insert(
                Table::Messages,
                vec![row(json!({
                    "chat_id": chat,
                    "sender_id": sender,
                    "content": content,
                    "created_at": Utc::now(),
                }))],
            )
            .await
            .unwrap();
        rows[0]["id"].as_str().unwrap().parse().unwrap()
    }

    pub async fn stored_message_ids(&self, chat: ChatId) -> Vec<String> {
        self.admin()
            .select(
                Select::from(Table::Messages)
                    .columns(&["id"])
                    .filter(Filter::eq("chat_id", chat)),
            )
            .await
            .unwrap()
            .into_iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect()
    }
}

/// Parks `delete` calls until released, so tests can look at the
/// optimistic state in between.
#[derive(Default)]
pub(crate) struct DeleteGate {
    pub entered: Notify,
    pub release: Notify,
}

/// Wraps a [`LocalBackend`] with call counting and fault injection.
pub(crate) struct TestBackend {
    inner: LocalBackend,
    pub selects: AtomicUsize,
    pub fail_selects: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub fail_subscribes: AtomicBool,
    pub gate: Option<Arc<DeleteGate>>,
}

impl TestBackend {
    pub fn new(inner: LocalBackend) -> Self {
        Self {
            inner,
            selects: AtomicUsize::new(0),
            fail_selects: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            fail_subscribes: AtomicBool::new(false),
            gate: None,
        }
    }

    pub fn gated(inner: LocalBackend) -> (Self, Arc<DeleteGate>) {
        let gate = Arc::new(DeleteGate::default());
        let mut backend = Self::new(inner);
        backend.gate = Some(Arc::clone(&gate));
        (backend, gate)
    }

    pub fn select_count(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for TestBackend {
    async fn select(&self, query: Select) -> Result<Vec<Row>, BackendError> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        if self.fail_selects.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("injected select failure".into()));
        }
        self.inner.select(query).await
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<Vec<Row>, BackendError> {
        self.inner.insert(table, rows).await
    }

    async fn delete(&self, table: Table, filters: Vec<Filter>) -> Result<Vec<Row>, BackendError> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("injected delete failure".into()));
        }
        self.inner.delete(table, filters).await
    }

    async fn current_user(&self) -> Result<Option<UserId>, BackendError> {
        self.inner.current_user().await
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, BackendError> {
        if self.fail_subscribes.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("injected subscribe failure".into()));
        }
        self.inner.subscribe(filter).await
    }
}

/// Wait until the watched value satisfies `pred`, failing the test after a
/// couple of seconds.
pub(crate) async fn wait_for<T: Clone>(
    rx: &mut watch::Receiver<T>,
    pred: impl Fn(&T) -> bool,
) -> T {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        {
            let current = rx.borrow_and_update();
            if pred(&current) {
                return current.clone();
            }
        }
        tokio::time::timeout_at(deadline, rx.changed())
            .await
            .expect("timed out waiting for state")
            .expect("watch sender dropped");
    }
}

/// Poll `cond` until it holds.
pub(crate) async fn eventually(cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
