//! Chat directory: the conversations the signed-in user takes part in.
//!
//! The live list follows an invalidate-and-refetch policy: any change event
//! on the chats collection triggers a full reload rather than a patch.

use std::collections::HashSet;

use chrono::Utc;
use parley_shared::constants::{SEARCH_MIN_QUERY_CHARS, SEARCH_RESULT_LIMIT};
use parley_shared::UserId;
use parley_store::{
    Chat, ChatEntry, ChangeFilter, Direction, Embed, Filter, NewChat, Select, SharedBackend,
    Table, User,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::rows::{decode, encode};

const PROFILE_COLUMNS: &[&str] = &["id", "email", "full_name", "avatar_url"];
const USER_COLUMNS: &[&str] = &["id", "email", "full_name", "avatar_url", "created_at"];

#[derive(Clone)]
pub struct ChatDirectory {
    backend: SharedBackend,
    search_min_chars: usize,
    search_limit: usize,
}

/// Chats where `me` sits in `own_column`, with the profile referenced by
/// `other_column` embedded as `other_user`.
fn directional(me: UserId, own_column: &str, other_column: &str) -> Select {
    Select::from(Table::Chats)
        .embed(Embed::one("other_user", Table::Users, other_column, PROFILE_COLUMNS))
        .filter(Filter::eq(own_column, me))
        .order_by("created_at", Direction::Descending)
}

fn pair(first: UserId, second: UserId) -> Filter {
    Filter::and([Filter::eq("user1_id", first), Filter::eq("user2_id", second)])
}

impl ChatDirectory {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            search_min_chars: SEARCH_MIN_QUERY_CHARS,
            search_limit: SEARCH_RESULT_LIMIT,
        }
    }

    pub fn with_config(backend: SharedBackend, config: &ClientConfig) -> Self {
        Self {
            backend,
            search_min_chars: config.search_min_chars,
            search_limit: config.search_limit.max(1),
        }
    }

    /// Every chat `me` takes part in, newest first, each listed once.
    pub async fn list_chats(&self, me: UserId) -> Result<Vec<ChatEntry>> {
        let (as_first, as_second) = futures::try_join!(
            self.backend.select(directional(me, "user1_id", "user2_id")),
            self.backend.select(directional(me, "user2_id", "user1_id")),
        )?;

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(as_first.len() + as_second.len());
        for row in as_first.into_iter().chain(as_second) {
            let entry: ChatEntry = decode(row)?;
            if entry.chat.involves(me) && seen.insert(entry.chat.id) {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| b.chat.created_at.cmp(&a.chat.created_at));

        debug!(user = %me.short(), chats = entries.len(), "listed chats");
        Ok(entries)
    }

    /// The chat between `me` and `other`, created if neither ordering of
    /// the pair has one yet.
    ///
    /// The existence check and the insert are separate calls, so two callers
    /// racing on the same pair can both insert.  Duplicates are not detected
    /// or merged.
    pub async fn create_or_get_chat(&self, me: UserId, other: UserId) -> Result<Chat> {
        let existing = self
            .backend
            .select(
                Select::from(Table::Chats)
                    .filter(Filter::or([pair(me, other), pair(other, me)]))
                    .order_by("created_at", Direction::Ascending)
                    .limit(1),
            )
            .await?;

        if let Some(row) = existing.into_iter().next() {
            let chat: Chat = decode(row)?;
            debug!(chat = %chat.id, "chat already exists");
            return Ok(chat);
        }

        let row = encode(&NewChat {
            user1_id: me,
            user2_id: other,
            created_at: Utc::now(),
        })?;
        let inserted = self.backend.insert(Table::Chats, vec![row]).await?;
        let chat: Chat = decode(
            inserted
                .into_iter()
                .next()
                .ok_or(ClientError::MissingRow("chats"))?,
        )?;

        info!(chat = %chat.id, with = %other.short(), "chat created");
        Ok(chat)
    }

    /// Users whose email or display name contains `query` (case-insensitive),
    /// other than `excluding`.  Short queries return nothing without asking
    /// the backend.
    pub async fn search_users(
        &self,
        query: &str,
        excluding: UserId,
        limit: usize,
    ) -> Result<Vec<User>> {
        if query.chars().count() < self.search_min_chars {
            return Ok(Vec::new());
        }

        let rows = self
            .backend
            .select(
                Select::from(Table::Users)
                    .columns(USER_COLUMNS)
                    .filter(Filter::neq("id", excluding))
                    .filter(Filter::or([
                        Filter::ilike("email", query),
                        Filter::ilike("full_name", query),
                    ]))
                    .limit(limit.min(self.search_limit)),
            )
            .await?;

        rows.into_iter().map(decode).collect()
    }

    /// Load the list and keep it fresh until the returned handle is dropped.
    pub async fn watch(&self, me: UserId) -> Result<LiveChatList> {
        // Subscribe before the first load so no change slips in between.
        let mut subscription = self
            .backend
            .subscribe(ChangeFilter::all(Table::Chats))
            .await?;
        let initial = self.list_chats(me).await?;
        let (tx, rx) = watch::channel(initial);

        let directory = self.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let mut coalesced = 0usize;
                while subscription.try_recv().is_some() {
                    coalesced += 1;
                }
                debug!(kind = ?event.kind, coalesced, "chat change, reloading list");

                match directory.list_chats(me).await {
                    Ok(chats) => {
                        tx.send_replace(chats);
                    }
                    Err(e) => error!(error = %e, "Failed to reload chats"),
                }
            }
            debug!("chat list subscription ended");
        });

        Ok(LiveChatList { rx, task })
    }
}

/// A self-refreshing chat list.  Dropping it ends the subscription.
pub struct LiveChatList {
    rx: watch::Receiver<Vec<ChatEntry>>,
    task: JoinHandle<()>,
}

impl LiveChatList {
    pub fn current(&self) -> Vec<ChatEntry> {
        self.rx.borrow().clone()
    }

    /// Wait for the next reload.  Returns `false` once the list is dead.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    pub fn receiver(&self) -> watch::Receiver<Vec<ChatEntry>> {
        self.rx.clone()
    }
}

impl Drop for LiveChatList {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::testing::{eventually, wait_for, Fixture, TestBackend};

    #[tokio::test]
    async fn create_or_get_is_symmetric() {
        let fx = Fixture::new().await;
        let alice = ChatDirectory::new(fx.backend(fx.alice));
        let bob = ChatDirectory::new(fx.backend(fx.bob));

        let created = alice.create_or_get_chat(fx.alice, fx.bob).await.unwrap();
        assert_eq!(created.user1_id, fx.alice);
        assert_eq!(created.user2_id, fx.bob);

        let again = bob.create_or_get_chat(fx.bob, fx.alice).await.unwrap();
        assert_eq!(again.id, created.id);

        let listed = alice.list_chats(fx.alice).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn list_merges_both_directions_newest_first() {
        let fx = Fixture::new().await;
        let carol = UserId::new();
        fx.add_user(carol, "carol@example.com", Some("Carol")).await;

        let first = fx.chat_between(fx.alice, fx.bob).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = fx.chat_between(carol, fx.alice).await;
        fx.chat_between(fx.bob, carol).await;

        let directory = ChatDirectory::new(fx.backend(fx.alice));
        let listed = directory.list_chats(fx.alice).await.unwrap();

        let ids: Vec<_> = listed.iter().map(|e| e.chat.id).collect();
        assert_eq!(ids, vec![second, first]);
        assert!(listed.iter().all(|e| e.chat.involves(fx.alice)));

        let others: Vec<_> = listed
            .iter()
            .map(|e| e.other_user.as_ref().unwrap().email.clone())
            .collect();
        assert_eq!(others, vec!["carol@example.com", "bob@example.com"]);
    }

    #[tokio::test]
    async fn self_chat_is_listed_once() {
        let fx = Fixture::new().await;
        let own = fx.chat_between(fx.alice, fx.alice).await;

        let listed = ChatDirectory::new(fx.backend(fx.alice))
            .list_chats(fx.alice)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].chat.id, own);
    }

    #[tokio::test]
    async fn short_queries_skip_the_backend() {
        let fx = Fixture::new().await;
        let backend = Arc::new(TestBackend::new(fx.server.connect(Some(fx.alice))));
        let directory = ChatDirectory::new(backend.clone());

        assert!(directory.search_users("b", fx.alice, 5).await.unwrap().is_empty());
        assert!(directory.search_users("", fx.alice, 5).await.unwrap().is_empty());
        assert_eq!(backend.select_count(), 0);

        let found = directory.search_users("bo", fx.alice, 5).await.unwrap();
        assert_eq!(backend.select_count(), 1);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, fx.bob);
    }

    #[tokio::test]
    async fn search_excludes_self_matches_name_and_caps_results() {
        let fx = Fixture::new().await;
        for i in 0..8 {
            fx.add_user(UserId::new(), &format!("user{i}@example.com"), None)
                .await;
        }
        let directory = ChatDirectory::new(fx.backend(fx.alice));

        let found = directory
            .search_users("EXAMPLE.COM", fx.alice, 50)
            .await
            .unwrap();
        assert_eq!(found.len(), SEARCH_RESULT_LIMIT);
        assert!(found.iter().all(|u| u.id != fx.alice));

        let by_name = directory.search_users("liddell", fx.bob, 5).await.unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].id, fx.alice);

        let excluded = directory.search_users("liddell", fx.alice, 5).await.unwrap();
        assert!(excluded.is_empty());
    }

    #[tokio::test]
    async fn search_ignores_case_beyond_ascii() {
        let fx = Fixture::new().await;
        let emile = UserId::new();
        fx.add_user(emile, "ez@example.com", Some("Émile Zola")).await;
        let directory = ChatDirectory::new(fx.backend(fx.alice));

        for query in ["émile", "ÉMILE", "Émile"] {
            let found = directory.search_users(query, fx.alice, 5).await.unwrap();
            let ids: Vec<_> = found.iter().map(|u| u.id).collect();
            assert_eq!(ids, vec![emile], "query {query:?}");
        }
    }

    #[tokio::test]
    async fn live_list_reloads_on_chat_changes() {
        let fx = Fixture::new().await;
        let directory = ChatDirectory::new(fx.backend(fx.bob));
        let live = directory.watch(fx.bob).await.unwrap();
        assert!(live.current().is_empty());

        let alice = ChatDirectory::new(fx.backend(fx.alice));
        let chat = alice.create_or_get_chat(fx.alice, fx.bob).await.unwrap();

        let mut rx = live.receiver();
        let listed = wait_for(&mut rx, |chats| chats.len() == 1).await;
        assert_eq!(listed[0].chat.id, chat.id);
        assert_eq!(listed[0].other_user.as_ref().unwrap().id, fx.alice);

        fx.post(chat.id, fx.alice, "see you").await;
        let listed = wait_for(&mut rx, |chats| {
            chats
                .first()
                .and_then(|e| e.chat.last_message.as_deref())
                == Some("see you")
        })
        .await;
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn dropping_live_list_unsubscribes() {
        let fx = Fixture::new().await;
        let directory = ChatDirectory::new(fx.backend(fx.alice));
        let live = directory.watch(fx.alice).await.unwrap();
        assert_eq!(fx.server.subscriber_count(), 1);

        drop(live);
        eventually(|| fx.server.subscriber_count() == 0).await;
    }
}
