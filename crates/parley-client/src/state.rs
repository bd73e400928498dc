//! The messages screen: everything a signed-in user sees at once.
//!
//! [`AppState`] owns both live channels of the screen, the chat list and
//! the open thread.  Dropping it tears both down.

use chrono::TimeZone;
use parley_shared::{ChatId, UserId};
use parley_store::{Chat, ChatEntry, SharedBackend, User};
use tracing::info;

use crate::config::ClientConfig;
use crate::directory::{ChatDirectory, LiveChatList};
use crate::error::Result;
use crate::session::Session;
use crate::thread::MessageThread;
use crate::view::{self, ChatListItem, MessageRow};

pub struct AppState {
    /// The signed-in principal.  Fixed for the lifetime of the screen.
    me: UserId,

    directory: ChatDirectory,

    /// Chat list, reloaded on every chat change.
    chats: LiveChatList,

    /// The open chat's messages.  Idle until a chat is selected.
    thread: MessageThread,

    /// Results of the last user search.
    search_results: Vec<User>,

    search_limit: usize,
}

impl AppState {
    /// Mount the screen for the signed-in user.  Fails with
    /// `Unauthenticated` when nobody is signed in.
    pub async fn mount(backend: SharedBackend, config: &ClientConfig) -> Result<Self> {
        let me = Session::new(backend.clone()).require_user().await?;
        let directory = ChatDirectory::with_config(backend.clone(), config);
        let chats = directory.watch(me).await?;

        info!(user = %me.short(), chats = chats.current().len(), "messages screen mounted");
        Ok(Self {
            me,
            directory,
            chats,
            thread: MessageThread::new(backend, Some(me)),
            search_results: Vec::new(),
            search_limit: config.search_limit.max(1),
        })
    }

    pub fn me(&self) -> UserId {
        self.me
    }

    pub fn chats(&self) -> &LiveChatList {
        &self.chats
    }

    pub fn chat_list(&self) -> Vec<ChatListItem> {
        view::chat_list(&self.chats.current(), self.me)
    }

    pub fn thread(&self) -> &MessageThread {
        &self.thread
    }

    pub fn thread_mut(&mut self) -> &mut MessageThread {
        &mut self.thread
    }

    pub fn thread_rows<Tz: TimeZone>(&self, zone: &Tz) -> Vec<MessageRow>
    where
        Tz::Offset: std::fmt::Display,
    {
        view::thread_rows(&self.thread.snapshot().messages, Some(self.me), zone)
    }

    /// The listed entry for the open chat, if it is in the list yet.
    pub fn selected(&self) -> Option<ChatEntry> {
        let open = self.thread.chat_id()?;
        self.chats.current().into_iter().find(|e| e.chat.id == open)
    }

    pub async fn select_chat(&mut self, chat: ChatId) -> Result<()> {
        self.thread.open(chat).await
    }

    pub fn search_results(&self) -> &[User] {
        &self.search_results
    }

    pub async fn search(&mut self, query: &str) -> Result<&[User]> {
        self.search_results = self
            .directory
            .search_users(query, self.me, self.search_limit)
            .await?;
        Ok(&self.search_results)
    }

    /// Open the chat with `other`, creating it first if needed.
    pub async fn start_chat_with(&mut self, other: UserId) -> Result<Chat> {
        let chat = self.directory.create_or_get_chat(self.me, other).await?;
        self.search_results.clear();
        self.thread.open(chat.id).await?;
        Ok(chat)
    }
}
