//! # parley-demo
//!
//! Runs the two-user walkthrough against a local database: Alice opens a
//! chat with Bob and says hi, Bob sees it arrive live, then Bob tries to
//! delete Alice's message and the thread puts it back.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use parley_client::{init_tracing, AppState, ClientConfig, DeleteOutcome};
use parley_shared::UserId;
use parley_store::{Backend, Filter, LocalBackend, LocalServer, Select, Table};
use serde_json::{json, Value};
use tracing::info;

const WAIT: Duration = Duration::from_secs(5);

/// Look a user up by email, registering them on first run.
async fn ensure_user(admin: &LocalBackend, email: &str, name: &str) -> anyhow::Result<UserId> {
    let existing = admin
        .select(
            Select::from(Table::Users)
                .columns(&["id"])
                .filter(Filter::eq("email", email))
                .limit(1),
        )
        .await?;
    if let Some(id) = existing
        .first()
        .and_then(|row| row.get("id"))
        .and_then(Value::as_str)
    {
        return Ok(id.parse()?);
    }

    let id = UserId::new();
    let row = json!({ "id": id, "email": email, "full_name": name });
    let Value::Object(row) = row else {
        anyhow::bail!("user row is not an object");
    };
    admin.insert(Table::Users, vec![row]).await?;
    info!(%email, "registered user");
    Ok(id)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ClientConfig::from_env();
    let path = config.database_path()?;
    info!(path = %path.display(), "opening local backend");
    let server = LocalServer::open(&path)?;

    let admin = server.connect(None);
    let alice = ensure_user(&admin, "alice@example.com", "Alice").await?;
    let bob = ensure_user(&admin, "bob@example.com", "Bob").await?;

    let mut alice_screen = AppState::mount(Arc::new(server.connect(Some(alice))), &config).await?;
    let mut bob_screen = AppState::mount(Arc::new(server.connect(Some(bob))), &config).await?;

    let chat = alice_screen.start_chat_with(bob).await?;
    println!("chat {} between alice and bob", chat.id);

    bob_screen.select_chat(chat.id).await?;
    let mut bob_view = bob_screen.thread().watch();

    alice_screen.thread_mut().set_draft("hi");
    let hi = alice_screen
        .thread_mut()
        .submit()
        .await?
        .context("message was not sent")?;

    tokio::time::timeout(WAIT, bob_view.wait_for(|s| s.contains(hi)))
        .await
        .context("bob never saw the message")??;
    println!("bob received {hi}");

    let outcome = bob_screen.thread().delete_message(hi).await?;
    println!(
        "bob deleting alice's message: {outcome:?}, still shown: {}",
        bob_screen.thread().snapshot().contains(hi)
    );
    anyhow::ensure!(outcome != DeleteOutcome::Confirmed, "bob deleted alice's message");

    println!();
    for item in bob_screen.chat_list() {
        println!("[{}] {} | {}", item.initials, item.title, item.preview);
    }
    for row in bob_screen.thread_rows(&Local) {
        let who = if row.is_own { "me" } else { "them" };
        let time = row.time_label.unwrap_or_default();
        println!("{who:>4} {:<40} {time}", row.message.content);
    }

    Ok(())
}
