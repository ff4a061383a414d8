//! Headless client: log in, list conversations, optionally follow one.
//!
//! Usage: `parley-client [conversation-id]`. The credential comes from
//! `PARLEY_TOKEN` or, failing that, the one persisted by a previous run.

use anyhow::{bail, Context};
use tracing::{info, warn};

use parley_client::{init_tracing, ClientConfig, Session};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting parley client v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(api = %config.api_url, socket = %config.socket_url, "Loaded configuration");

    let session = Session::from_config(config).context("failed to build session")?;

    let identity = match std::env::var("PARLEY_TOKEN").ok().filter(|t| !t.is_empty()) {
        Some(token) => session.login(token).await.context("login failed")?,
        None => match session.resume().await.context("resume failed")? {
            Some(identity) => identity,
            None => bail!("no credential: set PARLEY_TOKEN"),
        },
    };
    println!("Logged in as {} ({})", identity.user.name, identity.user.id);

    for conversation in session.store().conversations() {
        println!(
            "{:>3}  {}  {}  {}",
            conversation.unread_count,
            conversation.id,
            conversation.participant.name,
            conversation.last_message.as_deref().unwrap_or("")
        );
    }

    let Some(id) = std::env::args().nth(1) else {
        session.disconnect();
        return Ok(());
    };

    let mut view = session.open_conversation(id).await?;
    for message in view.messages().iter().rev() {
        println!("[{}] {}: {}", message.created_at.format("%H:%M"), message.sender_id, message.content);
    }

    let mut changes = session.store().watch_changes();
    let mut typing = view.typing().watch_changes();
    let mut shown = view.messages().first().map(|m| m.id.clone());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let messages = view.messages();
                let fresh = messages
                    .iter()
                    .take_while(|m| Some(&m.id) != shown.as_ref())
                    .collect::<Vec<_>>();
                for message in fresh.iter().rev() {
                    println!("[{}] {}: {}", message.created_at.format("%H:%M"), message.sender_id, message.content);
                }
                shown = messages.first().map(|m| m.id.clone());
            }
            changed = typing.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(text) = view.typing_text() {
                    println!("  {text}");
                }
            }
        }
    }

    view.close();
    if let Some(error) = session.store().error() {
        warn!(error = %error, "Last store error");
    }
    session.disconnect();
    info!("Client stopped");
    Ok(())
}
