pub mod auth;
pub mod config;
pub mod conversation;
pub mod credentials;
mod error;
pub mod presence;
pub mod reconciler;
pub mod session;
pub mod typing;

use tracing_subscriber::{fmt, EnvFilter};

pub use auth::{AuthEvent, CredentialManager};
pub use config::ClientConfig;
pub use conversation::ConversationView;
pub use credentials::{
    Credential, CredentialError, CredentialSlot, CredentialStore, FileCredentialStore,
    MemoryCredentialStore,
};
pub use error::{ClientError, Result};
pub use presence::PresenceTracker;
pub use session::Session;
pub use typing::{typing_text, TypingCoordinator};

/// Install the global fmt subscriber. `RUST_LOG` overrides the default
/// filter. Does nothing if a subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("parley_client=debug,parley_net=debug,parley_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
