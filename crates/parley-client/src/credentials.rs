//! Bearer credential and its durable storage.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;

use parley_shared::constants::RENEWAL_LEAD_TIME;
use parley_store::BearerSource;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("No platform data directory available")]
    NoDataDir,

    #[error("Credential I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque bearer token plus the expiry read from its payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let expires_at = decode_expiry(&token);
        Self { token, expires_at }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// `None` when the token carries no readable expiry.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Time left before expiry. `None` once expired or when unknown.
    pub fn time_to_expiry(&self, now: DateTime<Utc>) -> Option<Duration> {
        let remaining = (self.expires_at? - now).to_std().ok()?;
        (!remaining.is_zero()).then_some(remaining)
    }

    /// Unknown expiry counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.time_to_expiry(now).is_none()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<i64>,
}

/// Read the `exp` claim (seconds since the epoch) from a JWT-shaped token.
pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp?, 0)
}

/// How long to wait before renewing a credential expiring at `expires_at`.
pub fn renewal_delay(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    let Some(expires_at) = expires_at else {
        return Duration::ZERO;
    };
    let lead = chrono::Duration::seconds(RENEWAL_LEAD_TIME.as_secs() as i64);
    (expires_at - now - lead).to_std().unwrap_or(Duration::ZERO)
}

// ---------------------------------------------------------------------------
// Shared slot
// ---------------------------------------------------------------------------

/// Current credential, shared between the REST adapter (as its bearer
/// source) and the credential manager (its only writer).
#[derive(Clone)]
pub struct CredentialSlot {
    tx: Arc<watch::Sender<Option<Credential>>>,
}

impl CredentialSlot {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> Option<Credential> {
        self.tx.borrow().clone()
    }

    pub fn set(&self, credential: Option<Credential>) {
        self.tx.send_replace(credential);
    }

    pub fn watch(&self) -> watch::Receiver<Option<Credential>> {
        self.tx.subscribe()
    }
}

impl Default for CredentialSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl BearerSource for CredentialSlot {
    fn bearer(&self) -> Option<String> {
        self.tx.borrow().as_ref().map(|c| c.token.clone())
    }
}

// ---------------------------------------------------------------------------
// Durable storage
// ---------------------------------------------------------------------------

/// Durable home of the bearer token. Nothing else is persisted.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<String>, CredentialError>;
    fn save(&self, token: &str) -> Result<(), CredentialError>;
    fn clear(&self) -> Result<(), CredentialError>;
}

/// Stores the token in a single file.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Store under the platform data directory:
    /// - Linux:   `~/.local/share/parley/credential`
    /// - macOS:   `~/Library/Application Support/com.parley.parley/credential`
    /// - Windows: `C:\Users\<user>\AppData\Roaming\parley\parley\data\credential`
    pub fn new() -> Result<Self, CredentialError> {
        let dirs = ProjectDirs::from("com", "parley", "parley").ok_or(CredentialError::NoDataDir)?;
        Ok(Self::at(dirs.data_dir().join("credential")))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<String>, CredentialError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, token: &str) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, token)?;
        tracing::debug!(path = %self.path.display(), "credential saved");
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<String>, CredentialError> {
        Ok(self.lock().clone())
    }

    fn save(&self, token: &str) -> Result<(), CredentialError> {
        *self.lock() = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        *self.lock() = None;
        Ok(())
    }
}

/// Build an unsigned JWT-shaped token expiring at `exp`. Test helper.
#[cfg(test)]
pub(crate) fn token_expiring_at(exp: DateTime<Utc>) -> String {
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u1","exp":{}}}"#, exp.timestamp()));
    format!("eyJhbGciOiJIUzI1NiJ9.{payload}.sig")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_800_000_000, 0).unwrap()
    }

    #[test]
    fn reads_exp_claim() {
        let exp = now() + chrono::Duration::minutes(10);
        let credential = Credential::new(token_expiring_at(exp));
        assert_eq!(credential.expires_at(), Some(exp));
        assert_eq!(
            credential.time_to_expiry(now()),
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn malformed_token_has_no_expiry() {
        for token in ["", "opaque", "a.!!!.c", "a.e30.c"] {
            let credential = Credential::new(token);
            assert_eq!(credential.expires_at(), None, "{token}");
            assert!(credential.is_expired(now()));
        }
    }

    #[test]
    fn renewal_fires_lead_time_before_expiry() {
        let exp = now() + chrono::Duration::minutes(10);
        assert_eq!(renewal_delay(Some(exp), now()), Duration::from_secs(5 * 60));
    }

    #[test]
    fn renewal_is_immediate_inside_lead_time() {
        let soon = now() + chrono::Duration::minutes(2);
        assert_eq!(renewal_delay(Some(soon), now()), Duration::ZERO);
        let past = now() - chrono::Duration::minutes(2);
        assert_eq!(renewal_delay(Some(past), now()), Duration::ZERO);
        assert_eq!(renewal_delay(None, now()), Duration::ZERO);
    }

    #[test]
    fn debug_redacts_token() {
        let credential = Credential::new("secret-token");
        assert!(!format!("{credential:?}").contains("secret"));
    }

    #[test]
    fn slot_is_a_bearer_source() {
        let slot = CredentialSlot::new();
        assert_eq!(slot.bearer(), None);
        slot.set(Some(Credential::new("t1")));
        assert_eq!(slot.bearer().as_deref(), Some("t1"));
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::at(dir.path().join("nested").join("credential"));
        assert_eq!(store.load().unwrap(), None);

        store.save("tok").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("tok"));

        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
