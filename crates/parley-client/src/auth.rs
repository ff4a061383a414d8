//! Credential lifecycle: login, scheduled renewal, renewal failure and
//! logout.
//!
//! Renewal runs on a single timer task. Every (re)schedule, cancellation and
//! logout bumps an epoch; a renewal that completes under a superseded epoch
//! is dropped without touching the credential.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_shared::constants::RENEWAL_RETRY_DELAY;
use parley_store::AuthApi;

use crate::credentials::{renewal_delay, Credential, CredentialError, CredentialSlot, CredentialStore};

/// Credential lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A fresh credential replaced the previous one.
    Renewed,
    /// A renewal attempt failed. The manager either retries or logs out.
    RenewalFailed { reason: String },
    /// The credential is gone; everything built on it must be torn down.
    LoggedOut,
}

const EVENT_CAPACITY: usize = 32;

struct Inner {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn CredentialStore>,
    slot: CredentialSlot,
    events: broadcast::Sender<AuthEvent>,
    /// Pending renewal task, tagged with the epoch it was scheduled under.
    timer: Mutex<Option<(u64, JoinHandle<()>)>>,
    epoch: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some((_, timer)) = self.lock_timer().take() {
            timer.abort();
        }
    }
}

#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

impl CredentialManager {
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: Arc<dyn CredentialStore>,
        slot: CredentialSlot,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                slot,
                events,
                timer: Mutex::new(None),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn current_credential(&self) -> Option<Credential> {
        self.inner.slot.get()
    }

    pub fn token(&self) -> Option<String> {
        self.current_credential().map(|c| c.token().to_string())
    }

    pub fn slot(&self) -> &CredentialSlot {
        &self.inner.slot
    }

    pub fn watch_credential(&self) -> watch::Receiver<Option<Credential>> {
        self.inner.slot.watch()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Adopt `token` after a successful login: persist, publish, and
    /// schedule its renewal.
    pub fn set_credential(&self, token: impl Into<String>) -> Result<Credential, CredentialError> {
        let credential = Credential::new(token);
        self.inner.store.save(credential.token())?;
        self.inner.slot.set(Some(credential.clone()));
        info!(expires_at = ?credential.expires_at(), "credential set");
        self.schedule_renewal(&credential);
        Ok(credential)
    }

    /// Load the persisted credential, if any, and schedule its renewal.
    pub fn restore(&self) -> Result<Option<Credential>, CredentialError> {
        let Some(token) = self.inner.store.load()? else {
            return Ok(None);
        };
        let credential = Credential::new(token);
        self.inner.slot.set(Some(credential.clone()));
        info!(expires_at = ?credential.expires_at(), "credential restored");
        self.schedule_renewal(&credential);
        Ok(Some(credential))
    }

    /// Replace any pending renewal with one timed for `credential`.
    pub fn schedule_renewal(&self, credential: &Credential) {
        let delay = renewal_delay(credential.expires_at(), Utc::now());
        debug!(delay_secs = delay.as_secs(), "renewal scheduled");
        self.inner.schedule_after(delay);
    }

    /// Renew right away, e.g. after the server refused the credential.
    pub fn renew_now(&self) {
        if self.current_credential().is_some() {
            self.inner.schedule_after(Duration::ZERO);
        }
    }

    /// Idempotent.
    pub fn cancel_scheduled(&self) {
        self.inner.cancel_scheduled();
    }

    pub fn logout(&self) {
        self.inner.logout();
    }
}

impl Inner {
    fn lock_timer(&self) -> MutexGuard<'_, Option<(u64, JoinHandle<()>)>> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn schedule_after(self: &Arc<Self>, delay: Duration) {
        // The slot stays locked until the handle is stored, so the new task
        // cannot observe the previous entry.
        let mut timer = self.lock_timer();
        let epoch = self.bump_epoch();
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(renewal_task(weak, epoch, delay));
        if let Some((_, previous)) = timer.replace((epoch, task)) {
            previous.abort();
        }
    }

    fn cancel_scheduled(&self) {
        let mut timer = self.lock_timer();
        self.bump_epoch();
        if let Some((_, previous)) = timer.take() {
            previous.abort();
        }
    }

    /// Take the timer handle only if it was scheduled under `epoch`.
    fn detach_timer(&self, epoch: u64) -> Option<JoinHandle<()>> {
        let mut timer = self.lock_timer();
        let owned = timer.as_ref().is_some_and(|(scheduled, _)| *scheduled == epoch);
        if owned {
            timer.take().map(|(_, task)| task)
        } else {
            None
        }
    }

    fn logout(&self) {
        self.cancel_scheduled();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to clear persisted credential");
        }
        self.slot.set(None);
        info!("logged out");
        self.emit(AuthEvent::LoggedOut);
    }

    async fn renew(self: Arc<Self>, epoch: u64) {
        // The timer slot holds this very task; detach it so rescheduling
        // below does not abort us.
        drop(self.detach_timer(epoch));

        let result = self.api.refresh_token().await;
        if !self.is_current(epoch) {
            debug!("renewal superseded, discarding result");
            return;
        }

        match result {
            Ok(token) => {
                let credential = Credential::new(token);
                if let Err(e) = self.store.save(credential.token()) {
                    warn!(error = %e, "failed to persist renewed credential");
                }
                self.slot.set(Some(credential.clone()));
                info!(expires_at = ?credential.expires_at(), "credential renewed");
                self.emit(AuthEvent::Renewed);
                self.schedule_after(renewal_delay(credential.expires_at(), Utc::now()));
            }
            Err(e) => {
                warn!(error = %e, "credential renewal failed");
                self.emit(AuthEvent::RenewalFailed {
                    reason: e.to_string(),
                });
                let remaining = self
                    .slot
                    .get()
                    .and_then(|c| c.time_to_expiry(Utc::now()));
                match remaining {
                    Some(remaining) => {
                        let retry = remaining.min(RENEWAL_RETRY_DELAY);
                        debug!(retry_secs = retry.as_secs(), "retrying renewal");
                        self.schedule_after(retry);
                    }
                    None => self.logout(),
                }
            }
        }
    }
}

async fn renewal_task(inner: Weak<Inner>, epoch: u64, delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if inner.is_current(epoch) {
        inner.renew(epoch).await;
    }
}
