use std::time::Duration;

use thiserror::Error;

use parley_store::{ApiError, StoreError};

use crate::credentials::CredentialError;

/// Errors surfaced by the session layer.
#[derive(Error, Debug)]
pub enum ClientError {
    /// No credential is available.
    #[error("Not logged in")]
    NotLoggedIn,

    /// The conversation view was closed while the operation was running.
    #[error("Conversation view closed")]
    Closed,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
