use std::time::Duration;

use thiserror::Error;

use parley_shared::MessageId;

/// Errors returned by the REST collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("Network error: {0}")]
    Network(String),

    /// The response body did not match the expected shape.
    #[error("Invalid response body: {0}")]
    Decode(String),

    /// 401/403: the credential was refused.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found")]
    NotFound,

    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

/// Convenience alias for collaborator calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors produced by the conversation store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A mutation was attempted with no conversation open.
    #[error("No active conversation")]
    NoActiveConversation,

    /// The local user is unknown (not logged in yet).
    #[error("No local user")]
    NoLocalUser,

    /// The message has not been confirmed by the server yet.
    #[error("Message {0} is still pending")]
    PendingMessage(MessageId),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The response arrived after its conversation stopped being active and
    /// was discarded.
    #[error("Response discarded: conversation no longer active")]
    Stale,
}

impl StoreError {
    /// Whether this error should be shown to the user. Stale responses are
    /// silently dropped.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, StoreError::Stale)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
