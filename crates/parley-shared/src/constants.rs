use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Parley";

/// Renewal fires this long before the credential expires
pub const RENEWAL_LEAD_TIME: Duration = Duration::from_secs(5 * 60);

/// Retry delay after a failed renewal while the credential is still valid
pub const RENEWAL_RETRY_DELAY: Duration = Duration::from_secs(30);

/// At most one outgoing `typing_start` per interval
pub const TYPING_THROTTLE: Duration = Duration::from_secs(2);

/// `typing_stop` is emitted after this much idle time since the last keystroke
pub const TYPING_IDLE_STOP: Duration = Duration::from_secs(3);

/// An incoming typing entry is stale this long after its last signal
pub const TYPING_EXPIRY: Duration = Duration::from_secs(5);

/// Reconnection attempts configured on the transport
pub const RECONNECT_ATTEMPTS: u32 = 5;

/// Fixed backoff between reconnection attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Messages per page
pub const MESSAGE_PAGE_SIZE: u32 = 50;

/// Per-call timeout for REST requests
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Default REST base URL (local development)
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// Default live-connection URL (local development)
pub const DEFAULT_SOCKET_URL: &str = "ws://localhost:5000/ws";
