use serde::{Deserialize, Serialize};

/// Declares a string-backed identifier newtype.
///
/// Server identifiers are opaque strings; the newtypes only exist so a
/// conversation id can never be passed where a message id is expected.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identity of a user account.
    UserId
);

string_id!(
    /// Identity of a two-party conversation.
    ConversationId
);

string_id!(
    /// Globally unique message identifier; the sole deduplication key.
    MessageId
);

/// Prefix of message ids minted locally before the server confirms a send.
pub const PROVISIONAL_ID_PREFIX: &str = "local-";

impl MessageId {
    /// Mint a provisional id for an optimistic send.
    pub fn provisional() -> Self {
        Self(format!("{PROVISIONAL_ID_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    /// Whether this id was minted locally and not yet confirmed.
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_ID_PREFIX)
    }
}

/// Live connection state as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Status carried by a `presence_change` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
    Away,
    #[serde(other)]
    Unknown,
}

impl PresenceStatus {
    /// Anything other than an explicit `offline` keeps the user in the online set.
    pub fn is_online(&self) -> bool {
        !matches!(self, Self::Offline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisional_ids_are_recognised() {
        let id = MessageId::provisional();
        assert!(id.is_provisional());
        assert!(!MessageId::from("65f1c0ffee").is_provisional());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ConversationId::from("c-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"c-1\"");
    }

    #[test]
    fn unknown_presence_status_counts_as_online() {
        let status: PresenceStatus = serde_json::from_str("\"busy\"").unwrap();
        assert_eq!(status, PresenceStatus::Unknown);
        assert!(status.is_online());
        assert!(!PresenceStatus::Offline.is_online());
    }
}
