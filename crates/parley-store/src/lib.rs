//! # parley-store
//!
//! Conversation store for the Parley client.
//!
//! Owns the conversation list and the history of the open conversation, and
//! performs the REST mutations on them. The merge rules in [`messages`] and
//! [`conversations`] are shared with the live event reconciler so a REST
//! result and the matching live event converge on the same state.

pub mod api;
pub mod conversations;
pub mod http;
pub mod memory;
pub mod messages;
pub mod store;

mod error;

pub use api::{
    AuthApi, BearerSource, Identity, MessagePage, MessagingApi, OutgoingMessage, PageQuery, User,
};
pub use conversations::{ConversationList, PreviewSnapshot};
pub use error::{ApiError, ApiResult, Result, StoreError};
pub use http::HttpApi;
pub use memory::MemoryApi;
pub use messages::MessageSequence;
pub use store::{ConversationStore, StoreConfig, StoreState};
