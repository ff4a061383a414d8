//! # parley-shared
//!
//! Identifiers, domain models and the live wire protocol shared by every
//! Parley crate.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use models::*;
pub use protocol::{ClientEmit, EventKind, Frame, ServerEvent};
pub use types::*;
