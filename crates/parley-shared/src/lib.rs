//! # parley-shared
//!
//! Types shared by the Parley store and server: identifiers, the JSON wire
//! protocol, access tokens, and protocol constants.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod token;
pub mod types;

pub use error::{ProtocolError, TokenError};
pub use types::{ConversationId, MessageId, PairKey, UserId};
