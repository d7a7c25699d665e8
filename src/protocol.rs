//! Wire vocabulary: message ids, session types and message bodies.
//!
//! The envelope itself (`u32 msg_id || u32 length || body`) lives in
//! [`crate::transport::packet`]; bodies are JSON documents.

pub mod messages;
pub mod msg_id;
pub mod session_type;

pub use session_type::{SessionType, SubscriptionMask};
