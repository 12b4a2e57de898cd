//! Relay Agent Shared Library
//!
//! Wire protocol spoken between the agent and the relay: the envelope
//! data model, its codec, and the common error type.

pub mod protocol;
pub mod error;

pub use error::{Error, Result};
pub use protocol::{Envelope, Headers, MessageType};
