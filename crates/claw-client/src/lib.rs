//! claw-client: wire types and transport for the agent chat service
//!
//! This crate knows how to talk to the chat endpoints: sending a message and
//! decoding the server-sent event reply, reading persisted history, and
//! clearing it.

pub mod auth;
pub mod error;
pub mod stream;
pub mod transport;
pub mod types;

pub use auth::{AuthPolicy, CredentialProvider, EnvToken, StaticToken};
pub use error::{Error, Result};
pub use stream::{ChatEventStream, StreamFrame, decode_frame};
pub use transport::{ChatTransport, HttpTransport, HttpTransportBuilder};
pub use types::*;
