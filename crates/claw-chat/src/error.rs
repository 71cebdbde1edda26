//! Error types for claw-chat

use thiserror::Error;

/// Result type alias using claw-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned to callers of the chat API.
///
/// Stream failures are not reported here; they land in the conversation log.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the client layer
    #[error(transparent)]
    Client(#[from] claw_client::Error),

    /// Nothing to send
    #[error("Message is empty")]
    EmptyMessage,

    /// The service rejects messages above this size
    #[error("Message is too long ({len} characters, max {max})")]
    MessageTooLong { len: usize, max: usize },
}
