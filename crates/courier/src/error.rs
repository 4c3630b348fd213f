//! Error types for the coordination layer.
//!
//! This module defines the central `Error` enum, which captures every
//! recoverable and reportable failure of the session, print-job and resource
//! operations. Handlers never let an `Error` cross a context boundary as a
//! failure; it is converted into a `{"error": "..."}` reply instead (see
//! [`crate::protocol::Reply`]).
//!
//! ## Error Cases
//! - `SessionNotFound`: Unknown upload token, or one that was already
//!   finalized.
//! - `InvalidChunk`: A chunk that is not a string.
//! - `InvalidInput`: A malformed request shape or argument.
//! - `JobNotFound` / `JobNotReady`: Print job read-back on a missing job or a
//!   job without payload.
//! - `ResourceCreationFailed`: The shared rendering resource could not be
//!   created.
//! - `CommunicationFailure`: A round trip to another context failed, either
//!   transiently or because the receiving end is gone.
//! - `Collaborator`: An external collaborator (cache, file, download, surface)
//!   failed; its message is passed through.
//! - `ServiceShutdown`: A request arrived while the service was shutting down.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the coordination layer.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The upload token is unknown or its session is already finalized.
    #[error("Upload session not found")]
    SessionNotFound,

    /// A chunk arrived that was not a string.
    #[error("Invalid chunk: chunks must be strings")]
    InvalidChunk,

    /// The request was malformed or an argument was out of range.
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// No print job is registered under the token.
    #[error("Print job not found")]
    JobNotFound,

    /// The print job exists but holds no payload.
    #[error("Print job not ready")]
    JobNotReady,

    /// The shared rendering resource could not be created.
    #[error("Failed to create rendering resource: {reason}")]
    ResourceCreationFailed { reason: String },

    /// A message round trip to another context failed.
    ///
    /// `transient` is `false` when the receiving end no longer exists.
    #[error("Communication failure: {reason}")]
    CommunicationFailure { reason: String, transient: bool },

    /// An external collaborator reported a failure.
    #[error("{collaborator} error: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn collaborator(collaborator: &'static str, message: impl ToString) -> Self {
        Self::Collaborator {
            collaborator,
            message: message.to_string(),
        }
    }
}
