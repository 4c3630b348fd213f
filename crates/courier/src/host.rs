//! Seams to the contexts this crate coordinates but does not own.
//!
//! - [`SurfaceHost`] opens and tears down consumer surfaces (e.g. a tab that
//!   renders or prints a job).
//! - [`ResourceHost`] creates and talks to the singleton rendering resource.
//! - [`HostEvent`] is how either side reports lifecycle changes it did not
//!   initiate.

use crate::Token;
use core::fmt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a consumer surface, unique among live surfaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Failure reported by a host adapter.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// Creation was rejected because the resource already exists.
    #[error("resource already exists")]
    AlreadyExists,

    /// The receiving end of a message does not exist (any more).
    #[error("receiving end does not exist")]
    ReceiverMissing,

    /// A transient failure; the target may still be alive.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

impl HostError {
    /// Classifies a raw platform error message.
    ///
    /// Platforms tend to report duplicate creation and dead receivers only
    /// through their message text, so these two cases are recognised by
    /// content. Everything else is [`HostError::Failed`].
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("already exists")
            || lowered.contains("only a single")
            || lowered.contains("already created")
        {
            Self::AlreadyExists
        } else if lowered.contains("receiving end does not exist")
            || lowered.contains("could not establish connection")
        {
            Self::ReceiverMissing
        } else {
            Self::Failed(message)
        }
    }
}

/// Opens and closes consumer surfaces.
pub trait SurfaceHost: Send + Sync + 'static {
    /// Opens a surface that will consume the job named by `token`.
    fn open(&self, token: &Token) -> impl Future<Output = Result<SurfaceId, HostError>> + Send;

    /// Tears a surface down.
    fn close(&self, surface: SurfaceId) -> impl Future<Output = Result<(), HostError>> + Send;
}

/// Creates and messages the singleton rendering resource.
pub trait ResourceHost: Send + Sync + 'static {
    /// Attempts to create the resource.
    ///
    /// Must return [`HostError::AlreadyExists`] rather than create a second
    /// instance.
    fn create(&self) -> impl Future<Output = Result<(), HostError>> + Send;

    /// Sends one request to the resource and awaits its response.
    fn send(&self, message: Value) -> impl Future<Output = Result<Value, HostError>> + Send;
}

/// Lifecycle signals observed outside the request path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostEvent {
    /// A consumer surface was removed, whoever removed it.
    SurfaceRemoved(SurfaceId),
    /// The rendering resource's connection went away.
    ResourceDisconnected,
}
