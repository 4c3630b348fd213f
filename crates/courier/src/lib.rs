//! # courier
//!
//! Token-keyed coordination of short-lived work between isolated contexts
//! that can only exchange discrete, size-limited messages.
//!
//! The crate solves three recurring problems:
//!
//! - **Chunked uploads**: reassembling a large payload sent as an ordered
//!   sequence of chunks ([`SessionRegistry`]).
//! - **Chunked read-back**: promoting a finalized upload into a print job that
//!   a freshly opened consumer surface pulls back out in bounded slices
//!   ([`PrintPipeline`]).
//! - **Singleton lifecycles**: keeping at most one instance of an expensive
//!   background rendering resource alive, with idempotent creation and
//!   stale-state recovery ([`ResourceController`]).
//!
//! All state is volatile. Hosts for consumer surfaces and the rendering
//! resource are plugged in through [`SurfaceHost`] and [`ResourceHost`].
//!
//! ## Example
//!
//! ```
//! use courier::{OpenOptions, OsTokenSource, SessionRegistry, SystemClock, DEFAULT_CHUNK_SIZE};
//! use std::sync::Arc;
//!
//! let registry = SessionRegistry::new(
//!     DEFAULT_CHUNK_SIZE,
//!     Arc::new(OsTokenSource::new()),
//!     Arc::new(SystemClock),
//! );
//!
//! let opened = registry.open(None, OpenOptions::default());
//! registry.append_chunk(opened.token.as_str(), "AB".into()).unwrap();
//! registry.append_chunk(opened.token.as_str(), "CD".into()).unwrap();
//!
//! let session = registry.take_finalized(opened.token.as_str()).unwrap();
//! assert_eq!(session.data(), Some("ABCD"));
//! assert!(registry.is_empty());
//! ```
//!
//! ## Features
//!
//! - `tracing`: emit structured logs and spans through the `tracing` crate.

mod error;
mod host;
mod lifecycle;
mod pipeline;
mod protocol;
mod reactor;
mod scroll;
mod session;
mod time;
mod token;

#[cfg(test)]
mod testing;

pub use crate::error::*;
pub use crate::host::*;
pub use crate::lifecycle::*;
pub use crate::pipeline::*;
pub use crate::protocol::*;
pub use crate::reactor::*;
pub use crate::scroll::*;
pub use crate::session::*;
pub use crate::time::*;
pub use crate::token::*;
