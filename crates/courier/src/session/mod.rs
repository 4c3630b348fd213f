//! Session Registry and Chunked Transfer State Machine.
//!
//! A [`Session`] accumulates chunk strings in arrival order and is finalized
//! exactly once into an immutable payload. The [`SessionRegistry`] owns every
//! live session, keyed by [`Token`](crate::Token), until a consumer takes it
//! with [`SessionRegistry::take_finalized`] or [`SessionRegistry::promote`],
//! or it is aborted or reaped. Promoted tokens stay reserved until
//! [`SessionRegistry::release`].
//!
//! Out-of-order or duplicated chunk delivery is not detected: the payload is
//! the concatenation of chunks in the order `append_chunk` was called.

mod registry;
mod state;

pub use registry::*;
pub use state::*;
