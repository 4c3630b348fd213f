//! The singleton rendering resource.
//!
//! [`WorkerResourceHost`] implements [`courier::ResourceHost`] on top of a
//! background task ([`worker::worker_loop`]) that owns the rendering logic in
//! [`markup`]. The task may go away on its own after an idle period; the
//! lifecycle controller in front of it recreates it on demand.

pub mod host;
pub mod markup;
pub mod request;
pub mod worker;

pub use host::WorkerResourceHost;
