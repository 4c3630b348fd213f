//! External collaborators the coordinator talks to: a cache store, a local
//! file reader and a download sink.

pub mod cache;
pub mod downloads;
pub mod files;

pub use cache::MemoryCache;
pub use downloads::FsDownloadSink;
pub use files::FsFileReader;
