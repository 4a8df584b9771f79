//! Source ingest: frame-sync-validated, metadata-tagged audio production
//! and the ring buffer mounts use to fan it out to listeners.

pub mod format;
pub mod queue;

pub use format::SourceFormat;
pub use queue::{MountQueue, QueueRead};
