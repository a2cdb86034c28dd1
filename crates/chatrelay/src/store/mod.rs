//! Durable per-session credential directories.
//!
//! The bridge owns the contents of each directory; chatrelay only creates,
//! enumerates, and deletes them.

pub mod error;
pub mod file;
pub mod session;

pub use error::{StorageError, StorageResult};
pub use file::FileSessionStore;
pub use session::SessionStore;
