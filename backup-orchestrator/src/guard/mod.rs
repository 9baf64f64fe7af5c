//! Preconditions that gate a run: the single-instance lock and free space.

pub mod disk;
pub mod lock;

pub use disk::ensure_free_space;
pub use lock::{LockFile, LockGuard};
