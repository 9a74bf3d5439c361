//! Cross-cutting utilities: file system helpers and retry policy.

pub mod fs;
pub mod retry;

pub use fs::{atomic_write, copy_dir_all, ensure_dir, extract_zip, remove_dir_all, validate_zip};
pub use retry::{LinearBackoff, RetryPolicy};
