//! Safety and cleanup
//!
//! Run-scoped staging directory and symlink-safe, idempotent removal.

pub mod safe_cleanup;
pub mod staging;
