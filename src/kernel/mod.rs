//! Thin wrappers around the OS primitives the sandbox is built from.
//!
//! All `unsafe` code is concentrated here and in the child-side pre-exec chain.
//! Dependency direction: signal -> accounting -> rlimit -> credentials

pub mod accounting;
pub mod credentials;
pub mod rlimit;
pub mod signal;
