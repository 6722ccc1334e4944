//! antiskill: a single-job sandbox for running untrusted, statically linked programs
//!
//! # Architecture
//!
//! One invocation stages the program into a private directory, forks a child
//! that confines itself and execs the program, supervises it against a
//! wall-clock deadline, classifies the outcome, and tears the directory down.
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::rlimit`]: Address-space, CPU, open-file and process limits
//! - [`kernel::credentials`]: Identity lookup and irreversible uid/gid drop
//! - [`kernel::signal`]: Deadline timer, interrupt handling, tracked child
//! - [`kernel::accounting`]: Reaping with resource usage
//!
//! ## Execution Control ([`exec`])
//! - [`exec::preexec`]: Type-state enforced pre-exec ordering
//! - [`exec::supervisor`]: Fork, deadline, wait, stopped-child handling
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::verdict`]: Evidence-backed verdict classification and report line
//!
//! ## Safety & Cleanup ([`safety`])
//! - [`safety::staging`]: Per-run staging directory lifecycle
//! - [`safety::safe_cleanup`]: Symlink-safe recursive removal
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Shared types, errors and exit codes
//! - [`config::validator`]: Pre-flight configuration checks
//!
//! # Design Principles
//!
//! 1. **Kernel as truth** - Usage comes from `wait4`, never from guesses
//! 2. **Types prevent errors** - The pre-exec chain cannot be reordered
//! 3. **Teardown always runs** - Every path out of a run removes the staging area
//! 4. **Minimal unsafe** - Thin wrappers with explicit preconditions

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Verdict
pub mod verdict;

// Safety & Cleanup
pub mod safety;

// Configuration
pub mod config;

// CLI
pub mod cli;

pub use config::types::*;
pub use exec::preexec;
