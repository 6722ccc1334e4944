//! Execution control
//!
//! Child-side confinement chain and parent-side supervision.

pub mod preexec;
pub mod supervisor;
