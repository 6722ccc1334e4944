//! Verdict classification and reporting
//!
//! Derives the verdict as a pure function over the supervisor's evidence.

pub mod verdict;
