//! Configuration
//!
//! Run parameters, error taxonomy, exit statuses and startup validation.

pub mod types;
pub mod validator;
