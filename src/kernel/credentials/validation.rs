//! Credential validation logic.

use crate::config::types::{Result, SandboxError};

/// Reject root UIDs/GIDs (0); untrusted code never keeps the jailer's identity.
pub fn validate_ids(uid: u32, gid: u32) -> Result<()> {
    if uid == 0 || gid == 0 {
        return Err(SandboxError::Privilege(format!(
            "Cannot transition to root UID/GID (uid={}, gid={})",
            uid, gid
        )));
    }
    Ok(())
}
