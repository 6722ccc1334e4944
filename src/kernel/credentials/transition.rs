//! Safe UID/GID transitions to unprivileged credentials.
//!
//! CRITICAL: setresgid MUST be called BEFORE setresuid; once the UID is gone
//! the process can no longer change its groups.

use super::validation::validate_ids;
use crate::config::types::{Result, SandboxError, SandboxIdentity};
use nix::unistd::{setgroups, setresgid, setresuid, Gid, Uid, User};

/// Look up the sandbox user in the passwd database.
/// Runs in the supervisor before fork; the jail has no passwd file.
pub fn resolve_identity(user_name: &str) -> Result<SandboxIdentity> {
    let user = User::from_name(user_name)
        .map_err(|e| SandboxError::Identity(format!("lookup of user '{}' failed: {}", user_name, e)))?
        .ok_or_else(|| SandboxError::Identity(format!("user '{}' does not exist", user_name)))?;

    let identity = SandboxIdentity {
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
    };
    validate_ids(identity.uid, identity.gid)
        .map_err(|e| SandboxError::Identity(format!("user '{}': {}", user_name, e)))?;

    log::debug!(
        "Resolved sandbox user '{}' to UID={}, GID={}",
        user_name,
        identity.uid,
        identity.gid
    );
    Ok(identity)
}

/// 5-step transition: validate -> clear groups -> setresgid -> setresuid -> verify.
pub fn transition_to_unprivileged(identity: SandboxIdentity) -> Result<()> {
    let SandboxIdentity { uid, gid } = identity;
    validate_ids(uid, gid)?;

    setgroups(&[])
        .map_err(|e| SandboxError::Privilege(format!("Failed to clear supplementary groups: {}", e)))?;

    // CRITICAL: GID before UID
    let gid = Gid::from_raw(gid);
    setresgid(gid, gid, gid)
        .map_err(|e| SandboxError::Privilege(format!("Failed to setresgid({}): {}", gid, e)))?;

    let uid = Uid::from_raw(uid);
    setresuid(uid, uid, uid)
        .map_err(|e| SandboxError::Privilege(format!("Failed to setresuid({}): {}", uid, e)))?;

    verify_transition(uid, gid)
}

fn verify_transition(expected_uid: Uid, expected_gid: Gid) -> Result<()> {
    use nix::unistd::{getegid, geteuid, getgid, getuid};

    if getuid() != expected_uid || geteuid() != expected_uid {
        return Err(SandboxError::Privilege(format!(
            "UID verification failed: expected {}, got real={}, effective={}",
            expected_uid,
            getuid(),
            geteuid()
        )));
    }

    if getgid() != expected_gid || getegid() != expected_gid {
        return Err(SandboxError::Privilege(format!(
            "GID verification failed: expected {}, got real={}, effective={}",
            expected_gid,
            getgid(),
            getegid()
        )));
    }

    // Regaining root must be impossible after the drop.
    let root = Uid::from_raw(0);
    if expected_uid != root && setresuid(root, root, root).is_ok() {
        return Err(SandboxError::Privilege(
            "root UID could be regained after transition".to_string(),
        ));
    }

    Ok(())
}
