/// Staging area for one sandboxed run
///
/// A private directory that becomes the jail root. It holds copies of the
/// executable and the input, and later the program's output. It is removed on
/// every exit path.
use crate::config::types::{
    Result, SandboxConfig, SandboxError, STAGED_INPUT_NAME, STAGED_OUTPUT_NAME,
};
use crate::safety::safe_cleanup;
use nix::unistd::{getpid, mkdtemp, Pid};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Directory name template; the X's are replaced with random characters
pub const STAGING_TEMPLATE: &str = "sandbox.XXXXXX";

/// Owner has full access, everyone else may only traverse
const STAGING_DIR_MODE: u32 = 0o711;
/// Nobody, including the program itself, may overwrite its binary
const STAGED_EXECUTABLE_MODE: u32 = 0o555;
/// Judge-supplied input is read-only for everyone
const STAGED_INPUT_MODE: u32 = 0o444;

/// Exclusively owned staging directory
#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
    executable_name: String,
    has_input: bool,
    /// Process that created the area; forked children never remove it
    owner: Pid,
    destroyed: bool,
}

impl StagingArea {
    /// Create the area under the system temporary root and copy the run's files in.
    pub fn prepare(config: &SandboxConfig) -> Result<Self> {
        Self::prepare_in(&std::env::temp_dir(), config)
    }

    /// Same as [`prepare`](Self::prepare) with an explicit parent directory.
    pub fn prepare_in(base: &Path, config: &SandboxConfig) -> Result<Self> {
        let executable_name = config.executable_name()?;
        let root = mkdtemp(&base.join(STAGING_TEMPLATE)).map_err(|e| {
            SandboxError::Staging(format!(
                "Failed to create staging directory under {}: {}",
                base.display(),
                e
            ))
        })?;

        let area = Self {
            root,
            executable_name,
            has_input: config.input.is_some(),
            owner: getpid(),
            destroyed: false,
        };

        if let Err(e) = area.populate(config) {
            if let Err(cleanup_err) = area.destroy() {
                log::error!("Cleanup after failed staging also failed: {}", cleanup_err);
            }
            return Err(e);
        }

        log::info!("Staging area ready at {}", area.root.display());
        Ok(area)
    }

    fn populate(&self, config: &SandboxConfig) -> Result<()> {
        set_mode(&self.root, STAGING_DIR_MODE)?;

        if let Some(input) = &config.input {
            copy_in(input, &self.input_path(), STAGED_INPUT_MODE)?;
        }
        copy_in(&config.executable, &self.executable_path(), STAGED_EXECUTABLE_MODE)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn executable_name(&self) -> &str {
        &self.executable_name
    }

    pub fn has_input(&self) -> bool {
        self.has_input
    }

    pub fn executable_path(&self) -> PathBuf {
        self.root.join(&self.executable_name)
    }

    pub fn input_path(&self) -> PathBuf {
        self.root.join(STAGED_INPUT_NAME)
    }

    pub fn output_path(&self) -> PathBuf {
        self.root.join(STAGED_OUTPUT_NAME)
    }

    /// Copy the program's output back (if configured), then remove the area.
    /// Removal runs even when the copy fails; the copy error wins if both fail.
    pub fn finalize(mut self, config: &SandboxConfig) -> Result<()> {
        let copied = match &config.output {
            Some(destination) => fs::copy(self.output_path(), destination)
                .map(|bytes| {
                    log::debug!("Copied {} output bytes to {}", bytes, destination.display());
                })
                .map_err(|e| {
                    SandboxError::Staging(format!(
                        "Failed to copy output to {}: {}",
                        destination.display(),
                        e
                    ))
                }),
            None => Ok(()),
        };

        let removed = self.remove();
        match (copied, removed) {
            (Err(copy_err), Err(remove_err)) => {
                log::error!("Staging removal also failed: {}", remove_err);
                Err(copy_err)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Remove the area without collecting output.
    pub fn destroy(mut self) -> Result<()> {
        self.remove()
    }

    fn remove(&mut self) -> Result<()> {
        safe_cleanup::remove_tree_secure(&self.root)?;
        self.destroyed = true;
        log::debug!("Removed staging area {}", self.root.display());
        Ok(())
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if self.destroyed || getpid() != self.owner {
            return;
        }
        if let Err(e) = self.remove() {
            log::error!("Failed to remove staging area {}: {}", self.root.display(), e);
        }
    }
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
        SandboxError::Staging(format!(
            "Failed to set mode {:o} on {}: {}",
            mode,
            path.display(),
            e
        ))
    })
}

fn copy_in(source: &Path, destination: &Path, mode: u32) -> Result<()> {
    fs::copy(source, destination).map_err(|e| {
        SandboxError::Staging(format!(
            "Failed to copy {} into staging area: {}",
            source.display(),
            e
        ))
    })?;
    set_mode(destination, mode)
}
