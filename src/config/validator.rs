// Config validation
// Runs before any filesystem or process side effect and fails fast with an
// actionable message.

use crate::config::types::{
    SandboxConfig, SandboxError, Result, STAGED_INPUT_NAME, STAGED_OUTPUT_NAME,
};

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate config before the run starts
pub fn validate_config(config: &SandboxConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::default();

    validate_limits(config, &mut result);
    validate_paths(config, &mut result);
    validate_identity(config, &mut result);

    for warning in &result.warnings {
        log::warn!("{}", warning);
    }

    if !result.is_valid() {
        return Err(SandboxError::Config(result.errors.join("; ")));
    }

    Ok(result)
}

fn validate_limits(config: &SandboxConfig, result: &mut ValidationResult) {
    if config.time_limit_ms == 0 {
        result.add_error("time limit must be a positive number of milliseconds".to_string());
    }
    if config.memory_limit_kb == 0 {
        result.add_error("memory limit must be a positive number of KiB".to_string());
    }

    // RLIMIT_AS is set in bytes; keep the slack addition from overflowing.
    if config.memory_limit_kb > u64::MAX / 2048 {
        result.add_error(format!(
            "memory limit {} KiB is too large",
            config.memory_limit_kb
        ));
    }

    if config.time_limit_ms > 3_600_000 {
        result.add_warning(format!(
            "time limit {} ms is longer than an hour",
            config.time_limit_ms
        ));
    }
}

fn validate_paths(config: &SandboxConfig, result: &mut ValidationResult) {
    match config.executable_name() {
        Ok(name) => {
            if name == STAGED_INPUT_NAME || name == STAGED_OUTPUT_NAME {
                result.add_error(format!(
                    "executable name '{}' is reserved inside the sandbox",
                    name
                ));
            }
        }
        Err(e) => result.add_error(e.to_string()),
    }

    if let Some(output) = &config.output {
        if output.file_name().is_none() {
            result.add_error(format!(
                "output path has no file name: {}",
                output.display()
            ));
        }
    }
}

fn validate_identity(config: &SandboxConfig, result: &mut ValidationResult) {
    if config.sandbox_user.is_empty() {
        result.add_error("sandbox user must not be empty".to_string());
    } else if config.sandbox_user == "root" {
        result.add_error("sandbox user must not be root".to_string());
    }
}
