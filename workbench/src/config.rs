//! Runtime settings
//!
//! Defaults can be overridden through `WORKBENCH_*` environment variables,
//! optionally placed in a `.env` file.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::sandbox::WorkerMode;

pub const ENV_SANDBOX_TIMEOUT_MS: &str = "WORKBENCH_SANDBOX_TIMEOUT_MS";
pub const ENV_WORKER_MODE: &str = "WORKBENCH_WORKER_MODE";
pub const ENV_PYTHON: &str = "WORKBENCH_PYTHON";
pub const ENV_MAX_CONCURRENT_TESTS: &str = "WORKBENCH_MAX_CONCURRENT_TESTS";
pub const ENV_DOMAIN: &str = "WORKBENCH_DOMAIN";
pub const ENV_DOMAIN_DIR: &str = "WORKBENCH_DOMAIN_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbenchConfig {
    /// Deadline for one sandbox execution
    pub sandbox_timeout: Duration,
    /// Worker strategy for domains without their own isolation setting
    pub worker_mode: WorkerMode,
    /// Interpreter used by python sandbox workers
    pub python: String,
    /// Upper bound on artifacts tested at once by "run all"
    pub max_concurrent_tests: usize,
    pub default_domain: String,
    /// Extra YAML domain definitions
    pub domain_dir: Option<PathBuf>,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            sandbox_timeout: Duration::from_millis(30_000),
            worker_mode: WorkerMode::Ephemeral,
            python: "python3".to_string(),
            max_concurrent_tests: 4,
            default_domain: "hypothesis".to_string(),
            domain_dir: None,
        }
    }
}

impl WorkbenchConfig {
    /// Load `.env` (if present) and read the process environment
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get(ENV_SANDBOX_TIMEOUT_MS) {
            let millis = parse_positive(ENV_SANDBOX_TIMEOUT_MS, &value)?;
            config.sandbox_timeout = Duration::from_millis(millis as u64);
        }
        if let Some(value) = get(ENV_WORKER_MODE) {
            config.worker_mode = value
                .parse()
                .map_err(|reason| setting_error(ENV_WORKER_MODE, &value, reason))?;
        }
        if let Some(value) = get(ENV_PYTHON) {
            config.python = value.trim().to_string();
        }
        if let Some(value) = get(ENV_MAX_CONCURRENT_TESTS) {
            config.max_concurrent_tests = parse_positive(ENV_MAX_CONCURRENT_TESTS, &value)?;
        }
        if let Some(value) = get(ENV_DOMAIN) {
            config.default_domain = value.trim().to_string();
        }
        if let Some(value) = get(ENV_DOMAIN_DIR) {
            config.domain_dir = Some(PathBuf::from(value.trim()));
        }

        Ok(config)
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(setting_error(key, value, "must be greater than zero".to_string())),
        Ok(n) => Ok(n),
        Err(e) => Err(setting_error(key, value, e.to_string())),
    }
}

fn setting_error(key: &str, value: &str, reason: String) -> ConfigError {
    ConfigError::Setting {
        key: key.to_string(),
        value: value.to_string(),
        reason,
    }
}
