//! Context configuration
//!
//! Configuration hierarchy (high → low):
//!
//! ```text
//! 1. Values set in code (`with_*` builders)
//! 2. Environment variables (ISOTASK_WORKERS, ISOTASK_LIB)
//! 3. TOML file (`load_from_path`)
//! 4. Default values
//! ```
//!
//! Only the first [`Context`](crate::Context) of a process shapes the worker
//! pool (`workers`, `idle_timeout_ms`, `steal_attempts`, `stack_size`). Later
//! contexts contribute their manifest fields (`lib`, `modules`, `requires`)
//! to their own invocations only.
//!
//! # Usage
//!
//! ```rust
//! use isotask::ContextConfig;
//!
//! let config = ContextConfig::from_toml_str("workers = 2\nrequires = []").unwrap();
//! assert_eq!(config.workers, Some(2));
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable overriding the worker count.
pub const ENV_WORKERS: &str = "ISOTASK_WORKERS";

/// Environment variable holding extra library search paths (platform path-list syntax).
pub const ENV_LIB: &str = "ISOTASK_LIB";

/// Configuration consumed by [`Context::new`](crate::Context::new).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Ordered library search paths replayed on every worker.
    pub lib: Vec<PathBuf>,
    /// Capabilities each worker loads before accepting tasks.
    ///
    /// `None` means the capabilities registered when the library was first engaged.
    pub modules: Option<Vec<String>>,
    /// Require-form paths that must resolve under one of the `lib` paths.
    pub requires: Vec<String>,
    /// Worker count; defaults to the available hardware parallelism.
    pub workers: Option<usize>,
    /// How long an idle worker parks before re-probing for work.
    pub idle_timeout_ms: u64,
    /// Random victims probed per steal round before a full sweep.
    pub steal_attempts: usize,
    /// Stack size of each worker thread.
    pub stack_size: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            lib: Vec::new(),
            modules: None,
            requires: Vec::new(),
            workers: None,
            idle_timeout_ms: 1,
            steal_attempts: 8,
            stack_size: 2 * 1024 * 1024,
        }
    }
}

impl ContextConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a configuration file, then apply environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)?.with_env_overrides()
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Apply `ISOTASK_WORKERS` and `ISOTASK_LIB` on top of this configuration.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(value) = std::env::var(ENV_WORKERS) {
            let workers = value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: ENV_WORKERS.to_string(),
                    value: value.clone(),
                })?;
            self.workers = Some(workers);
        }
        if let Some(paths) = std::env::var_os(ENV_LIB) {
            for path in std::env::split_paths(&paths) {
                if !path.as_os_str().is_empty() && !self.lib.contains(&path) {
                    self.lib.push(path);
                }
            }
        }
        Ok(self)
    }

    /// Append a library search path.
    pub fn with_lib(
        mut self,
        path: impl Into<PathBuf>,
    ) -> Self {
        self.lib.push(path.into());
        self
    }

    /// Append a required capability.
    pub fn with_module(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.modules.get_or_insert_with(Vec::new).push(name.into());
        self
    }

    /// Append a require-form path.
    pub fn with_require(
        mut self,
        path: impl Into<String>,
    ) -> Self {
        self.requires.push(path.into());
        self
    }

    /// Set the worker count used if this context creates the pool.
    pub fn with_workers(
        mut self,
        workers: usize,
    ) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Resolved worker count (never zero).
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| {
                thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
            .max(1)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms.max(1))
    }
}
