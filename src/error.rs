//! Error types for the task engine
//!
//! Construction-time failures (ranges, contexts, bodies) are returned to the
//! constructor's caller. Failures raised while a task tree runs abort the
//! current `parallel_for` / `parallel_reduce` call and leave the worker pool
//! usable for the next one.

use std::path::PathBuf;

use thiserror::Error;

use crate::range::Range;

/// Library-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the task engine.
#[derive(Debug, Error)]
pub enum Error {
    /// `begin > end` or `grain <= 0`.
    #[error("invalid range: begin={begin}, end={end}, grain={grain}")]
    InvalidRange { begin: i64, end: i64, grain: i64 },

    /// `split()` called on a range that is already leaf-sized.
    #[error("range {range} is not divisible")]
    NotDivisible { range: Range },

    /// A worker context could not satisfy its manifest.
    #[error("bootstrap failed on {site}: {reason}")]
    BootstrapFailure { site: String, reason: String },

    /// The user-supplied callable failed (or panicked) on a leaf range or
    /// while merging two partial results.
    #[error("body failed on range {range}: {source}")]
    BodyInvocation {
        range: Range,
        #[source]
        source: anyhow::Error,
    },

    /// A container value could not be converted to or from the requested shape.
    #[error("container slot {slot} does not hold the expected shape: {source}")]
    ContainerTypeMismatch {
        slot: String,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn bootstrap(
        site: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::BootstrapFailure {
            site: site.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors raised by user code during a task tree.
    pub fn is_body_failure(&self) -> bool {
        matches!(self, Error::BodyInvocation { .. })
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}
