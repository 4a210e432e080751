//! Error types for audiorelay.
//!
//! Two kinds of failure exist:
//! - Fatal: stop the whole run (`EmptyWorkset`, `CircuitBreakerTripped`)
//! - Per-job: absorbed by the driver, logged, and counted by the breaker

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for audiorelay.
#[derive(Debug, Error)]
pub enum RelayError {
    // ═══════════════════════════════════════════════════════════════════
    // FATAL: the run stops
    // ═══════════════════════════════════════════════════════════════════
    #[error("No identifiers to process")]
    EmptyWorkset,

    #[error("{streak} consecutive failures, aborting (credentials may have expired)")]
    CircuitBreakerTripped { streak: u32 },

    // ═══════════════════════════════════════════════════════════════════
    // TRANSIENT: retried by the availability filter
    // ═══════════════════════════════════════════════════════════════════
    #[error("Catalog search error: {0}")]
    Catalog(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    // ═══════════════════════════════════════════════════════════════════
    // PER-JOB: absorbed, counted against the failure streak
    // ═══════════════════════════════════════════════════════════════════
    #[error("Acquisition failed for {identifier}: {cause}")]
    Acquisition { identifier: String, cause: String },

    #[error("No artifact found for {identifier} after fetch")]
    MissingArtifact { identifier: String },

    #[error("Relay failed for {}: {cause}", path.display())]
    Relay { path: PathBuf, cause: String },

    #[error("Failed to launch {tool}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // INFRASTRUCTURE
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Filesystem watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether a catalog lookup should be attempted again after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Catalog(_) | Self::Network(_))
    }

    /// Whether this error ends the run rather than a single job.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::EmptyWorkset | Self::CircuitBreakerTripped { .. })
    }

    /// Process exit code reported by the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::EmptyWorkset => 2,
            Self::CircuitBreakerTripped { .. } => 3,
            _ => 1,
        }
    }
}

/// Result type alias for audiorelay.
pub type Result<T> = std::result::Result<T, RelayError>;
