//! Job data models: identifiers, per-job lifecycle, outcomes and run statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Opaque key naming one unit of remote work.
///
/// Always non-empty and free of surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Build an identifier from raw text, trimming it. Blank input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Stage of a job that has been admitted past the skip checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    /// Not yet started
    Pending,
    /// Acquisition tool running
    Fetching,
    /// Artifact on local disk
    Fetched,
    /// Transfer running
    Relaying,
    /// Artifact on the remote, local copy removed
    Relayed,
}

/// Why a job ended without doing any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Present in the secondary catalog
    AlreadyCatalogued,
    /// Present in the checkpoint
    AlreadyCheckpointed,
}

/// A job that stopped in `Fetching` or `Relaying`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub identifier: Identifier,
    /// Stage the job was in when it failed
    pub stage: JobStage,
    pub cause: String,
}

/// Terminal state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Skipped(SkipReason),
    Success,
    Failure(JobFailure),
}

impl JobOutcome {
    /// Whether this outcome counts toward the failure streak, and which way.
    ///
    /// Skips are neutral.
    pub fn streak_signal(&self) -> Option<bool> {
        match self {
            Self::Skipped(_) => None,
            Self::Success => Some(true),
            Self::Failure(_) => Some(false),
        }
    }
}

/// One identifier moving through fetch and relay.
///
/// Owns at most one local artifact path; ownership moves to the transfer
/// sink via [`Job::take_artifact`].
#[derive(Debug)]
pub struct Job {
    identifier: Identifier,
    stage: JobStage,
    artifact: Option<PathBuf>,
}

impl Job {
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            stage: JobStage::Pending,
            artifact: None,
        }
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn stage(&self) -> JobStage {
        self.stage
    }

    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    pub fn begin_fetch(&mut self) {
        self.stage = JobStage::Fetching;
    }

    pub fn fetched(&mut self, artifact: PathBuf) {
        self.stage = JobStage::Fetched;
        self.artifact = Some(artifact);
    }

    /// Hand the artifact to the transfer sink.
    pub fn take_artifact(&mut self) -> Option<PathBuf> {
        self.stage = JobStage::Relaying;
        self.artifact.take()
    }

    /// Finish successfully.
    pub fn relayed(self) -> JobOutcome {
        debug!(identifier = %self.identifier, stage = ?JobStage::Relayed, "Job complete");
        JobOutcome::Success
    }

    /// Finish with a failure at the current stage.
    pub fn fail(self, cause: impl Into<String>) -> JobOutcome {
        JobOutcome::Failure(JobFailure {
            identifier: self.identifier,
            stage: self.stage,
            cause: cause.into(),
        })
    }
}

/// Statistics for a pull-mode run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    /// Identifiers in the workset
    pub total: usize,

    /// Skipped because the checkpoint already holds them
    pub already_checkpointed: usize,

    /// Skipped because the catalog already has them
    pub catalogued: usize,

    /// Fetched and relayed
    pub succeeded: usize,

    /// Failed in fetch or relay
    pub failed: usize,

    /// Stopped early by an interrupt
    pub interrupted: bool,

    /// Stopped early by the circuit breaker
    pub tripped: bool,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// Total runtime in seconds
    pub runtime_secs: f64,

    /// Relayed artifacts per hour
    pub throughput_per_hour: f64,
}

impl RunStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            already_checkpointed: 0,
            catalogued: 0,
            succeeded: 0,
            failed: 0,
            interrupted: false,
            tripped: false,
            started_at: Utc::now(),
            runtime_secs: 0.0,
            throughput_per_hour: 0.0,
        }
    }

    /// Fold one job outcome into the counters.
    pub fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Skipped(SkipReason::AlreadyCheckpointed) => self.already_checkpointed += 1,
            JobOutcome::Skipped(SkipReason::AlreadyCatalogued) => self.catalogued += 1,
            JobOutcome::Success => self.succeeded += 1,
            JobOutcome::Failure(_) => self.failed += 1,
        }
    }

    /// Jobs that reached a terminal state, skips included.
    pub fn processed(&self) -> usize {
        self.already_checkpointed + self.catalogued + self.succeeded + self.failed
    }

    /// Calculate derived stats.
    pub fn finalize(&mut self, runtime_secs: f64) {
        self.runtime_secs = runtime_secs;
        if runtime_secs > 0.0 {
            self.throughput_per_hour = self.succeeded as f64 / runtime_secs * 3600.0;
        }
    }
}
