//! Per-job runner: availability filter → fetch → relay.
//!
//! A job never propagates an error: every path ends in a [`JobOutcome`]
//! value that the driver folds into the checkpoint and the breaker.

use crate::client::{AcquisitionWorker, AvailabilityFilter, TransferSink};
use crate::models::{Identifier, Job, JobOutcome, SkipReason};
use tracing::{info, warn};

/// Runs one identifier through the full per-job sequence.
pub struct JobRunner {
    /// Catalog filter, when filtering is enabled
    filter: Option<AvailabilityFilter>,
    acquisition: AcquisitionWorker,
    sink: TransferSink,
}

impl JobRunner {
    pub fn new(acquisition: AcquisitionWorker, sink: TransferSink) -> Self {
        Self {
            filter: None,
            acquisition,
            sink,
        }
    }

    /// Enable skipping of identifiers the catalog already has.
    pub fn with_filter(mut self, filter: AvailabilityFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn filters_catalog(&self) -> bool {
        self.filter.is_some()
    }

    /// Run the job for `identifier` to a terminal outcome.
    pub async fn run(&self, identifier: Identifier) -> JobOutcome {
        if let Some(filter) = &self.filter {
            if filter.is_available(&identifier).await {
                info!(identifier = %identifier, "[skip] found in catalog");
                return JobOutcome::Skipped(SkipReason::AlreadyCatalogued);
            }
        }

        let mut job = Job::new(identifier);
        job.begin_fetch();

        match self.acquisition.fetch(job.identifier()).await {
            Ok(artifact) => job.fetched(artifact),
            Err(e) => {
                warn!(identifier = %job.identifier(), error = %e, "Fetch failed");
                return job.fail(e.to_string());
            }
        }

        let Some(artifact) = job.take_artifact() else {
            return job.fail("fetched job has no artifact");
        };

        match self.sink.relay(&artifact).await {
            Ok(()) => job.relayed(),
            Err(e) => {
                warn!(identifier = %job.identifier(), error = %e, "Relay failed");
                job.fail(e.to_string())
            }
        }
    }
}
