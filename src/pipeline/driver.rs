//! Pull-mode pipeline driver.
//!
//! Pipeline flow:
//! Identifiers → checkpoint skip → JobRunner (filter → fetch → relay) → ledger
//!
//! The ledger owns the checkpoint, the circuit breaker and the run
//! statistics behind one mutex, so in pool mode a settle (record +
//! breaker + cadence flush) never interleaves with another.

use crate::checkpoint::CheckpointStore;
use crate::models::{
    Identifier, JobOutcome, PipelineConfig, RelayError, Result, RunStats, SkipReason,
};
use crate::pool::{CircuitBreaker, JobRunner};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How jobs are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// One job at a time on the driver task
    Sequential,
    /// Up to `workers` jobs in flight, each run to completion independently
    Pool { workers: usize },
}

impl Schedule {
    pub fn from_workers(workers: usize) -> Self {
        if workers <= 1 {
            Self::Sequential
        } else {
            Self::Pool { workers }
        }
    }
}

/// Random pause taken by a worker after a relayed job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayRange {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DelayRange {
    pub const NONE: Self = Self {
        min_secs: 0.0,
        max_secs: 0.0,
    };

    fn sample(&self) -> Option<Duration> {
        if self.max_secs <= 0.0 || self.max_secs < self.min_secs {
            return None;
        }
        let secs = rand::thread_rng().gen_range(self.min_secs.max(0.0)..=self.max_secs);
        Duration::try_from_secs_f64(secs).ok()
    }
}

/// Driver tunables.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub schedule: Schedule,
    /// Flush the checkpoint every N settled jobs
    pub flush_every: usize,
    pub failure_threshold: u32,
    pub delay: DelayRange,
    pub show_progress: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            schedule: Schedule::from_workers(config.workers),
            flush_every: config.flush_every.max(1),
            failure_threshold: config.failure_threshold,
            delay: DelayRange {
                min_secs: config.delay_min_secs,
                max_secs: config.delay_max_secs,
            },
            show_progress: true,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Shared mutable state of one run.
struct RunLedger {
    checkpoint: CheckpointStore,
    breaker: CircuitBreaker,
    stats: RunStats,
    flush_every: usize,
    since_flush: usize,
}

impl RunLedger {
    fn new(checkpoint: CheckpointStore, options: &PipelineOptions, total: usize) -> Self {
        Self {
            checkpoint,
            breaker: CircuitBreaker::new(options.failure_threshold),
            stats: RunStats::new(total),
            flush_every: options.flush_every.max(1),
            since_flush: 0,
        }
    }

    /// Skip `identifier` if the checkpoint already holds it.
    fn skip_if_checkpointed(&mut self, identifier: &Identifier) -> bool {
        if !self.checkpoint.contains(identifier) {
            return false;
        }
        self.stats
            .record(&JobOutcome::Skipped(SkipReason::AlreadyCheckpointed));
        true
    }

    /// Fold a finished job into checkpoint, breaker and stats.
    ///
    /// Returns `true` if this job tripped the breaker.
    fn settle(&mut self, identifier: Identifier, outcome: &JobOutcome) -> Result<bool> {
        self.stats.record(outcome);

        // Only a relayed (and locally deleted) artifact earns a checkpoint entry.
        if *outcome == JobOutcome::Success {
            self.checkpoint.record(identifier);
        }

        let tripped = outcome
            .streak_signal()
            .is_some_and(|ok| self.breaker.on_result(ok));

        self.since_flush += 1;
        if self.since_flush >= self.flush_every {
            self.checkpoint.flush()?;
            self.since_flush = 0;
        }
        Ok(tripped)
    }

    fn progress_message(&self) -> String {
        format!(
            "ok: {}, failed: {}, skipped: {}, streak: {}",
            self.stats.succeeded,
            self.stats.failed,
            self.stats.catalogued + self.stats.already_checkpointed,
            self.breaker.streak()
        )
    }

    /// Final unconditional flush, then the run verdict.
    fn finish(&mut self, runtime_secs: f64) -> Result<RunStats> {
        self.checkpoint.flush()?;
        self.stats.tripped = self.breaker.is_tripped();
        self.stats.finalize(runtime_secs);

        info!(
            path = %self.checkpoint.path().display(),
            collected = self.checkpoint.len(),
            "Final checkpoint saved"
        );
        info!(
            total = self.stats.total,
            succeeded = self.stats.succeeded,
            failed = self.stats.failed,
            catalogued = self.stats.catalogued,
            already_checkpointed = self.stats.already_checkpointed,
            interrupted = self.stats.interrupted,
            throughput = format!("{:.0}/hr", self.stats.throughput_per_hour),
            "Pipeline run complete"
        );

        if let Some(streak) = self.breaker.tripped_at() {
            return Err(RelayError::CircuitBreakerTripped { streak });
        }
        Ok(self.stats.clone())
    }
}

/// Pull-mode pipeline over a fixed list of identifiers.
pub struct PullPipeline {
    runner: Arc<JobRunner>,
    options: PipelineOptions,
}

impl PullPipeline {
    pub fn new(runner: JobRunner, options: PipelineOptions) -> Self {
        Self {
            runner: Arc::new(runner),
            options,
        }
    }

    /// Process `identifiers` in order, resuming from `checkpoint`.
    ///
    /// Cancelling `cancel` stops new jobs; in-flight jobs finish and the
    /// checkpoint is flushed before returning. A tripped breaker ends the
    /// run with [`RelayError::CircuitBreakerTripped`] after the same flush.
    pub async fn run(
        &self,
        identifiers: Vec<Identifier>,
        checkpoint: CheckpointStore,
        cancel: CancellationToken,
    ) -> Result<RunStats> {
        let start = Instant::now();
        let total = identifiers.len();

        info!(
            total,
            already_done = identifiers.iter().filter(|id| checkpoint.contains(id)).count(),
            schedule = ?self.options.schedule,
            filter_catalog = self.runner.filters_catalog(),
            "Starting pipeline"
        );

        let ledger = Arc::new(Mutex::new(RunLedger::new(checkpoint, &self.options, total)));
        let pb = self.progress_bar(total);

        let outcome = match self.options.schedule {
            Schedule::Sequential => {
                self.run_sequential(identifiers, &ledger, &pb, &cancel)
                    .await
            }
            Schedule::Pool { workers } => {
                self.run_pool(identifiers, &ledger, workers, &pb, &cancel)
                    .await
            }
        };
        pb.finish_with_message("done");

        // Flush even when the loop ended on an error.
        let verdict = ledger.lock().finish(start.elapsed().as_secs_f64());
        outcome.and(verdict)
    }

    async fn run_sequential(
        &self,
        identifiers: Vec<Identifier>,
        ledger: &Mutex<RunLedger>,
        pb: &ProgressBar,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for identifier in identifiers {
            if cancel.is_cancelled() {
                info!("Interrupted, stopping before next job");
                ledger.lock().stats.interrupted = true;
                break;
            }

            if ledger.lock().skip_if_checkpointed(&identifier) {
                pb.inc(1);
                continue;
            }

            let outcome = self.runner.run(identifier.clone()).await;
            let (tripped, message) = {
                let mut ledger = ledger.lock();
                let tripped = ledger.settle(identifier, &outcome)?;
                (tripped, ledger.progress_message())
            };
            pb.inc(1);
            pb.set_message(message);

            if tripped {
                break;
            }
            if outcome == JobOutcome::Success {
                pause(self.options.delay, cancel).await;
            }
        }
        Ok(())
    }

    async fn run_pool(
        &self,
        identifiers: Vec<Identifier>,
        ledger: &Arc<Mutex<RunLedger>>,
        workers: usize,
        pb: &ProgressBar,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let mut first_error: Option<RelayError> = None;

        for identifier in identifiers {
            while let Some(joined) = tasks.try_join_next() {
                note_task_result(joined, &mut first_error);
            }
            if first_error.is_some() || ledger.lock().breaker.is_tripped() {
                break;
            }
            if cancel.is_cancelled() {
                info!("Interrupted, no further jobs will be submitted");
                ledger.lock().stats.interrupted = true;
                break;
            }

            if ledger.lock().skip_if_checkpointed(&identifier) {
                pb.inc(1);
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Interrupted, no further jobs will be submitted");
                    ledger.lock().stats.interrupted = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        first_error = Some(RelayError::Internal("worker semaphore closed".to_string()));
                        break;
                    }
                },
            };

            // A running job may have tripped the breaker while we waited for a slot.
            if ledger.lock().breaker.is_tripped() {
                break;
            }

            let runner = Arc::clone(&self.runner);
            let ledger = Arc::clone(ledger);
            let pb = pb.clone();
            let cancel = cancel.clone();
            let delay = self.options.delay;

            tasks.spawn(async move {
                let _permit = permit;
                let outcome = runner.run(identifier.clone()).await;

                let (tripped, message) = {
                    let mut ledger = ledger.lock();
                    let tripped = ledger.settle(identifier, &outcome)?;
                    (tripped, ledger.progress_message())
                };
                pb.inc(1);
                pb.set_message(message);

                if outcome == JobOutcome::Success && !tripped {
                    pause(delay, &cancel).await;
                }
                Ok(())
            });
        }

        debug!(in_flight = tasks.len(), "Waiting for in-flight jobs");
        while let Some(joined) = tasks.join_next().await {
            note_task_result(joined, &mut first_error);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        pb
    }
}

fn note_task_result(
    joined: std::result::Result<Result<()>, tokio::task::JoinError>,
    first_error: &mut Option<RelayError>,
) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(error = %e, "Job settlement failed");
            first_error.get_or_insert(e);
        }
        Err(e) => {
            warn!(error = %e, "Task panicked");
        }
    }
}

/// Sleep for a sampled delay, cut short by cancellation.
async fn pause(delay: DelayRange, cancel: &CancellationToken) {
    let Some(duration) = delay.sample() else {
        return;
    };
    debug!(secs = duration.as_secs_f64(), "Polite delay");
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = cancel.cancelled() => {}
    }
}
