//! Search workers and the trial-source seam they drive.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tn_types::{ExperimentId, OutcomeError, TrialOutcome};
use tracing::{debug, info, warn};

use crate::history::Admission;
use crate::registry::ResultRegistry;

/// Source errors in a row after which a worker gives up.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Errors a trial source may report for a single attempt.
#[derive(Error, Debug)]
pub enum TrialError {
    #[error("Search procedure failed: {message}")]
    Search { message: String },

    #[error("Malformed outcome: {0}")]
    Outcome(#[from] OutcomeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrialError {
    pub fn search(message: impl Into<String>) -> Self {
        Self::Search {
            message: message.into(),
        }
    }
}

/// Cooperative cancellation shared by an orchestrator and its workers.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Everything a worker (and its trial source) knows about its slot.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub experiment_id: ExperimentId,
    pub worker_index: usize,
    /// Base seed offset by the worker index.
    pub seed: u64,
    pub fold_count: u32,
    /// Private scratch directory, removed once the worker is joined.
    pub work_dir: PathBuf,
    pub deadline: Option<Instant>,
    pub cancel: CancelFlag,
}

impl WorkerContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Produces candidate outcomes for one worker. Calls may block for a long
/// time; long-running sources should check [`WorkerContext::is_cancelled`].
pub trait TrialSource: Send {
    /// Next outcome, or `Ok(None)` once the source has nothing more to try.
    fn next_trial(&mut self, ctx: &WorkerContext) -> Result<Option<TrialOutcome>, TrialError>;
}

/// Builds a fresh [`TrialSource`] for each worker slot.
pub trait SourceFactory: Send + Sync {
    type Source: TrialSource + 'static;

    fn prepare(&self, ctx: &WorkerContext) -> Result<Self::Source, TrialError>;
}

impl<F, S> SourceFactory for F
where
    F: Fn(&WorkerContext) -> Result<S, TrialError> + Send + Sync,
    S: TrialSource + 'static,
{
    type Source = S;

    fn prepare(&self, ctx: &WorkerContext) -> Result<S, TrialError> {
        self(ctx)
    }
}

/// How a worker ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerExit {
    /// Source ran out of candidates.
    Exhausted,
    Cancelled,
    TimedOut,
    /// Too many consecutive source errors; holds the last one.
    Failed(String),
    /// Source panicked; holds the panic message.
    Panicked(String),
    /// Never launched because its slot could not be set up.
    PrepareFailed(String),
}

impl WorkerExit {
    pub fn is_abnormal(&self) -> bool {
        matches!(
            self,
            Self::Failed(_) | Self::Panicked(_) | Self::PrepareFailed(_)
        )
    }
}

/// Per-worker diagnostics returned with the experiment report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker_index: usize,
    pub seed: u64,
    pub exit: WorkerExit,
    pub recorded: u64,
    pub ignored: u64,
    pub failures: u64,
    /// Best score this worker produced itself.
    pub best_score: Option<f64>,
}

impl WorkerReport {
    pub fn new(worker_index: usize, seed: u64, exit: WorkerExit) -> Self {
        Self {
            worker_index,
            seed,
            exit,
            recorded: 0,
            ignored: 0,
            failures: 0,
            best_score: None,
        }
    }
}

/// One search worker feeding its outcomes into the experiment's history.
pub struct Worker<S> {
    ctx: WorkerContext,
    source: S,
    registry: Arc<ResultRegistry>,
    history_capacity: usize,
    max_consecutive_failures: u32,
}

impl<S: TrialSource> Worker<S> {
    pub fn new(ctx: WorkerContext, source: S, registry: Arc<ResultRegistry>) -> Self {
        let history_capacity = registry.history_capacity();
        Self {
            ctx,
            source,
            registry,
            history_capacity,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }

    /// Capacity used if this worker is the one that creates the history.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_max_consecutive_failures(mut self, n: u32) -> Self {
        self.max_consecutive_failures = n.max(1);
        self
    }

    /// Pull outcomes until the source is exhausted, the worker is cancelled,
    /// the deadline passes, or the source keeps failing. Blocks the calling
    /// thread.
    pub fn run(mut self) -> WorkerReport {
        let index = self.ctx.worker_index;
        let mut report = WorkerReport::new(index, self.ctx.seed, WorkerExit::Exhausted);
        let mut consecutive_failures = 0u32;

        info!(experiment = %self.ctx.experiment_id, worker = index, seed = self.ctx.seed, "worker started");

        report.exit = loop {
            if self.ctx.is_cancelled() {
                break WorkerExit::Cancelled;
            }
            if self.ctx.deadline_passed() {
                break WorkerExit::TimedOut;
            }

            match self.source.next_trial(&self.ctx) {
                Ok(Some(outcome)) => {
                    consecutive_failures = 0;
                    let score = outcome.score();
                    let admission = self
                        .registry
                        .get_or_create_with_capacity(self.ctx.experiment_id, self.history_capacity)
                        .add(outcome);
                    debug!(worker = index, ?score, ?admission, "trial outcome recorded");

                    if admission == Admission::Ignored {
                        report.ignored += 1;
                    } else {
                        report.recorded += 1;
                        report.best_score = match (report.best_score, score) {
                            (Some(best), Some(s)) => Some(best.min(s)),
                            (best, s) => best.or(s),
                        };
                    }
                }
                Ok(None) => break WorkerExit::Exhausted,
                Err(e) => {
                    consecutive_failures += 1;
                    report.failures += 1;
                    warn!(
                        worker = index,
                        attempt_failures = consecutive_failures,
                        "trial attempt failed: {}",
                        e
                    );
                    if consecutive_failures >= self.max_consecutive_failures {
                        break WorkerExit::Failed(e.to_string());
                    }
                }
            }
        };

        info!(
            experiment = %self.ctx.experiment_id,
            worker = index,
            exit = ?report.exit,
            recorded = report.recorded,
            "worker finished"
        );
        report
    }
}
