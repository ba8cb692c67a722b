//! Runs parallel search workers against one experiment and hands back the
//! best trial once every worker has been joined.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tn_types::{config_error, ExperimentError, ExperimentId, Metric, TnResult, TrialOutcome};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::experiment::ExperimentStatus;
use crate::history::{ResultHistory, DEFAULT_HISTORY_CAPACITY};
use crate::registry::ResultRegistry;
use crate::worker::{
    CancelFlag, SourceFactory, Worker, WorkerContext, WorkerExit, WorkerReport,
    DEFAULT_MAX_CONSECUTIVE_FAILURES,
};

/// Settings for one orchestrated search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of workers launched in parallel.
    pub parallel_runs: usize,

    /// Base seed; worker `i` receives `seed + i`, wrapping at `u64::MAX`.
    pub seed: u64,

    /// Cross-validation folds, passed through to trial sources.
    pub fold_count: u32,

    /// Maximum number of outcomes the experiment history retains.
    pub history_capacity: usize,

    /// Metric sources should report in (see [`Metric::to_score`]). Scores
    /// arrive already normalized, so this is informational for the run.
    pub metric: Metric,

    /// Wall-clock budget for the whole search.
    pub time_limit: Option<Duration>,

    pub max_consecutive_failures: u32,

    /// Rank only the baseline outcome; launch no workers.
    pub skip_search: bool,

    /// Parent directory for per-worker scratch directories.
    pub work_root: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parallel_runs: 1,
            seed: 123,
            fold_count: 10,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            metric: Metric::default(),
            time_limit: None,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            skip_search: false,
            work_root: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_parallel_runs(mut self, n: usize) -> Self {
        self.parallel_runs = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_fold_count(mut self, folds: u32) -> Self {
        self.fold_count = folds;
        self
    }

    pub fn with_history_capacity(mut self, k: usize) -> Self {
        self.history_capacity = k;
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn with_max_consecutive_failures(mut self, n: u32) -> Self {
        self.max_consecutive_failures = n;
        self
    }

    pub fn with_skip_search(mut self, skip: bool) -> Self {
        self.skip_search = skip;
        self
    }

    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    pub fn validate(&self) -> TnResult<()> {
        if self.parallel_runs == 0 && !self.skip_search {
            return Err(config_error!("parallel_runs must be at least 1"));
        }
        if self.history_capacity == 0 {
            return Err(config_error!("history_capacity must be at least 1"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(config_error!("max_consecutive_failures must be at least 1"));
        }
        if let Some(root) = &self.work_root {
            if !std::fs::metadata(root)?.is_dir() {
                return Err(config_error!("work_root {} is not a directory", root.display()));
            }
        }
        Ok(())
    }
}

/// Final state of an experiment after its history has been polled.
#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub status: ExperimentStatus,
    /// Polled history, or the registry's empty sentinel if nothing completed.
    pub history: Arc<ResultHistory>,
    /// One entry per worker slot, ordered by index.
    pub workers: Vec<WorkerReport>,
}

impl ExperimentReport {
    pub fn experiment_id(&self) -> ExperimentId {
        self.status.id
    }

    pub fn best(&self) -> Option<Arc<TrialOutcome>> {
        self.history.best()
    }

    pub fn has_result(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn was_cancelled(&self) -> bool {
        self.status.cancelled
    }

    pub fn abnormal_workers(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers.iter().filter(|w| w.exit.is_abnormal())
    }
}

/// Launches `parallel_runs` workers under one fresh experiment id, joins
/// them all, then takes the history out of the registry.
///
/// The join always completes before the poll, including when the run is
/// interrupted, so a finished experiment never leaves a registry entry behind.
/// Dropping the `execute` future mid-run cancels the workers and finishes
/// the join and poll on a detached task.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<ResultRegistry>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, registry: Arc<ResultRegistry>) -> Self {
        Self { config, registry }
    }

    /// Orchestrator writing into the process-wide registry.
    pub fn with_global_registry(config: OrchestratorConfig) -> Self {
        Self::new(config, ResultRegistry::global())
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ResultRegistry> {
        &self.registry
    }

    pub async fn run<F: SourceFactory>(&self, factory: F) -> TnResult<ExperimentReport> {
        self.execute(factory, None, std::future::pending::<()>()).await
    }

    /// Run until every worker finishes or `cancel` resolves, whichever is
    /// first. On cancellation the workers are told to stop and still joined.
    pub async fn run_until<F, C>(&self, factory: F, cancel: C) -> TnResult<ExperimentReport>
    where
        F: SourceFactory,
        C: Future<Output = ()>,
    {
        self.execute(factory, None, cancel).await
    }

    /// Full form: an optional `baseline` outcome (e.g. an externally built
    /// model) is ranked before any worker starts.
    pub async fn execute<F, C>(
        &self,
        factory: F,
        baseline: Option<TrialOutcome>,
        cancel: C,
    ) -> TnResult<ExperimentReport>
    where
        F: SourceFactory,
        C: Future<Output = ()>,
    {
        self.config.validate()?;

        let id: ExperimentId = Uuid::new_v4();
        let mut status = ExperimentStatus::new(id);
        status.mark_running();
        info!(
            experiment = %id,
            workers = self.config.parallel_runs,
            capacity = self.config.history_capacity,
            metric = %self.config.metric,
            "experiment started"
        );

        let cancel_flag = CancelFlag::new();
        let mut guard = DrainGuard {
            id,
            registry: self.registry.clone(),
            cancel: cancel_flag.clone(),
            workers: JoinSet::new(),
            finalized: false,
        };

        if let Some(baseline) = baseline {
            let admission = self
                .registry
                .get_or_create_with_capacity(id, self.config.history_capacity)
                .add(baseline);
            info!(experiment = %id, ?admission, "baseline outcome recorded");
        }

        let deadline = self.config.time_limit.map(|limit| Instant::now() + limit);
        let mut reports = Vec::new();

        if !self.config.skip_search {
            for index in 0..self.config.parallel_runs {
                let seed = self.config.seed.wrapping_add(index as u64);
                let slot = self.worker_context(id, index, seed, deadline, &cancel_flag);
                let (ctx, work_dir) = match slot {
                    Ok(slot) => slot,
                    Err(e) => {
                        warn!(experiment = %id, worker = index, "{}", e);
                        reports.push(WorkerReport::new(
                            index,
                            seed,
                            WorkerExit::PrepareFailed(e.to_string()),
                        ));
                        continue;
                    }
                };

                let source = match factory.prepare(&ctx) {
                    Ok(source) => source,
                    Err(e) => {
                        let e = ExperimentError::WorkerPrepare {
                            worker: index,
                            message: e.to_string(),
                        };
                        warn!(experiment = %id, worker = index, "{}", e);
                        reports.push(WorkerReport::new(
                            index,
                            seed,
                            WorkerExit::PrepareFailed(e.to_string()),
                        ));
                        continue;
                    }
                };

                let worker = Worker::new(ctx, source, self.registry.clone())
                    .with_history_capacity(self.config.history_capacity)
                    .with_max_consecutive_failures(self.config.max_consecutive_failures);

                guard.workers.spawn(async move {
                    let joined = tokio::task::spawn_blocking(move || {
                        let report = worker.run();
                        drop(work_dir);
                        report
                    })
                    .await;
                    (index, seed, joined)
                });
                status.workers_launched += 1;
            }
        }

        let mut cancel = std::pin::pin!(cancel);
        let mut interrupted = false;
        loop {
            tokio::select! {
                joined = guard.workers.join_next() => {
                    let Some(joined) = joined else { break };
                    if let Some(report) = collect_report(id, joined) {
                        reports.push(report);
                    }
                }
                _ = &mut cancel, if !interrupted => {
                    interrupted = true;
                    cancel_flag.cancel();
                    status.mark_cancelled();
                    warn!(experiment = %id, "experiment interrupted, cancelling workers");
                }
            }
        }

        guard.finalized = true;
        status.mark_draining();
        reports.sort_by_key(|r| r.worker_index);
        status.trials_recorded = reports.iter().map(|r| r.recorded).sum();
        status.trials_failed = reports.iter().map(|r| r.failures).sum();
        status.workers_failed = reports.iter().filter(|r| r.exit.is_abnormal()).count();

        let history = match self.registry.poll(&id) {
            Some(history) if !history.is_empty() => history,
            _ => {
                info!(experiment = %id, "no trial completed");
                self.registry.empty()
            }
        };
        let best_score = history.best().and_then(|best| best.score());
        status.mark_finalized(best_score);

        info!(
            experiment = %id,
            retained = history.size(),
            evicted = history.evicted_total(),
            ?best_score,
            cancelled = status.cancelled,
            "experiment finalized"
        );

        Ok(ExperimentReport {
            status,
            history,
            workers: reports,
        })
    }

    fn worker_context(
        &self,
        experiment_id: ExperimentId,
        worker_index: usize,
        seed: u64,
        deadline: Option<Instant>,
        cancel: &CancelFlag,
    ) -> Result<(WorkerContext, TempDir), ExperimentError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tourney-");
        let work_dir = match &self.config.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| ExperimentError::WorkerPrepare {
            worker: worker_index,
            message: e.to_string(),
        })?;

        let ctx = WorkerContext {
            experiment_id,
            worker_index,
            seed,
            fold_count: self.config.fold_count,
            work_dir: work_dir.path().to_path_buf(),
            deadline,
            cancel: cancel.clone(),
        };
        Ok((ctx, work_dir))
    }
}

type Joined = (usize, u64, Result<WorkerReport, JoinError>);

/// Owns the worker tasks of a run in progress. If `execute` is dropped
/// before its join completes, the workers are cancelled and handed to a
/// detached task that joins them and then polls the experiment entry.
struct DrainGuard {
    id: ExperimentId,
    registry: Arc<ResultRegistry>,
    cancel: CancelFlag,
    workers: JoinSet<Joined>,
    finalized: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        self.cancel.cancel();
        let id = self.id;
        let registry = self.registry.clone();
        let mut workers = std::mem::take(&mut self.workers);
        warn!(
            experiment = %id,
            running = workers.len(),
            "experiment dropped before finalizing, draining workers"
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    while let Some(joined) = workers.join_next().await {
                        collect_report(id, joined);
                    }
                    registry.poll(&id);
                    info!(experiment = %id, "dropped experiment drained");
                });
            }
            Err(_) => {
                registry.poll(&id);
            }
        }
    }
}

fn collect_report(id: ExperimentId, joined: Result<Joined, JoinError>) -> Option<WorkerReport> {
    match joined {
        Ok((_, _, Ok(report))) => Some(report),
        Ok((index, seed, Err(e))) => {
            let message = panic_message(e);
            error!(experiment = %id, worker = index, "worker panicked: {}", message);
            Some(WorkerReport::new(index, seed, WorkerExit::Panicked(message)))
        }
        Err(e) => {
            error!(experiment = %id, "lost track of a worker task: {}", e);
            None
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
