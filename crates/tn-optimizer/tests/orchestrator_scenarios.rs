use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tn_optimizer::{
    ExperimentState, Orchestrator, OrchestratorConfig, ResultRegistry, TrialError, TrialSource,
    WorkerContext, WorkerExit,
};
use tn_types::{Artifact, Metric, TrialOutcome};

/// Replays a fixed list of scores, then reports exhaustion.
struct Replay(VecDeque<f64>);

impl TrialSource for Replay {
    fn next_trial(&mut self, ctx: &WorkerContext) -> Result<Option<TrialOutcome>, TrialError> {
        let Some(score) = self.0.pop_front() else {
            return Ok(None);
        };
        let outcome = TrialOutcome::completed(score, format!("w{} s{}", ctx.worker_index, score))?
            .with_seed(ctx.seed)
            .with_artifact(Artifact::new(score));
        Ok(Some(outcome))
    }
}

/// Never succeeds.
struct Broken;

impl TrialSource for Broken {
    fn next_trial(&mut self, _ctx: &WorkerContext) -> Result<Option<TrialOutcome>, TrialError> {
        Err(TrialError::search("evaluation crashed"))
    }
}

/// Produces an outcome every few milliseconds forever.
struct Endless {
    next: f64,
    produced: Arc<AtomicUsize>,
}

impl TrialSource for Endless {
    fn next_trial(&mut self, _ctx: &WorkerContext) -> Result<Option<TrialOutcome>, TrialError> {
        std::thread::sleep(Duration::from_millis(2));
        self.next += 1.0;
        self.produced.fetch_add(1, Ordering::SeqCst);
        Ok(Some(TrialOutcome::completed(self.next, "endless")?))
    }
}

fn scores(outcomes: &[Arc<TrialOutcome>]) -> Vec<f64> {
    outcomes.iter().filter_map(|o| o.score()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn four_workers_keep_the_three_best() {
    let registry = Arc::new(ResultRegistry::new());
    let config = OrchestratorConfig::default()
        .with_parallel_runs(4)
        .with_history_capacity(3);
    let orchestrator = Orchestrator::new(config, registry.clone());

    let all_scores = [5.0, 3.0, 8.0, 1.0, 9.0, 2.0];
    let report = orchestrator
        .run(move |ctx: &WorkerContext| {
            let mine = all_scores
                .iter()
                .copied()
                .skip(ctx.worker_index)
                .step_by(4)
                .collect();
            Ok::<_, TrialError>(Replay(mine))
        })
        .await
        .unwrap();

    assert_eq!(scores(&report.history.all()), vec![1.0, 2.0, 3.0]);
    assert_eq!(report.history.evicted_total(), 3);
    assert_eq!(report.status.state, ExperimentState::Finalized);
    assert_eq!(report.status.trials_recorded, 6);
    assert_eq!(report.status.best_score, Some(1.0));
    assert!(report.workers.iter().all(|w| w.exit == WorkerExit::Exhausted));

    let best = report.best().unwrap();
    assert_eq!(best.artifact.downcast_ref::<f64>(), Some(&1.0));
    assert_eq!(best.seed, 123 + 3);

    assert!(registry.is_empty());
    assert!(registry.poll(&report.experiment_id()).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_workers_yield_the_empty_sentinel() {
    let registry = Arc::new(ResultRegistry::new());
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default().with_parallel_runs(2),
        registry.clone(),
    );

    let report = orchestrator
        .run(|_: &WorkerContext| Ok::<_, TrialError>(Broken))
        .await
        .unwrap();

    assert!(!report.has_result());
    assert!(report.history.is_sentinel());
    assert_eq!(report.history.size(), 0);
    assert!(report.best().is_none());
    assert_eq!(report.status.workers_failed, 2);
    assert_eq!(report.status.trials_failed, 6);
    for worker in &report.workers {
        assert!(matches!(worker.exit, WorkerExit::Failed(ref m) if m.contains("evaluation crashed")));
    }
    assert!(registry.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_drains_workers_and_keeps_recorded_outcomes() {
    let registry = Arc::new(ResultRegistry::with_capacity(10_000));
    let produced = Arc::new(AtomicUsize::new(0));
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default()
            .with_parallel_runs(3)
            .with_history_capacity(10_000),
        registry.clone(),
    );

    let counter = produced.clone();
    let watched = produced.clone();
    let report = orchestrator
        .run_until(
            move |_: &WorkerContext| {
                Ok::<_, TrialError>(Endless {
                    next: 0.0,
                    produced: counter.clone(),
                })
            },
            async move {
                while watched.load(Ordering::SeqCst) < 9 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            },
        )
        .await
        .unwrap();

    assert!(report.was_cancelled());
    assert!(report.workers.iter().all(|w| w.exit == WorkerExit::Cancelled));
    assert_eq!(report.workers.len(), 3);
    assert!(report.history.size() >= 8);
    assert_eq!(report.status.trials_recorded, report.history.size() as u64);
    assert_eq!(report.status.state, ExperimentState::Finalized);
    assert!(registry.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_panicking_source_is_reported_without_losing_other_results() {
    struct Exploding;

    impl TrialSource for Exploding {
        fn next_trial(&mut self, _ctx: &WorkerContext) -> Result<Option<TrialOutcome>, TrialError> {
            panic!("source exploded");
        }
    }

    enum Either {
        Boom(Exploding),
        Fine(Replay),
    }

    impl TrialSource for Either {
        fn next_trial(&mut self, ctx: &WorkerContext) -> Result<Option<TrialOutcome>, TrialError> {
            match self {
                Either::Boom(s) => s.next_trial(ctx),
                Either::Fine(s) => s.next_trial(ctx),
            }
        }
    }

    let registry = Arc::new(ResultRegistry::new());
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default().with_parallel_runs(2),
        registry.clone(),
    );

    let report = orchestrator
        .run(|ctx: &WorkerContext| {
            Ok::<_, TrialError>(if ctx.worker_index == 0 {
                Either::Boom(Exploding)
            } else {
                Either::Fine(Replay(VecDeque::from(vec![0.7])))
            })
        })
        .await
        .unwrap();

    assert_eq!(
        report.workers[0].exit,
        WorkerExit::Panicked("source exploded".to_string())
    );
    assert_eq!(report.workers[1].exit, WorkerExit::Exhausted);
    assert_eq!(report.status.workers_failed, 1);
    assert_eq!(report.best().unwrap().score(), Some(0.7));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn baseline_alone_is_ranked_when_search_is_skipped() {
    let registry = Arc::new(ResultRegistry::new());
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default()
            .with_parallel_runs(0)
            .with_skip_search(true),
        registry.clone(),
    );
    let baseline = TrialOutcome::completed(0.2, "external J48").unwrap();

    let report = orchestrator
        .execute(
            |_: &WorkerContext| -> Result<Replay, TrialError> {
                panic!("no worker should be prepared")
            },
            Some(baseline),
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

    assert!(report.workers.is_empty());
    assert_eq!(report.status.workers_launched, 0);
    assert_eq!(report.history.size(), 1);
    assert_eq!(report.best().unwrap().summary, "external J48");
    assert!(registry.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn baseline_competes_with_search_results() {
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default().with_parallel_runs(2),
        Arc::new(ResultRegistry::new()),
    );
    let baseline = TrialOutcome::completed(0.05, "baseline").unwrap();

    let report = orchestrator
        .execute(
            |_: &WorkerContext| Ok::<_, TrialError>(Replay(VecDeque::from(vec![0.3, 0.1]))),
            Some(baseline),
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

    assert_eq!(report.history.size(), 5);
    assert_eq!(report.best().unwrap().summary, "baseline");
    assert_eq!(scores(&report.history.all()), vec![0.05, 0.1, 0.1, 0.3, 0.3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn workers_stop_at_the_time_limit() {
    let produced = Arc::new(AtomicUsize::new(0));
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default()
            .with_parallel_runs(2)
            .with_history_capacity(5)
            .with_time_limit(Duration::from_millis(40)),
        Arc::new(ResultRegistry::new()),
    );

    let counter = produced.clone();
    let report = orchestrator
        .run(move |_: &WorkerContext| {
            Ok::<_, TrialError>(Endless {
                next: 0.0,
                produced: counter.clone(),
            })
        })
        .await
        .unwrap();

    assert!(!report.was_cancelled());
    assert!(report.workers.iter().all(|w| w.exit == WorkerExit::TimedOut));
    assert_eq!(report.history.size(), 5);
    assert_eq!(
        report.history.evicted_total() + 5,
        produced.load(Ordering::SeqCst) as u64
    );
}

#[tokio::test]
async fn maximized_metrics_rank_the_highest_raw_value_first() {
    let metric = Metric::PctCorrect;
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default().with_metric(metric),
        Arc::new(ResultRegistry::new()),
    );
    assert_eq!(orchestrator.config().metric, metric);

    let report = orchestrator
        .run(move |_: &WorkerContext| {
            let raw = [90.0, 95.5, 80.0];
            Ok::<_, TrialError>(Replay(raw.iter().map(|r| metric.to_score(*r)).collect()))
        })
        .await
        .unwrap();

    let best = report.best().unwrap().score().unwrap();
    assert_eq!(metric.from_score(best), 95.5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_timed_out_run_stops_its_workers_and_leaves_no_entry() {
    let registry = Arc::new(ResultRegistry::new());
    let produced = Arc::new(AtomicUsize::new(0));
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default().with_parallel_runs(2),
        registry.clone(),
    );

    let counter = produced.clone();
    let outcome = tokio::time::timeout(
        Duration::from_millis(30),
        orchestrator.run(move |_: &WorkerContext| {
            Ok::<_, TrialError>(Endless {
                next: 0.0,
                produced: counter.clone(),
            })
        }),
    )
    .await;
    assert!(outcome.is_err());

    let at_drop = produced.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let later = produced.load(Ordering::SeqCst);

    // at most the trial each worker had in flight
    assert!(later <= at_drop + 2, "produced {at_drop} at drop, {later} later");
    assert!(registry.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_maximal_base_seed_wraps_for_later_workers() {
    let registry = Arc::new(ResultRegistry::new());
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default()
            .with_parallel_runs(2)
            .with_seed(u64::MAX),
        registry.clone(),
    );

    let report = orchestrator
        .run(|ctx: &WorkerContext| {
            let score = if ctx.worker_index == 1 { 0.1 } else { 0.4 };
            Ok::<_, TrialError>(Replay(VecDeque::from(vec![score])))
        })
        .await
        .unwrap();

    let seeds: Vec<u64> = report.workers.iter().map(|w| w.seed).collect();
    assert_eq!(seeds, vec![u64::MAX, 0]);
    assert_eq!(report.best().unwrap().seed, 0);
    assert!(registry.is_empty());
}
