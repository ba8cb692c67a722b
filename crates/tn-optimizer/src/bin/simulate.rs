//! Runs a synthetic parallel search and prints the final experiment status.
//!
//! Configured through `TOURNEY_*` environment variables; logging through
//! `RUST_LOG`. Ctrl-C cancels the workers and still reports what was found.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tn_optimizer::{Orchestrator, OrchestratorConfig, TrialError, TrialSource, WorkerContext};
use tn_types::{Metric, Provenance, TrialOutcome};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Stand-in for a real search: draws a random raw metric per trial.
struct SyntheticSearch {
    rng: StdRng,
    remaining: usize,
    metric: Metric,
}

impl TrialSource for SyntheticSearch {
    fn next_trial(&mut self, ctx: &WorkerContext) -> Result<Option<TrialOutcome>, TrialError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        let started = chrono::Utc::now();
        std::thread::sleep(Duration::from_millis(self.rng.random_range(1..10)));

        let roll: f64 = self.rng.random();
        if roll < 0.02 {
            return Err(TrialError::search("synthetic evaluation failure"));
        }
        let depth = self.rng.random_range(1..32u32);
        let summary = format!("RandomTree -depth {depth}");
        if roll < 0.07 {
            return Ok(Some(TrialOutcome::incomplete(summary)));
        }

        let raw: f64 = self.rng.random_range(0.0..1.0);
        let outcome = TrialOutcome::completed(self.metric.to_score(raw), summary)?
            .with_provenance(Provenance {
                classifier_args: vec!["-depth".to_string(), depth.to_string()],
                ..Provenance::default()
            })
            .with_timing(started, chrono::Utc::now())
            .with_fold(self.rng.random_range(0..ctx.fold_count.max(1)))
            .with_seed(ctx.seed);
        Ok(Some(outcome))
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}={v}: {e}")),
        Err(_) => Ok(default),
    }
}

fn config_from_env() -> anyhow::Result<OrchestratorConfig> {
    let defaults = OrchestratorConfig::default();
    let mut config = defaults
        .clone()
        .with_parallel_runs(env_or("TOURNEY_WORKERS", 4)?)
        .with_seed(env_or("TOURNEY_SEED", defaults.seed)?)
        .with_history_capacity(env_or("TOURNEY_CAPACITY", defaults.history_capacity)?)
        .with_metric(env_or("TOURNEY_METRIC", defaults.metric)?);

    let limit: u64 = env_or("TOURNEY_TIME_LIMIT_SECS", 0)?;
    if limit > 0 {
        config = config.with_time_limit(Duration::from_secs(limit));
    }
    if let Ok(root) = std::env::var("TOURNEY_WORK_ROOT") {
        config = config.with_work_root(root);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config_from_env()?;
    let trials_per_worker: usize = env_or("TOURNEY_TRIALS", 200)?;
    let metric = config.metric;
    info!(?config, trials_per_worker, "starting synthetic search");

    let orchestrator = Orchestrator::with_global_registry(config);
    let report = orchestrator
        .run_until(
            move |ctx: &WorkerContext| {
                Ok::<_, TrialError>(SyntheticSearch {
                    rng: StdRng::seed_from_u64(ctx.seed),
                    remaining: trials_per_worker,
                    metric,
                })
            },
            async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received");
                } else {
                    std::future::pending::<()>().await;
                }
            },
        )
        .await
        .context("search failed")?;

    for worker in report.abnormal_workers() {
        warn!(worker = worker.worker_index, exit = ?worker.exit, "worker ended abnormally");
    }

    let best = report.best();
    let summary = serde_json::json!({
        "status": report.status,
        "workers": report.workers,
        "retained": report.history.size(),
        "evicted": report.history.evicted_total(),
        "best": best.as_deref(),
        "best_raw_metric": best.and_then(|b| b.score()).map(|s| metric.from_score(s)),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
