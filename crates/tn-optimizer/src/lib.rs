//! # tn-optimizer
//!
//! Concurrent trial aggregation for Tourney.
//!
//! Parallel search workers feed scored [`TrialOutcome`](tn_types::TrialOutcome)s
//! into a bounded, rank-ordered [`ResultHistory`] looked up through a shared
//! [`ResultRegistry`]. The [`Orchestrator`] launches the workers, joins them
//! (propagating cancellation), and finally polls the history out of the
//! registry to pick the best trial.

mod experiment;
mod history;
mod orchestrator;
mod registry;
mod worker;

pub use experiment::{ExperimentState, ExperimentStatus};
pub use history::{Admission, ResultHistory, DEFAULT_HISTORY_CAPACITY};
pub use orchestrator::{ExperimentReport, Orchestrator, OrchestratorConfig};
pub use registry::ResultRegistry;
pub use worker::{
    CancelFlag, SourceFactory, TrialError, TrialSource, Worker, WorkerContext, WorkerExit,
    WorkerReport, DEFAULT_MAX_CONSECUTIVE_FAILURES,
};
