//! Experiment lifecycle tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tn_types::ExperimentId;

/// Lifecycle state of one orchestrated search.
///
/// `NotStarted → Running → Draining → Finalized`; `Finalized` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentState {
    NotStarted,
    /// Workers active, history accumulating.
    Running,
    /// All workers joined, history not yet polled.
    Draining,
    /// History removed from the registry and owned by the caller.
    Finalized,
}

/// Aggregate status of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentStatus {
    pub id: ExperimentId,
    pub state: ExperimentState,
    pub workers_launched: usize,
    pub workers_failed: usize,
    pub trials_recorded: u64,
    pub trials_failed: u64,
    pub best_score: Option<f64>,
    pub cancelled: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExperimentStatus {
    pub fn new(id: ExperimentId) -> Self {
        Self {
            id,
            state: ExperimentState::NotStarted,
            workers_launched: 0,
            workers_failed: 0,
            trials_recorded: 0,
            trials_failed: 0,
            best_score: None,
            cancelled: false,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = ExperimentState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_draining(&mut self) {
        self.state = ExperimentState::Draining;
    }

    pub fn mark_finalized(&mut self, best_score: Option<f64>) {
        self.state = ExperimentState::Finalized;
        self.finished_at = Some(Utc::now());
        self.best_score = best_score;
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.state == ExperimentState::Finalized
    }
}
