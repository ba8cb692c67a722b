//! Bounded, rank-ordered trial history shared by the workers of one experiment.

use parking_lot::RwLock;
use std::sync::Arc;
use tn_types::{ExperimentId, TrialOutcome};
use tracing::debug;

/// Number of outcomes a history keeps unless told otherwise.
pub const DEFAULT_HISTORY_CAPACITY: usize = 30;

/// What [`ResultHistory::add`] did with an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Incomplete outcome; nothing changed.
    Ignored,
    /// Inserted without exceeding capacity.
    Retained,
    /// Inserted, and the previous worst entry was evicted.
    RetainedEvicting,
    /// The outcome itself ranked last on a full history and was evicted.
    Rejected,
}

#[derive(Debug)]
struct Ranked {
    score: f64,
    seq: u64,
    outcome: Arc<TrialOutcome>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Sorted ascending by (score, seq).
    entries: Vec<Ranked>,
    next_seq: u64,
    evicted: u64,
    ignored: u64,
}

/// The `capacity` best trials seen so far for one experiment.
///
/// Writers take the lock exclusively; `best`, `all` and `size` share it, so a
/// reader never sees a half-sorted list. Equal scores are kept side by side in
/// insertion order.
#[derive(Debug)]
pub struct ResultHistory {
    experiment_id: Option<ExperimentId>,
    capacity: usize,
    inner: RwLock<Inner>,
}

impl ResultHistory {
    /// History registered under `experiment_id`. A zero capacity is raised to one.
    pub fn new(experiment_id: ExperimentId, capacity: usize) -> Self {
        Self::build(Some(experiment_id), capacity)
    }

    /// Unregistered, always-empty history used as the "no result" value.
    pub fn sentinel() -> Self {
        Self::build(None, DEFAULT_HISTORY_CAPACITY)
    }

    fn build(experiment_id: Option<ExperimentId>, capacity: usize) -> Self {
        Self {
            experiment_id,
            capacity: capacity.max(1),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn add(&self, outcome: TrialOutcome) -> Admission {
        let Some(score) = outcome.score() else {
            self.inner.write().ignored += 1;
            debug!(summary = %outcome.summary, "ignoring incomplete trial outcome");
            return Admission::Ignored;
        };

        let mut inner = self.inner.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        // Ties go after existing equal scores, which keeps insertion order.
        let pos = inner
            .entries
            .partition_point(|e| e.score.total_cmp(&score).is_le());
        inner.entries.insert(
            pos,
            Ranked {
                score,
                seq,
                outcome: Arc::new(outcome),
            },
        );

        if inner.entries.len() <= self.capacity {
            return Admission::Retained;
        }

        let worst = inner.entries.pop();
        inner.evicted += 1;
        match worst {
            Some(w) if w.seq == seq => Admission::Rejected,
            _ => Admission::RetainedEvicting,
        }
    }

    /// Lowest-scoring outcome, if any complete outcome was ever added.
    pub fn best(&self) -> Option<Arc<TrialOutcome>> {
        self.inner.read().entries.first().map(|e| e.outcome.clone())
    }

    /// Snapshot of the retained outcomes, best first.
    pub fn all(&self) -> Vec<Arc<TrialOutcome>> {
        self.inner
            .read()
            .entries
            .iter()
            .map(|e| e.outcome.clone())
            .collect()
    }

    pub fn size(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Outcomes pushed out by better ones since creation.
    pub fn evicted_total(&self) -> u64 {
        self.inner.read().evicted
    }

    /// Incomplete outcomes that were handed in and dropped.
    pub fn ignored_total(&self) -> u64 {
        self.inner.read().ignored
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn experiment_id(&self) -> Option<ExperimentId> {
        self.experiment_id
    }

    /// True for the unregistered value returned by `ResultRegistry::empty`.
    pub fn is_sentinel(&self) -> bool {
        self.experiment_id.is_none()
    }
}
