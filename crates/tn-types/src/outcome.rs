//! Trial outcomes: the scored, immutable record each worker hands to a history.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::OutcomeError;

/// Identifier scoping one orchestrated search and its shared result history.
pub type ExperimentId = Uuid;

/// Opaque handle to whatever a trial produced (typically a trained model).
///
/// The handle is shared, never copied: cloning an outcome or a snapshot of a
/// history bumps a reference count and the artifact itself stays untouched.
#[derive(Clone)]
pub struct Artifact(Option<Arc<dyn Any + Send + Sync>>);

impl Artifact {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.downcast_ref::<T>())
    }

    /// Whether two handles point at the same artifact.
    pub fn ptr_eq(&self, other: &Artifact) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Default for Artifact {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(_) => f.write_str("Artifact(..)"),
            None => f.write_str("Artifact(none)"),
        }
    }
}

/// How an artifact was produced; enough to rebuild it later.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Provenance {
    pub search_method: Option<String>,
    pub search_args: Vec<String>,
    pub eval_method: Option<String>,
    pub eval_args: Vec<String>,
    pub classifier_args: Vec<String>,
}

/// One completed (or aborted) trial.
///
/// Completion and score are only settable through the constructors, so a
/// "complete" outcome always carries a finite score.
#[derive(Debug, Clone, Serialize)]
pub struct TrialOutcome {
    score: Option<f64>,
    pub summary: String,
    #[serde(serialize_with = "serialize_artifact")]
    pub artifact: Artifact,
    pub provenance: Provenance,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fold: u32,
    pub seed: u64,
    /// Raw result line reported by the tuner, if any. Kept for callers that
    /// want to reproduce the run; ranking never reads it.
    pub result_line: Option<String>,
}

impl TrialOutcome {
    /// A finished trial. Rejects NaN and infinite scores.
    pub fn completed(score: f64, summary: impl Into<String>) -> Result<Self, OutcomeError> {
        if !score.is_finite() {
            return Err(OutcomeError::NonFiniteScore { score });
        }
        // -0.0 and 0.0 must rank as the same score
        Ok(Self::with_score(Some(score + 0.0), summary.into()))
    }

    /// A trial that timed out or otherwise produced no usable score.
    pub fn incomplete(summary: impl Into<String>) -> Self {
        Self::with_score(None, summary.into())
    }

    fn with_score(score: Option<f64>, summary: String) -> Self {
        let now = Utc::now();
        Self {
            score,
            summary,
            artifact: Artifact::none(),
            provenance: Provenance::default(),
            started_at: now,
            finished_at: now,
            fold: 0,
            seed: 0,
            result_line: None,
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = artifact;
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self.finished_at = finished_at;
        self
    }

    pub fn with_fold(mut self, fold: u32) -> Self {
        self.fold = fold;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_result_line(mut self, line: impl Into<String>) -> Self {
        self.result_line = Some(line.into());
        self
    }

    pub fn is_complete(&self) -> bool {
        self.score.is_some()
    }

    /// Ranking score (lower is better); `None` for incomplete trials.
    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

fn serialize_artifact<S: Serializer>(artifact: &Artifact, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_bool(!artifact.is_none())
}
