//! Process-wide map from experiment id to its live result history.

use dashmap::DashMap;
use std::sync::{Arc, OnceLock};
use tn_types::ExperimentId;
use tracing::debug;

use crate::history::{ResultHistory, DEFAULT_HISTORY_CAPACITY};

static GLOBAL: OnceLock<Arc<ResultRegistry>> = OnceLock::new();

/// Keyed store of active result histories.
///
/// Entries are created lazily by workers and removed exactly once by the
/// orchestrator through [`ResultRegistry::poll`]. Different experiments land
/// on different shards, so unrelated keys never serialize on one lock.
#[derive(Debug)]
pub struct ResultRegistry {
    histories: DashMap<ExperimentId, Arc<ResultHistory>>,
    history_capacity: usize,
}

impl ResultRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Registry whose histories retain at most `history_capacity` outcomes.
    pub fn with_capacity(history_capacity: usize) -> Self {
        Self {
            histories: DashMap::new(),
            history_capacity,
        }
    }

    /// The shared per-process registry, created on first use.
    pub fn global() -> Arc<ResultRegistry> {
        GLOBAL.get_or_init(|| Arc::new(ResultRegistry::new())).clone()
    }

    /// History for `id`, created empty if absent. Concurrent callers with the
    /// same id always receive the same instance.
    pub fn get_or_create(&self, id: ExperimentId) -> Arc<ResultHistory> {
        self.get_or_create_with_capacity(id, self.history_capacity)
    }

    /// Like [`ResultRegistry::get_or_create`], but a newly created history
    /// retains `capacity` outcomes. An existing history keeps its capacity.
    pub fn get_or_create_with_capacity(&self, id: ExperimentId, capacity: usize) -> Arc<ResultHistory> {
        self.histories
            .entry(id)
            .or_insert_with(|| {
                debug!(experiment = %id, capacity, "creating result history");
                Arc::new(ResultHistory::new(id, capacity))
            })
            .clone()
    }

    /// Lookup without creating.
    pub fn get(&self, id: &ExperimentId) -> Option<Arc<ResultHistory>> {
        self.histories.get(id).map(|entry| entry.value().clone())
    }

    /// Remove and return the history for `id`. After this the registry holds
    /// no reference to it; a second poll returns `None`.
    pub fn poll(&self, id: &ExperimentId) -> Option<Arc<ResultHistory>> {
        self.histories.remove(id).map(|(_, history)| history)
    }

    /// Fresh unregistered history meaning "no trial completed".
    pub fn empty(&self) -> Arc<ResultHistory> {
        Arc::new(ResultHistory::sentinel())
    }

    pub fn contains(&self, id: &ExperimentId) -> bool {
        self.histories.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }
}

impl Default for ResultRegistry {
    fn default() -> Self {
        Self::new()
    }
}
