//! Registry of progress records keyed by job id.
//!
//! The map lock only guards the key set. Record locks are always taken after
//! the map lock has been released.

use crate::error::{TrainingError, TrainingResult};
use crate::job::{JobId, OwnerId};
use crate::progress::{ProgressHandle, TrainingProgress};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct ProgressStore {
    jobs: RwLock<HashMap<JobId, Arc<ProgressHandle>>>,
}

impl ProgressStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a record, replacing any previous record under the same id.
    pub fn register(&self, progress: TrainingProgress) -> Arc<ProgressHandle> {
        let handle = Arc::new(ProgressHandle::new(progress));
        let count = {
            let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
            jobs.insert(handle.job_id().clone(), Arc::clone(&handle));
            jobs.len()
        };
        debug!(job_id = %handle.job_id(), owner_id = %handle.owner_id(), tracked = count, "Registered progress record");
        handle
    }

    pub fn get(&self, job_id: &JobId) -> TrainingResult<Arc<ProgressHandle>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
            .ok_or_else(|| TrainingError::JobNotFound(job_id.to_string()))
    }

    fn handles(&self) -> Vec<Arc<ProgressHandle>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }

    /// Snapshots of every record, ordered by job id.
    #[must_use]
    pub fn list_all(&self) -> Vec<TrainingProgress> {
        let mut out: Vec<_> = self.handles().iter().map(|h| h.snapshot()).collect();
        out.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        out
    }

    /// Snapshots of one owner's records, ordered by job id.
    #[must_use]
    pub fn list_by_owner(&self, owner_id: OwnerId) -> Vec<TrainingProgress> {
        let mut out: Vec<_> = self
            .handles()
            .iter()
            .filter(|h| h.owner_id() == owner_id)
            .map(|h| h.snapshot())
            .collect();
        out.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops finished records whose end time is older than `retention`.
    /// Returns how many were removed.
    pub fn evict_older_than(&self, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let cutoff = Utc::now() - retention;
        let expired: Vec<JobId> = self
            .handles()
            .iter()
            .filter(|h| h.end_time().is_some_and(|end| end < cutoff))
            .map(|h| h.job_id().clone())
            .collect();

        if expired.is_empty() {
            return 0;
        }

        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let removed = expired.iter().filter(|id| jobs.remove(*id).is_some()).count();
        drop(jobs);
        info!(removed, "Evicted expired training records");
        removed
    }

    /// Removes every record whose job id starts with `prefix`.
    pub fn clear_by_prefix(&self, prefix: &str) -> usize {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|id, _| !id.as_str().starts_with(prefix));
        let removed = before - jobs.len();
        drop(jobs);
        if removed > 0 {
            info!(prefix, removed, "Cleared training records");
        }
        removed
    }

    /// Removes every record of the trainable entity `entity_name`.
    pub fn clear_entity(&self, entity_name: &str) -> usize {
        self.clear_by_prefix(&format!("{entity_name}_"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::TrainingStatus;

    fn pending(id: &str, owner: u64) -> TrainingProgress {
        TrainingProgress::pending(JobId::from(id), OwnerId(owner), Utc::now())
    }

    #[test]
    fn test_register_and_get() {
        let store = ProgressStore::new();
        store.register(pending("mnist_1", 1));
        let handle = store.get(&JobId::from("mnist_1")).unwrap();
        assert_eq!(handle.status(), TrainingStatus::Pending);

        let err = store.get(&JobId::from("missing")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_list_by_owner() {
        let store = ProgressStore::new();
        store.register(pending("a_1", 1));
        store.register(pending("b_1", 2));
        store.register(pending("c_1", 1));

        let mine: Vec<_> = store.list_by_owner(OwnerId(1)).into_iter().map(|p| p.job_id.0).collect();
        assert_eq!(mine, vec!["a_1", "c_1"]);
        assert_eq!(store.list_all().len(), 3);
    }

    #[test]
    fn test_evict_only_finished_and_old() {
        let store = ProgressStore::new();
        let mut old = pending("old_1", 1);
        old.status = TrainingStatus::Completed;
        old.end_time = Some(Utc::now() - chrono::Duration::hours(2));
        store.register(old);

        let fresh = store.register(pending("fresh_1", 1));
        fresh.mark_failed("boom");
        store.register(pending("running_1", 1)).mark_running();

        let removed = store.evict_older_than(Duration::from_secs(3600));
        assert_eq!(removed, 1);
        assert!(store.get(&JobId::from("old_1")).is_err());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_clear_entity_respects_separator() {
        let store = ProgressStore::new();
        store.register(pending("mnist_100_aaaa", 1));
        store.register(pending("mnist_200_bbbb", 1));
        store.register(pending("mnist2_100_cccc", 1));

        assert_eq!(store.clear_entity("mnist"), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.clear_by_prefix("mnist"), 1);
        assert!(store.is_empty());
    }
}
