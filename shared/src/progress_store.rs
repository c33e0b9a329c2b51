/// Process-wide progress map for in-flight and recently finished jobs.
///
/// Writes replace the whole record. Reads never fail: unknown ids (not yet
/// registered, or already evicted) yield the default starting record.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::RwLock;
use tracing::debug;

use crate::models::{JobId, ProgressRecord};

/// Grace period a terminal record stays visible to pollers.
pub const DEFAULT_EVICTION_GRACE: Duration = Duration::from_secs(30);

/// Thread-safe, cloneable handle to the progress map.
#[derive(Clone, Default)]
pub struct ProgressStore {
    inner: Arc<RwLock<HashMap<JobId, ProgressRecord>>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current record for a job.
    pub fn set(&self, id: JobId, record: ProgressRecord) {
        debug!("Progress {}: {} {:.1}%", id, record.status, record.percent);
        self.inner.write().insert(id, record);
    }

    /// Current record, or the default starting record if unknown.
    pub fn get(&self, id: JobId) -> ProgressRecord {
        self.inner
            .read()
            .get(&id)
            .cloned()
            .unwrap_or_else(ProgressRecord::starting)
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.inner.read().contains_key(&id)
    }

    /// Remove the record once `after` has elapsed. Requires a tokio runtime.
    pub fn schedule_eviction(&self, id: JobId, after: Duration) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if inner.write().remove(&id).is_some() {
                debug!("Evicted progress record {}", id);
            }
        });
    }

    /// Number of tracked jobs (active or in their grace period).
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Count of tracked jobs that have not reached a terminal state.
    pub fn active_count(&self) -> usize {
        self.inner.read().values().filter(|r| !r.is_terminal()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;

    #[test]
    fn test_unknown_id_defaults_to_starting() {
        let store = ProgressStore::new();
        assert_eq!(store.get(JobId::from(42)), ProgressRecord::starting());
        assert!(!store.contains(JobId::from(42)));
    }

    #[test]
    fn test_set_replaces_record() {
        let store = ProgressStore::new();
        let id = JobId::from(1);
        store.set(id, ProgressRecord::downloading(5.0, "Downloading..."));
        store.set(id, ProgressRecord::processing(80.0, "Applying timestamps..."));

        let record = store.get(id);
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.percent, 80.0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn test_jobs_are_independent() {
        let store = ProgressStore::new();
        store.set(JobId::from(1), ProgressRecord::completed());
        store.set(JobId::from(2), ProgressRecord::downloading(40.0, "x"));
        assert_eq!(store.get(JobId::from(1)).status, JobStatus::Completed);
        assert_eq!(store.get(JobId::from(2)).percent, 40.0);
        assert_eq!(store.active_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_after_grace_period() {
        let store = ProgressStore::new();
        let id = JobId::from(7);
        store.set(id, ProgressRecord::failed("Download failed"));
        store.schedule_eviction(id, DEFAULT_EVICTION_GRACE);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(store.get(id).status, JobStatus::Error);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.get(id), ProgressRecord::starting());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_do_not_evict() {
        let store = ProgressStore::new();
        let id = JobId::from(8);
        store.set(id, ProgressRecord::completed());
        store.schedule_eviction(id, DEFAULT_EVICTION_GRACE);

        for _ in 0..10 {
            assert_eq!(store.get(id).status, JobStatus::Completed);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert!(store.contains(id));
    }
}
