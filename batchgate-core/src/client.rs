//! Outbound seams toward the object store
//!
//! The scheduler never talks to the control plane directly; it goes through
//! `ObjectStore` for conditional object mutations and `EventRecorder` for
//! advisory events. Both are trait objects so tests run against the
//! in-memory `FakeObjectStore`.

use crate::workload::WorkloadKey;
use async_trait::async_trait;
use batchgate_api::{
    condition::{self, Condition, ConditionType},
    Admission, ClusterQueueStatus, LocalQueueStatus, Workload,
};
use dashmap::DashMap;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use parking_lot::Mutex;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from the object store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Conditional write lost: the object moved past the expected revision
    #[error("conflict writing {0}: resource version mismatch")]
    Conflict(String),
    /// Target object does not exist
    #[error("object {0} not found")]
    NotFound(String),
    /// Store unreachable; retryable
    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Conditional mutations the admission core emits
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Record an admission on a workload, expecting `resource_version`
    async fn apply_admission(
        &self,
        key: &WorkloadKey,
        resource_version: u64,
        admission: Admission,
    ) -> ClientResult<()>;

    /// Clear an admission (eviction), expecting `resource_version`
    async fn clear_admission(
        &self,
        key: &WorkloadKey,
        resource_version: u64,
        reason: &str,
    ) -> ClientResult<()>;

    /// Report a derived ClusterQueue status
    async fn patch_cluster_queue_status(
        &self,
        name: &str,
        status: ClusterQueueStatus,
    ) -> ClientResult<()>;

    /// Report a derived LocalQueue status
    async fn patch_local_queue_status(
        &self,
        key: &str,
        status: LocalQueueStatus,
    ) -> ClientResult<()>;
}

/// Advisory admission events
pub trait EventRecorder: Send + Sync {
    /// Workload admitted into a queue
    fn admitted(&self, key: &WorkloadKey, cluster_queue: &str);
    /// Workload evicted to make room for another
    fn preempted(&self, key: &WorkloadKey, by: &WorkloadKey);
    /// Workload cannot be admitted this cycle
    fn quota_exhausted(&self, key: &WorkloadKey, cluster_queue: &str, reason: &str);
}

/// Recorder that only traces; the default outside tests
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn admitted(&self, key: &WorkloadKey, cluster_queue: &str) {
        tracing::info!(workload = %key, cluster_queue, "workload admitted");
    }

    fn preempted(&self, key: &WorkloadKey, by: &WorkloadKey) {
        tracing::info!(workload = %key, preemptor = %by, "workload preempted");
    }

    fn quota_exhausted(&self, key: &WorkloadKey, cluster_queue: &str, reason: &str) {
        tracing::debug!(workload = %key, cluster_queue, reason, "workload stays pending");
    }
}

/// Rate limiter bounding object-store traffic
///
/// Sized by `client_connection.{qps, burst}`. `acquire` waits until a
/// permit is available; it never drops requests.
pub struct RateLimits {
    limiter: Arc<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimits {
    pub fn new(qps: f32, burst: u32) -> Self {
        let per_second =
            NonZeroU32::new(qps.ceil().max(1.0) as u32).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            limiter: Arc::new(GovernorRateLimiter::direct(quota)),
        }
    }

    /// Take one permit without waiting
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Wait for one permit
    pub async fn acquire(&self) {
        loop {
            match self.limiter.check() {
                Ok(_) => return,
                Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    }
}

/// A write observed by the fake store, for test assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    Admission {
        key: WorkloadKey,
        admission: Admission,
    },
    Eviction {
        key: WorkloadKey,
        reason: String,
    },
    ClusterQueueStatus {
        name: String,
        status: ClusterQueueStatus,
    },
    LocalQueueStatus {
        key: String,
        status: LocalQueueStatus,
    },
}

/// In-memory object store double
///
/// Workload writes check the resource version like the real store and bump
/// it on success; mutated objects are retrievable so tests can feed them
/// back through the event handlers.
#[derive(Default)]
pub struct FakeObjectStore {
    workloads: DashMap<WorkloadKey, Workload>,
    writes: Mutex<Vec<StoreWrite>>,
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a workload object
    pub fn put_workload(&self, workload: Workload) {
        self.workloads.insert(workload.key(), workload);
    }

    /// Current state of a workload object
    pub fn workload(&self, key: &WorkloadKey) -> Option<Workload> {
        self.workloads.get(key).map(|w| w.clone())
    }

    /// All workload objects
    pub fn workloads(&self) -> Vec<Workload> {
        self.workloads.iter().map(|e| e.value().clone()).collect()
    }

    /// Drain the recorded writes
    pub fn drain_writes(&self) -> Vec<StoreWrite> {
        std::mem::take(&mut *self.writes.lock())
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn apply_admission(
        &self,
        key: &WorkloadKey,
        resource_version: u64,
        admission: Admission,
    ) -> ClientResult<()> {
        let mut entry = self
            .workloads
            .get_mut(key)
            .ok_or_else(|| ClientError::NotFound(key.clone()))?;
        if entry.resource_version != resource_version {
            return Err(ClientError::Conflict(key.clone()));
        }
        entry.resource_version += 1;
        entry.status.admission = Some(admission.clone());
        condition::upsert(
            &mut entry.status.conditions,
            Condition::new(ConditionType::QuotaReserved, true, "QuotaReserved"),
        );
        condition::upsert(
            &mut entry.status.conditions,
            Condition::new(ConditionType::Admitted, true, "Admitted"),
        );
        self.writes.lock().push(StoreWrite::Admission {
            key: key.clone(),
            admission,
        });
        Ok(())
    }

    async fn clear_admission(
        &self,
        key: &WorkloadKey,
        resource_version: u64,
        reason: &str,
    ) -> ClientResult<()> {
        let mut entry = self
            .workloads
            .get_mut(key)
            .ok_or_else(|| ClientError::NotFound(key.clone()))?;
        if entry.resource_version != resource_version {
            return Err(ClientError::Conflict(key.clone()));
        }
        entry.resource_version += 1;
        entry.status.admission = None;
        condition::upsert(
            &mut entry.status.conditions,
            Condition::new(ConditionType::Admitted, false, reason.to_string()),
        );
        condition::upsert(
            &mut entry.status.conditions,
            Condition::new(ConditionType::Evicted, true, reason.to_string()),
        );
        self.writes.lock().push(StoreWrite::Eviction {
            key: key.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn patch_cluster_queue_status(
        &self,
        name: &str,
        status: ClusterQueueStatus,
    ) -> ClientResult<()> {
        self.writes.lock().push(StoreWrite::ClusterQueueStatus {
            name: name.to_string(),
            status,
        });
        Ok(())
    }

    async fn patch_local_queue_status(
        &self,
        key: &str,
        status: LocalQueueStatus,
    ) -> ClientResult<()> {
        self.writes.lock().push(StoreWrite::LocalQueueStatus {
            key: key.to_string(),
            status,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::tests_support::simple_workload;

    #[tokio::test]
    async fn test_conditional_admission_write() {
        let store = FakeObjectStore::new();
        let workload = simple_workload("w1", 0, 1000);
        let key = workload.key();
        store.put_workload(workload);

        let admission = Admission {
            cluster_queue: "a".to_string(),
            pod_set_assignments: vec![],
        };

        // Wrong revision conflicts.
        let err = store
            .apply_admission(&key, 99, admission.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Conflict(_)));

        store.apply_admission(&key, 0, admission).await.unwrap();
        let stored = store.workload(&key).unwrap();
        assert!(stored.is_admitted());
        assert_eq!(stored.resource_version, 1);
    }

    #[tokio::test]
    async fn test_eviction_clears_admission() {
        let store = FakeObjectStore::new();
        let workload = simple_workload("w1", 0, 1000);
        let key = workload.key();
        store.put_workload(workload);

        let admission = Admission {
            cluster_queue: "a".to_string(),
            pod_set_assignments: vec![],
        };
        store.apply_admission(&key, 0, admission).await.unwrap();
        store.clear_admission(&key, 1, "Preempted").await.unwrap();

        let stored = store.workload(&key).unwrap();
        assert!(!stored.is_admitted());
        assert!(condition::is_true(
            &stored.status.conditions,
            ConditionType::Evicted
        ));
        assert_eq!(store.drain_writes().len(), 2);
    }

    #[test]
    fn test_rate_limit_allows_burst_then_throttles() {
        let limits = RateLimits::new(1.0, 2);
        // Two immediate permits, then the bucket is dry.
        assert!(limits.try_acquire());
        assert!(limits.try_acquire());
        assert!(!limits.try_acquire());
    }
}
