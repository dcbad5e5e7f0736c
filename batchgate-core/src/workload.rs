//! The core's internal view of a workload
//!
//! `WorkloadInfo` caches what every admission decision needs: the resolved
//! target ClusterQueue and the total request of each pod set
//! (count × per-pod), so the hot paths never recompute them.

use batchgate_api::{Requests, Workload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// `namespace/name` identity of a workload
pub type WorkloadKey = String;

/// Total request of one pod set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSetRequests {
    /// Pod-set name
    pub name: String,
    /// count × per-pod requests
    pub requests: Requests,
}

/// A workload enriched with the derived fields the core keys on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadInfo {
    /// The observed object
    pub workload: Workload,
    /// Target ClusterQueue, resolved through the LocalQueue
    pub cluster_queue: String,
    /// Total request per pod set, in pod-set order
    pub total_requests: Vec<PodSetRequests>,
}

impl WorkloadInfo {
    /// Build the enriched view for a workload routed to a ClusterQueue
    pub fn new(workload: Workload, cluster_queue: impl Into<String>) -> Self {
        let total_requests = workload
            .pod_sets
            .iter()
            .map(|ps| PodSetRequests {
                name: ps.name.clone(),
                requests: ps.total_requests(),
            })
            .collect();
        Self {
            workload,
            cluster_queue: cluster_queue.into(),
            total_requests,
        }
    }

    /// `namespace/name` key
    pub fn key(&self) -> WorkloadKey {
        self.workload.key()
    }

    /// Heap ordering key
    pub fn order_key(&self) -> OrderKey {
        OrderKey {
            priority: self.workload.priority,
            created_at: self.workload.created_at,
            uid: self.workload.uid,
        }
    }
}

/// Pending-heap ordering: higher priority first, then older, then uid
///
/// `OrderKey` sorts most-preferred first, so `a < b` means `a` is attempted
/// before `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderKey {
    /// Workload priority
    pub priority: i32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Stable tie-break
    pub uid: Uuid,
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.uid.cmp(&other.uid))
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Shared builders for unit tests across the crate
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use batchgate_api::{PodSet, Quantity, ResourceName, WorkloadStatus};
    use std::collections::BTreeMap;

    /// One pod set, two pods, the given per-pod cpu request
    pub(crate) fn simple_workload(name: &str, priority: i32, cpu_millis: i64) -> Workload {
        Workload {
            name: name.to_string(),
            namespace: "default".to_string(),
            uid: Uuid::new_v4(),
            priority,
            queue_name: "main".to_string(),
            created_at: Utc::now(),
            pod_sets: vec![PodSet {
                name: "main".to_string(),
                count: 2,
                requests: [(ResourceName::cpu(), Quantity::from_millis(cpu_millis))].into(),
                node_selector: BTreeMap::new(),
                affinity_terms: vec![],
                tolerations: vec![],
            }],
            finished: false,
            resource_version: 0,
            status: WorkloadStatus::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::simple_workload as make_workload;
    use super::*;
    use batchgate_api::{Quantity, ResourceName};

    #[test]
    fn test_total_requests_cached_per_pod_set() {
        let info = WorkloadInfo::new(make_workload("w", 0, 500), "cq");
        assert_eq!(info.total_requests.len(), 1);
        assert_eq!(
            info.total_requests[0].requests[&ResourceName::cpu()],
            Quantity::from_units(1)
        );
    }

    #[test]
    fn test_order_prefers_priority_then_age() {
        let mut old_low = WorkloadInfo::new(make_workload("a", 1, 100), "cq");
        let mut new_high = WorkloadInfo::new(make_workload("b", 5, 100), "cq");
        old_low.workload.created_at = Utc::now() - chrono::Duration::hours(1);
        new_high.workload.created_at = Utc::now();
        // Higher priority wins despite being newer.
        assert!(new_high.order_key() < old_low.order_key());

        let mut older = WorkloadInfo::new(make_workload("c", 1, 100), "cq");
        older.workload.created_at = old_low.workload.created_at - chrono::Duration::hours(1);
        assert!(older.order_key() < old_low.order_key());
    }
}
