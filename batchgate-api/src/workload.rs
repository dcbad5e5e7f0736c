//! Workloads: the unit of admission
//!
//! A Workload groups one or more pod sets with resource requests and node
//! scheduling constraints. The admission core assigns a flavor per covered
//! resource per pod set and records the result on the status.

use crate::condition::{self, Condition, ConditionType};
use crate::flavor::{FlavorName, Toleration};
use crate::resource::{Quantity, Requests, ResourceName};
use crate::selector::LabelSelector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Lifecycle state of a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadState {
    /// Waiting in a pending heap
    Pending,
    /// Holding quota with an admission record
    Admitted,
    /// Ran to completion; quota released
    Finished,
}

/// A homogeneous set of pods within a workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSet {
    /// Pod-set name, unique within the workload
    pub name: String,
    /// Number of pods
    pub count: u32,
    /// Per-pod resource requests
    pub requests: Requests,
    /// Exact-match node selection
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    /// Node-affinity terms, OR'd
    #[serde(default)]
    pub affinity_terms: Vec<LabelSelector>,
    /// Tolerations against flavor taints
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

impl PodSet {
    /// Total request across the set: count × per-pod
    pub fn total_requests(&self) -> Requests {
        self.requests
            .iter()
            .map(|(name, qty)| (name.clone(), qty.scale(self.count)))
            .collect()
    }
}

/// Flavor assignment for one pod set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSetAssignment {
    /// Pod-set name
    pub name: String,
    /// Assigned flavor per requested resource
    pub flavors: BTreeMap<ResourceName, FlavorName>,
    /// Total usage charged against the queue, per resource
    pub usage: BTreeMap<ResourceName, Quantity>,
}

/// Admission record written to workload status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    /// ClusterQueue the workload was admitted into
    pub cluster_queue: String,
    /// One assignment per pod set
    pub pod_set_assignments: Vec<PodSetAssignment>,
}

/// Observed status of a workload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    /// Present iff the workload holds quota
    #[serde(default)]
    pub admission: Option<Admission>,
    /// Observed conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// The unit of admission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Workload name, unique within the namespace
    pub name: String,
    /// Owning namespace
    pub namespace: String,
    /// Stable identity across requeues
    pub uid: Uuid,
    /// Admission priority; higher is more important
    #[serde(default)]
    pub priority: i32,
    /// LocalQueue the workload was submitted to
    pub queue_name: String,
    /// Creation timestamp; FIFO tie-break
    pub created_at: DateTime<Utc>,
    /// Pod sets to admit as a unit
    pub pod_sets: Vec<PodSet>,
    /// Whether the owning job reported completion
    #[serde(default)]
    pub finished: bool,
    /// Object revision for conditional writes
    #[serde(default)]
    pub resource_version: u64,
    /// Observed status
    #[serde(default)]
    pub status: WorkloadStatus,
}

impl Workload {
    /// `namespace/name` key
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkloadState {
        if self.finished {
            WorkloadState::Finished
        } else if self.status.admission.is_some() {
            WorkloadState::Admitted
        } else {
            WorkloadState::Pending
        }
    }

    /// True when the workload holds quota
    pub fn is_admitted(&self) -> bool {
        self.state() == WorkloadState::Admitted
    }

    /// True when all pods reported ready
    pub fn pods_ready(&self) -> bool {
        condition::is_true(&self.status.conditions, ConditionType::PodsReady)
    }

    /// Total request across all pod sets
    pub fn total_requests(&self) -> Requests {
        let mut total = Requests::new();
        for ps in &self.pod_sets {
            crate::resource::add_requests(&mut total, &ps.total_requests());
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(pod_sets: Vec<PodSet>) -> Workload {
        Workload {
            name: "job-1".to_string(),
            namespace: "team-a".to_string(),
            uid: Uuid::new_v4(),
            priority: 0,
            queue_name: "main".to_string(),
            created_at: Utc::now(),
            pod_sets,
            finished: false,
            resource_version: 0,
            status: WorkloadStatus::default(),
        }
    }

    fn pod_set(count: u32, cpu_millis: i64) -> PodSet {
        PodSet {
            name: "main".to_string(),
            count,
            requests: [(ResourceName::cpu(), Quantity::from_millis(cpu_millis))].into(),
            node_selector: BTreeMap::new(),
            affinity_terms: Vec::new(),
            tolerations: Vec::new(),
        }
    }

    #[test]
    fn test_total_requests_scales_by_count() {
        let w = workload(vec![pod_set(4, 500)]);
        assert_eq!(
            w.total_requests()[&ResourceName::cpu()],
            Quantity::from_units(2)
        );
    }

    #[test]
    fn test_total_requests_sums_pod_sets() {
        let w = workload(vec![pod_set(1, 1000), pod_set(2, 1000)]);
        assert_eq!(
            w.total_requests()[&ResourceName::cpu()],
            Quantity::from_units(3)
        );
    }

    #[test]
    fn test_state_transitions() {
        let mut w = workload(vec![pod_set(1, 100)]);
        assert_eq!(w.state(), WorkloadState::Pending);

        w.status.admission = Some(Admission {
            cluster_queue: "team-a".to_string(),
            pod_set_assignments: vec![],
        });
        assert_eq!(w.state(), WorkloadState::Admitted);

        w.finished = true;
        assert_eq!(w.state(), WorkloadState::Finished);
    }
}
