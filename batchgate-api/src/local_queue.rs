//! LocalQueues: namespaced routing to a ClusterQueue

use crate::condition::Condition;
use serde::{Deserialize, Serialize};

/// A namespaced pointer to a ClusterQueue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalQueue {
    /// Queue name, unique within the namespace
    pub name: String,
    /// Owning namespace
    pub namespace: String,
    /// Target ClusterQueue name
    pub cluster_queue: String,
    /// Object revision for conditional writes
    #[serde(default)]
    pub resource_version: u64,
}

impl LocalQueue {
    /// `namespace/name` key
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Derived status of a LocalQueue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalQueueStatus {
    /// Workloads from this queue waiting for admission
    pub pending_workloads: usize,
    /// Workloads from this queue currently admitted
    pub admitted_workloads: usize,
    /// Conditions reported by the core
    pub conditions: Vec<Condition>,
}
