//! ClusterQueues: named quota holders
//!
//! A ClusterQueue declares nominal and optionally borrowable capacity per
//! (flavor, resource) through ordered resource groups, and the policies the
//! admission core applies to its pending workloads: queueing strategy,
//! namespace gating, and preemption.

use crate::condition::Condition;
use crate::flavor::FlavorName;
use crate::resource::{Quantity, ResourceName};
use crate::selector::LabelSelector;
use serde::{Deserialize, Serialize};

/// Hard cap on resource groups, and on flavors and covered resources per group
pub const MAX_GROUP_FANOUT: usize = 16;

/// Ordering contract for a ClusterQueue's pending heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueingStrategy {
    /// The head blocks: nothing behind it is attempted while it cannot admit
    StrictFIFO,
    /// The head yields: younger admissible workloads may pass a blocked head
    BestEffortFIFO,
}

/// Whether cohort peers may be preempted to reclaim nominal quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    /// Never evict borrowing peers
    Never,
    /// Evict only workloads with strictly lower priority
    LowerPriority,
    /// Evict borrowing peers of any priority
    Any,
}

/// Whether workloads in the same ClusterQueue may be preempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithinQueuePolicy {
    /// Never evict same-queue workloads
    Never,
    /// Evict only workloads with strictly lower priority
    LowerPriority,
}

/// Preemption policies of a ClusterQueue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreemptionPolicy {
    /// Policy toward borrowing cohort peers
    pub reclaim_within_cohort: ReclaimPolicy,
    /// Policy toward same-queue workloads
    pub within_cluster_queue: WithinQueuePolicy,
}

impl Default for PreemptionPolicy {
    fn default() -> Self {
        Self {
            reclaim_within_cohort: ReclaimPolicy::Never,
            within_cluster_queue: WithinQueuePolicy::Never,
        }
    }
}

/// Quota declared for one resource under one flavor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuota {
    /// Covered resource; must match the group's resource list positionally
    pub name: ResourceName,
    /// Capacity owned unconditionally
    pub nominal_quota: Quantity,
    /// Cap on usage above nominal; `None` means unlimited borrowing.
    /// Only legal when the queue belongs to a cohort.
    #[serde(default)]
    pub borrowing_limit: Option<Quantity>,
}

/// Quotas of one flavor within a resource group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorQuotas {
    /// Flavor name; resolved against known ResourceFlavors
    pub name: FlavorName,
    /// One quota per covered resource, in group order
    pub resources: Vec<ResourceQuota>,
}

impl FlavorQuotas {
    /// Quota declared for a resource, if covered
    pub fn quota_for(&self, resource: &ResourceName) -> Option<&ResourceQuota> {
        self.resources.iter().find(|q| &q.name == resource)
    }
}

/// A set of resources sharing an ordered flavor list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    /// Resources covered by this group
    pub covered_resources: Vec<ResourceName>,
    /// Flavors attempted in declared order
    pub flavors: Vec<FlavorQuotas>,
}

/// A named quota holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterQueue {
    /// Queue name; identity
    pub name: String,
    /// Borrowing pool membership; `None` or empty means no borrowing
    #[serde(default)]
    pub cohort: Option<String>,
    /// Ordered quota declaration
    pub resource_groups: Vec<ResourceGroup>,
    /// Pending-heap ordering contract; immutable after creation
    pub queueing_strategy: QueueingStrategy,
    /// Which namespaces may submit; `None` means none, empty means all
    #[serde(default)]
    pub namespace_selector: Option<LabelSelector>,
    /// Preemption policies
    #[serde(default)]
    pub preemption: PreemptionPolicy,
    /// Object revision for conditional writes
    #[serde(default)]
    pub resource_version: u64,
}

impl ClusterQueue {
    /// Cohort name when set and non-empty
    pub fn cohort_name(&self) -> Option<&str> {
        self.cohort.as_deref().filter(|c| !c.is_empty())
    }

    /// Iterate every declared (flavor, resource) quota
    pub fn quotas(&self) -> impl Iterator<Item = (&FlavorName, &ResourceQuota)> {
        self.resource_groups.iter().flat_map(|group| {
            group
                .flavors
                .iter()
                .flat_map(|fq| fq.resources.iter().map(move |q| (&fq.name, q)))
        })
    }

    /// All flavor names referenced by the queue, in declaration order
    pub fn referenced_flavors(&self) -> Vec<&FlavorName> {
        self.resource_groups
            .iter()
            .flat_map(|g| g.flavors.iter().map(|f| &f.name))
            .collect()
    }

    /// The resource group covering a resource, if any
    pub fn group_for(&self, resource: &ResourceName) -> Option<&ResourceGroup> {
        self.resource_groups
            .iter()
            .find(|g| g.covered_resources.contains(resource))
    }
}

/// Usage of one resource under one flavor, as reported in status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Resource name
    pub name: ResourceName,
    /// Total assigned usage
    pub total: Quantity,
    /// Portion of total above nominal quota
    pub borrowed: Quantity,
}

/// Usage of one flavor, as reported in status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorUsage {
    /// Flavor name
    pub name: FlavorName,
    /// Per-resource usage
    pub resources: Vec<ResourceUsage>,
}

/// Derived status of a ClusterQueue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterQueueStatus {
    /// Workloads waiting in the pending heap
    pub pending_workloads: usize,
    /// Workloads currently admitted
    pub admitted_workloads: usize,
    /// Per-flavor per-resource usage
    pub flavors_usage: Vec<FlavorUsage>,
    /// Active condition and friends
    pub conditions: Vec<Condition>,
}
