//! Object model for the batchgate admission controller
//!
//! This crate defines the declarative objects the admission core consumes
//! and mutates:
//! - `ResourceFlavor`: a named quota dimension tied to a class of nodes
//! - `ClusterQueue`: a quota holder with nominal and borrowable capacity
//! - `LocalQueue`: a namespaced pointer routing submissions to a ClusterQueue
//! - `Workload`: the admission unit (pod sets with resource requests)
//!
//! Objects carry a `resource_version` for conditional writes and are
//! (de)serializable with serde.

pub mod cluster_queue;
pub mod condition;
pub mod error;
pub mod flavor;
pub mod local_queue;
pub mod resource;
pub mod selector;
pub mod validation;
pub mod workload;

pub use cluster_queue::{
    ClusterQueue, ClusterQueueStatus, FlavorQuotas, FlavorUsage, PreemptionPolicy,
    QueueingStrategy, ReclaimPolicy, ResourceGroup, ResourceQuota, ResourceUsage,
    WithinQueuePolicy,
};
pub use condition::{Condition, ConditionType};
pub use error::{ApiError, ApiResult};
pub use flavor::{FlavorName, ResourceFlavor, Taint, TaintEffect, Toleration, TolerationOperator};
pub use local_queue::{LocalQueue, LocalQueueStatus};
pub use resource::{Quantity, Requests, ResourceName};
pub use selector::{LabelSelector, MatchExpression, SelectorOperator};
pub use workload::{
    Admission, PodSet, PodSetAssignment, Workload, WorkloadState, WorkloadStatus,
};
