//! Error types for the admission core

use thiserror::Error;

/// Result type for admission core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by the cache, queues, planner, and scheduler
///
/// Nothing here terminates the process. `InvalidConfig` deactivates the
/// offending ClusterQueue; `UsageUnderflow` triggers a rebuild of the
/// affected queue from observed workloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// ClusterQueue or flavor graph is inconsistent
    #[error("invalid configuration for ClusterQueue {cluster_queue}: {reason}")]
    InvalidConfig {
        cluster_queue: String,
        reason: String,
    },

    /// External store rejected a conditional write
    #[error("write conflict on {key}")]
    WriteConflict { key: String },

    /// Request cannot fit and preemption is infeasible
    #[error("capacity exhausted for workload {key} in ClusterQueue {cluster_queue}")]
    CapacityExhausted { key: String, cluster_queue: String },

    /// Object changed between snapshot and write
    #[error("stale snapshot for {key}")]
    StaleSnapshot { key: String },

    /// Usage arithmetic went below zero; internal invariant violation
    #[error("usage underflow in ClusterQueue {cluster_queue} on {flavor}/{resource}")]
    UsageUnderflow {
        cluster_queue: String,
        flavor: String,
        resource: String,
    },

    /// Referenced ClusterQueue is not in the cache
    #[error("ClusterQueue {0} not found")]
    ClusterQueueNotFound(String),

    /// Referenced LocalQueue is not known
    #[error("LocalQueue {0} not found")]
    LocalQueueNotFound(String),

    /// Referenced workload is not known
    #[error("workload {0} not found")]
    WorkloadNotFound(String),

    /// Job carries no queue name and unmanaged jobs are not admitted
    #[error("job {0} names no LocalQueue")]
    MissingQueueName(String),

    /// No adapter registered for the job's framework
    #[error("no adapter for framework {0}")]
    UnknownFramework(String),

    /// Object model validation failure
    #[error(transparent)]
    Api(#[from] batchgate_api::ApiError),
}
