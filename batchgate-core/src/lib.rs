//! Admission core for batchgate
//!
//! This crate implements the batch-workload admission loop:
//! - `cache`: the authoritative in-memory quota snapshot per ClusterQueue,
//!   cohort bookkeeping, assumed admissions, and fit queries
//! - `queue`: priority-ordered pending heaps with StrictFIFO and
//!   BestEffortFIFO semantics, one per ClusterQueue
//! - `flavor_assigner`: the per-pod-set flavor assignment algorithm
//! - `preemption`: the victim planner for within-queue preemption and
//!   cohort reclaim
//! - `scheduler`: the cycle driver that snapshots the cache, walks the
//!   pending heads, and commits admissions, preemptions, and statuses
//! - `controller`: the inbound event-handler surface feeding cache and
//!   queues
//! - `client`: the outbound object-store and event-recorder seams
//! - `framework`: job-framework adapters translating concrete jobs into
//!   Workloads

pub mod cache;
pub mod client;
pub mod controller;
pub mod error;
pub mod flavor_assigner;
pub mod framework;
pub mod hierarchy;
pub mod preemption;
pub mod queue;
pub mod scheduler;
pub mod workload;

pub use cache::{
    AdmittedWorkload, Cache, CachedClusterQueue, FitOutcome, FlavorResource, Snapshot,
};
pub use client::{
    ClientError, EventRecorder, FakeObjectStore, ObjectStore, RateLimits, StoreWrite,
    TracingRecorder,
};
pub use controller::{Controller, Event};
pub use error::{CoreError, CoreResult};
pub use flavor_assigner::{AssignmentMode, AssignmentOutcome, FlavorAssignment};
pub use framework::{AdapterRegistry, BatchJobAdapter, JobAdapter, JobObject};
pub use preemption::{Planner, Victim};
pub use queue::Manager;
pub use scheduler::{CycleStats, Scheduler, SchedulerConfig};
pub use workload::{WorkloadInfo, WorkloadKey};
