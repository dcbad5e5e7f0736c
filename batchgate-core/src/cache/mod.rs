//! The authoritative in-memory quota snapshot
//!
//! The cache tracks every ClusterQueue's configured quota and currently
//! assigned usage, the cohort graph, known flavors, and LocalQueue routing.
//! Event handlers mutate it concurrently; the scheduler reads it through
//! per-cycle snapshots. A single read-write lock protects the maps; cluster
//! queues are held behind `Arc` so snapshots are cheap and copy-on-write.

pub mod cluster_queue;
pub mod snapshot;

pub use cluster_queue::{AdmittedWorkload, CachedClusterQueue, FlavorResource, QuotaLimits};
pub use snapshot::{CohortAggregate, QuotaCheck, Snapshot};

use crate::error::{CoreError, CoreResult};
use crate::hierarchy::CohortIndex;
use crate::workload::{WorkloadInfo, WorkloadKey};
use batchgate_api::{
    condition::{self, Condition, ConditionType},
    validation, Admission, ClusterQueue, ClusterQueueStatus, FlavorName, FlavorUsage, LocalQueue,
    LocalQueueStatus, Quantity, Requests, ResourceFlavor,
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Answer to a `can_fit` query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitOutcome {
    /// The request fits under current usage and limits
    pub fits: bool,
    /// Borrow the admission would create across resources
    pub borrowed: Quantity,
    /// Largest shortfall against a violated limit; zero when fitting
    pub exceeded_by: Quantity,
}

struct CacheState {
    cluster_queues: HashMap<String, Arc<CachedClusterQueue>>,
    cohorts: CohortIndex,
    flavors: HashMap<FlavorName, ResourceFlavor>,
    local_queues: HashMap<String, LocalQueue>,
    /// Workload key → owning ClusterQueue, for O(1) release
    admitted_index: HashMap<WorkloadKey, String>,
}

struct AssumedEntry {
    cluster_queue: String,
    expires_at_cycle: u64,
    /// Revision the admission was computed against; older observations
    /// must not roll the assume back
    resource_version: u64,
}

/// The quota cache
pub struct Cache {
    state: RwLock<CacheState>,
    /// Assumed admissions awaiting observation
    assumed: DashMap<WorkloadKey, AssumedEntry>,
    /// Scheduling cycle counter; drives assume expiry
    cycle: AtomicU64,
    assume_ttl_cycles: u64,
}

impl Cache {
    /// Build an empty cache with the given assume horizon
    pub fn new(assume_ttl_cycles: u32) -> Self {
        Self {
            state: RwLock::new(CacheState {
                cluster_queues: HashMap::new(),
                cohorts: CohortIndex::new(),
                flavors: HashMap::new(),
                local_queues: HashMap::new(),
                admitted_index: HashMap::new(),
            }),
            assumed: DashMap::new(),
            cycle: AtomicU64::new(0),
            assume_ttl_cycles: assume_ttl_cycles.max(1) as u64,
        }
    }

    // ---- flavors -----------------------------------------------------

    /// Insert or update a flavor and reactivate dependent queues
    pub fn upsert_flavor(&self, flavor: ResourceFlavor) {
        let mut state = self.state.write();
        state.flavors.insert(flavor.name.clone(), flavor);
        refresh_all_active(&mut state);
    }

    /// Drop a flavor; queues referencing it go inactive
    pub fn delete_flavor(&self, name: &FlavorName) {
        let mut state = self.state.write();
        state.flavors.remove(name);
        refresh_all_active(&mut state);
    }

    // ---- cluster queues ----------------------------------------------

    /// Insert or update a ClusterQueue
    ///
    /// Structural validation failures and quota overlaps with queues
    /// outside the cohort record the queue as inactive (so status can
    /// report the reason) and return `InvalidConfig`. A queueing-strategy
    /// mutation is rejected outright, leaving the previous spec in force.
    pub fn upsert_cluster_queue(&self, spec: ClusterQueue) -> CoreResult<()> {
        let mut state = self.state.write();
        let name = spec.name.clone();
        let old = state.cluster_queues.get(&name).cloned();

        if let Some(old) = &old {
            if old.spec.queueing_strategy != spec.queueing_strategy {
                return Err(CoreError::InvalidConfig {
                    cluster_queue: name,
                    reason: "queueing_strategy is immutable".to_string(),
                });
            }
        }

        let invalid_reason = validation::validate_cluster_queue(&spec)
            .err()
            .map(|e| e.to_string())
            .or_else(|| overlap_reason(&state, &spec));

        let old_cohort = old
            .as_ref()
            .and_then(|cq| cq.spec.cohort_name().map(str::to_string));
        state.cohorts.update(
            &name,
            old_cohort.as_deref(),
            spec.cohort_name(),
        );

        let mut cq = CachedClusterQueue::from_spec(spec, &state.flavors);
        if let Some(old) = old {
            // Keep the admitted books across spec updates.
            cq.usage = old.usage.clone();
            cq.admitted = old.admitted.clone();
        }
        if let Some(reason) = invalid_reason {
            // A misconfigured queue must not contribute quota to its cohort.
            cq.quotas.clear();
            cq.deactivate("InvalidConfig", reason.clone());
            state.cluster_queues.insert(name.clone(), Arc::new(cq));
            return Err(CoreError::InvalidConfig {
                cluster_queue: name,
                reason,
            });
        }
        state.cluster_queues.insert(name, Arc::new(cq));
        Ok(())
    }

    /// Remove a ClusterQueue
    pub fn delete_cluster_queue(&self, name: &str) {
        let mut state = self.state.write();
        let Some(cq) = state.cluster_queues.remove(name) else {
            return;
        };
        if let Some(cohort) = cq.spec.cohort_name() {
            let cohort = cohort.to_string();
            state.cohorts.remove(&cohort, name);
        }
        if !cq.admitted.is_empty() {
            warn!(
                cluster_queue = name,
                admitted = cq.admitted.len(),
                "ClusterQueue deleted while holding admitted workloads"
            );
        }
        state
            .admitted_index
            .retain(|_, owner| owner.as_str() != name);
    }

    // ---- local queues ------------------------------------------------

    /// Register a LocalQueue for routing
    pub fn add_local_queue(&self, lq: LocalQueue) {
        self.state.write().local_queues.insert(lq.key(), lq);
    }

    /// Drop a LocalQueue
    pub fn delete_local_queue(&self, key: &str) {
        self.state.write().local_queues.remove(key);
    }

    /// Resolve a `namespace/queue` reference
    pub fn local_queue(&self, namespace: &str, name: &str) -> Option<LocalQueue> {
        self.state
            .read()
            .local_queues
            .get(&format!("{namespace}/{name}"))
            .cloned()
    }

    /// All registered LocalQueues
    pub fn local_queues(&self) -> Vec<LocalQueue> {
        self.state.read().local_queues.values().cloned().collect()
    }

    // ---- workloads ---------------------------------------------------

    /// Tentatively charge an admission before the object write lands
    ///
    /// Prevents double-admission between decision and observation. The
    /// charge expires after the configured number of cycles unless the
    /// observed object merges into it.
    pub fn assume_workload(&self, mut info: WorkloadInfo, admission: &Admission) -> CoreResult<()> {
        info.workload.status.admission = Some(admission.clone());
        let key = info.key();
        let resource_version = info.workload.resource_version;
        let target = admission.cluster_queue.clone();
        let usage = AdmittedWorkload::usage_of(admission);

        let mut state = self.state.write();
        let Some(entry) = state.cluster_queues.get_mut(&target) else {
            return Err(CoreError::ClusterQueueNotFound(target));
        };
        let cq = Arc::make_mut(entry);
        cq.add_workload(AdmittedWorkload {
            info,
            usage,
            admitted_at: Utc::now(),
            assumed: true,
        })?;
        state.admitted_index.insert(key.clone(), target.clone());
        self.assumed.insert(
            key,
            AssumedEntry {
                cluster_queue: target,
                expires_at_cycle: self.cycle.load(Ordering::Relaxed) + self.assume_ttl_cycles,
                resource_version,
            },
        );
        Ok(())
    }

    /// Roll back an assumed admission that will never be observed
    ///
    /// Returns the released record; `None` when the key was not assumed.
    pub fn forget_workload(&self, key: &WorkloadKey) -> Option<WorkloadInfo> {
        let (_, entry) = self.assumed.remove(key)?;
        let mut state = self.state.write();
        state.admitted_index.remove(key);
        let released = release_from(&mut state, &entry.cluster_queue, key);
        released.map(|aw| aw.info)
    }

    /// Apply an observed workload; idempotent on identical admissions
    pub fn add_or_update_workload(&self, info: WorkloadInfo) {
        let key = info.key();
        let admission = if info.workload.finished {
            None
        } else {
            info.workload.status.admission.clone()
        };
        let mut state = self.state.write();

        let previous_owner = state.admitted_index.get(&key).cloned();
        if let Some(admission) = admission {
            let target = admission.cluster_queue.clone();
            if let Some(owner) = &previous_owner {
                if owner != &target {
                    release_from(&mut state, &owner.clone(), &key);
                }
            }
            let Some(entry) = state.cluster_queues.get_mut(&target) else {
                warn!(workload = %key, cluster_queue = %target, "admitted workload for unknown ClusterQueue");
                state.admitted_index.remove(&key);
                self.assumed.remove(&key);
                return;
            };
            let cq = Arc::make_mut(entry);
            let usage = AdmittedWorkload::usage_of(&admission);
            if let Err(err) = cq.add_workload(AdmittedWorkload {
                info,
                usage,
                admitted_at: Utc::now(),
                assumed: false,
            }) {
                error!(%err, workload = %key, "usage books inconsistent; rebuilding queue");
                cq.rebuild_usage();
            }
            state.admitted_index.insert(key.clone(), target);
            // The observed object supersedes the assume.
            self.assumed.remove(&key);
        } else {
            // A pending observation older than the assumed admission is
            // stale; the admitted version is still on its way.
            if let Some(entry) = self.assumed.get(&key) {
                if !info.workload.finished && info.workload.resource_version <= entry.resource_version {
                    return;
                }
            }
            // Pending or finished: no usage may remain charged.
            if let Some(owner) = previous_owner {
                release_from(&mut state, &owner, &key);
                state.admitted_index.remove(&key);
            }
            self.assumed.remove(&key);
        }
    }

    /// Drop a workload and release any usage it held
    pub fn delete_workload(&self, key: &WorkloadKey) {
        let mut state = self.state.write();
        if let Some(owner) = state.admitted_index.remove(key) {
            release_from(&mut state, &owner, key);
        }
        self.assumed.remove(key);
    }

    /// Owning ClusterQueue of an admitted workload
    pub fn admitted_owner(&self, key: &WorkloadKey) -> Option<String> {
        self.state.read().admitted_index.get(key).cloned()
    }

    // ---- cycle bookkeeping -------------------------------------------

    /// Advance the cycle counter and expire stale assumes
    ///
    /// Returns the released workloads so the scheduler can requeue them.
    pub fn advance_cycle(&self) -> (u64, Vec<WorkloadInfo>) {
        let now = self.cycle.fetch_add(1, Ordering::Relaxed) + 1;
        let expired: Vec<(WorkloadKey, String)> = self
            .assumed
            .iter()
            .filter(|entry| entry.value().expires_at_cycle <= now)
            .map(|entry| (entry.key().clone(), entry.value().cluster_queue.clone()))
            .collect();

        let mut released = Vec::new();
        if !expired.is_empty() {
            let mut state = self.state.write();
            for (key, owner) in expired {
                if self.assumed.remove(&key).is_none() {
                    continue;
                }
                warn!(workload = %key, "assumed admission expired without observation");
                state.admitted_index.remove(&key);
                if let Some(aw) = release_from(&mut state, &owner, &key) {
                    let mut info = aw.info;
                    info.workload.status.admission = None;
                    released.push(info);
                }
            }
        }
        (now, released)
    }

    /// Current cycle number
    pub fn current_cycle(&self) -> u64 {
        self.cycle.load(Ordering::Relaxed)
    }

    // ---- queries -----------------------------------------------------

    /// Take a frozen view for one scheduling cycle
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read();
        Snapshot::new(
            state.cluster_queues.clone(),
            state.cohorts.clone(),
            state.flavors.clone(),
            self.cycle.load(Ordering::Relaxed),
        )
    }

    /// Check whether per-resource amounts fit one flavor of a queue
    pub fn can_fit(
        &self,
        cq_name: &str,
        flavor: &FlavorName,
        requests: &Requests,
    ) -> CoreResult<FitOutcome> {
        let snapshot = self.snapshot();
        let cq = snapshot
            .cluster_queue(cq_name)
            .ok_or_else(|| CoreError::ClusterQueueNotFound(cq_name.to_string()))?;
        let cohort = snapshot.cohort_aggregate(cq);

        let mut outcome = FitOutcome {
            fits: true,
            borrowed: Quantity::ZERO,
            exceeded_by: Quantity::ZERO,
        };
        for (resource, amount) in requests {
            let fr = (flavor.clone(), resource.clone());
            match snapshot.quota_check(cq, &fr, *amount, cohort.as_ref()) {
                Some(check) if check.fits => {
                    outcome.borrowed += check.borrow_needed;
                }
                Some(check) => {
                    outcome.fits = false;
                    outcome.exceeded_by = outcome.exceeded_by.max(check.exceeded_by);
                }
                None => {
                    outcome.fits = false;
                    outcome.exceeded_by = outcome.exceeded_by.max(*amount);
                }
            }
        }
        Ok(outcome)
    }

    /// Current per-flavor usage of a queue
    pub fn usage(&self, cq_name: &str) -> CoreResult<Vec<FlavorUsage>> {
        let state = self.state.read();
        let cq = state
            .cluster_queues
            .get(cq_name)
            .ok_or_else(|| CoreError::ClusterQueueNotFound(cq_name.to_string()))?;
        Ok(cq.flavors_usage())
    }

    /// Derive a ClusterQueue status; pending count comes from the queue
    /// manager
    pub fn cluster_queue_status(
        &self,
        cq_name: &str,
        pending_workloads: usize,
    ) -> CoreResult<ClusterQueueStatus> {
        let state = self.state.read();
        let cq = state
            .cluster_queues
            .get(cq_name)
            .ok_or_else(|| CoreError::ClusterQueueNotFound(cq_name.to_string()))?;
        let mut conditions = Vec::new();
        let active = match &cq.inactive_reason {
            None => Condition::new(ConditionType::Active, true, "Ready"),
            Some((reason, message)) => {
                Condition::new(ConditionType::Active, false, reason.clone())
                    .with_message(message.clone())
            }
        };
        condition::upsert(&mut conditions, active);
        Ok(ClusterQueueStatus {
            pending_workloads,
            admitted_workloads: cq.admitted.len(),
            flavors_usage: cq.flavors_usage(),
            conditions,
        })
    }

    /// Derive a LocalQueue status; pending count comes from the queue
    /// manager
    pub fn local_queue_status(&self, lq: &LocalQueue, pending_workloads: usize) -> LocalQueueStatus {
        let state = self.state.read();
        let admitted_workloads = state
            .cluster_queues
            .get(&lq.cluster_queue)
            .map(|cq| {
                cq.admitted
                    .values()
                    .filter(|aw| {
                        aw.info.workload.namespace == lq.namespace
                            && aw.info.workload.queue_name == lq.name
                    })
                    .count()
            })
            .unwrap_or(0);
        LocalQueueStatus {
            pending_workloads,
            admitted_workloads,
            conditions: Vec::new(),
        }
    }

    /// Whether a queue is active
    pub fn is_active(&self, cq_name: &str) -> bool {
        self.state
            .read()
            .cluster_queues
            .get(cq_name)
            .is_some_and(|cq| cq.active)
    }

    /// Admitted workloads past the pods-ready horizon, oldest first
    ///
    /// Assumed admissions are skipped; their pods cannot have started.
    pub fn pods_ready_timeouts(&self, timeout: chrono::Duration) -> Vec<WorkloadInfo> {
        let state = self.state.read();
        let now = Utc::now();
        let mut victims = Vec::new();
        for cq in state.cluster_queues.values() {
            for aw in cq.admitted.values() {
                if !aw.assumed
                    && !aw.info.workload.pods_ready()
                    && now - aw.admitted_at > timeout
                {
                    victims.push(aw.info.clone());
                }
            }
        }
        victims.sort_by_key(|info| info.order_key());
        victims
    }

    /// Rebuild one queue's usage from its admission records
    pub fn rebuild_cluster_queue(&self, cq_name: &str) -> CoreResult<()> {
        let mut state = self.state.write();
        let entry = state
            .cluster_queues
            .get_mut(cq_name)
            .ok_or_else(|| CoreError::ClusterQueueNotFound(cq_name.to_string()))?;
        Arc::make_mut(entry).rebuild_usage();
        debug!(cluster_queue = cq_name, "usage rebuilt from admission records");
        Ok(())
    }
}

/// Release a workload from a queue, rebuilding on underflow
fn release_from(
    state: &mut CacheState,
    cq_name: &str,
    key: &WorkloadKey,
) -> Option<AdmittedWorkload> {
    let entry = state.cluster_queues.get_mut(cq_name)?;
    let cq = Arc::make_mut(entry);
    match cq.remove_workload(key) {
        Ok(removed) => removed,
        Err(err) => {
            error!(%err, workload = %key, "usage books inconsistent; rebuilding queue");
            cq.rebuild_usage();
            None
        }
    }
}

/// Recompute Active for every queue after a flavor change
///
/// Queues parked inactive for InvalidConfig keep that reason; flavor
/// resolution must not mask a configuration error.
fn refresh_all_active(state: &mut CacheState) {
    let flavors = state.flavors.clone();
    for entry in state.cluster_queues.values_mut() {
        let invalid = entry
            .inactive_reason
            .as_ref()
            .is_some_and(|(reason, _)| reason == "InvalidConfig");
        if !invalid {
            Arc::make_mut(entry).refresh_active(&flavors);
        }
    }
}

/// Reason a new spec's quota coordinates collide with queues outside the
/// cohort; `None` when clean
fn overlap_reason(state: &CacheState, spec: &ClusterQueue) -> Option<String> {
    for (flavor, quota) in spec.quotas() {
        for (other_name, other) in &state.cluster_queues {
            if other_name == &spec.name {
                continue;
            }
            let declared = other
                .quotas
                .contains_key(&(flavor.clone(), quota.name.clone()));
            if declared {
                let same_cohort = match (spec.cohort_name(), other.spec.cohort_name()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                };
                if !same_cohort {
                    return Some(format!(
                        "resource {}/{} already claimed by ClusterQueue {} outside the cohort",
                        flavor, quota.name, other_name
                    ));
                }
            }
        }
    }
    None
}
