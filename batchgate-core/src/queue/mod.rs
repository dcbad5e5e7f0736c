//! The queue manager
//!
//! One pending heap per ClusterQueue, fed by every LocalQueue pointing at
//! it. The scheduler pulls per-queue candidate lists once per cycle in a
//! deterministic round-robin; namespace-gated workloads stay queued but are
//! never handed out.

pub mod cluster_queue;

pub use cluster_queue::PendingQueue;

use crate::workload::{WorkloadInfo, WorkloadKey};
use batchgate_api::{LabelSelector, LocalQueue, QueueingStrategy};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Conventional namespace name label, seeded when no labels were observed
const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

/// One ClusterQueue's admissible candidates for a cycle
pub struct CycleCandidates {
    /// ClusterQueue name
    pub cluster_queue: String,
    /// Ordering contract of the queue
    pub strategy: QueueingStrategy,
    /// Candidates in heap order
    pub workloads: VecDeque<WorkloadInfo>,
}

/// Priority-ordered pending queues, one per ClusterQueue
///
/// Membership changes take the coarse lock; workload traffic takes only the
/// owning queue's lock.
pub struct Manager {
    queues: RwLock<HashMap<String, Arc<Mutex<PendingQueue>>>>,
    local_queues: RwLock<HashMap<String, LocalQueue>>,
    namespaces: RwLock<HashMap<String, BTreeMap<String, String>>>,
    /// Round-robin rotation across queues, advanced once per cycle
    round: AtomicUsize,
}

impl Manager {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            local_queues: RwLock::new(HashMap::new()),
            namespaces: RwLock::new(HashMap::new()),
            round: AtomicUsize::new(0),
        }
    }

    // ---- membership --------------------------------------------------

    /// Create or update the heap for a ClusterQueue
    ///
    /// The strategy never changes after creation (the cache rejects such
    /// updates); the namespace selector may, so parked entries are flushed
    /// for re-evaluation.
    pub fn add_cluster_queue(
        &self,
        name: &str,
        strategy: QueueingStrategy,
        namespace_selector: Option<LabelSelector>,
    ) {
        let mut queues = self.queues.write();
        match queues.get(name) {
            Some(existing) => {
                let mut queue = existing.lock();
                queue.namespace_selector = namespace_selector;
                queue.flush_parked();
            }
            None => {
                queues.insert(
                    name.to_string(),
                    Arc::new(Mutex::new(PendingQueue::new(strategy, namespace_selector))),
                );
            }
        }
    }

    /// Drop a ClusterQueue's heap; returns the orphaned workloads
    pub fn delete_cluster_queue(&self, name: &str) -> Vec<WorkloadInfo> {
        let Some(queue) = self.queues.write().remove(name) else {
            return Vec::new();
        };
        let mut queue = queue.lock();
        queue.flush_parked();
        let orphaned = queue.drain_ordered();
        if !orphaned.is_empty() {
            debug!(
                cluster_queue = name,
                count = orphaned.len(),
                "pending workloads orphaned by queue deletion"
            );
        }
        orphaned
    }

    /// Register a LocalQueue
    pub fn add_local_queue(&self, lq: LocalQueue) {
        self.local_queues.write().insert(lq.key(), lq);
    }

    /// Drop a LocalQueue; its pending workloads leave the heap
    pub fn delete_local_queue(&self, lq: &LocalQueue) -> Vec<WorkloadInfo> {
        self.local_queues.write().remove(&lq.key());
        let Some(queue) = self.queue(&lq.cluster_queue) else {
            return Vec::new();
        };
        let mut queue = queue.lock();
        let keys: Vec<WorkloadKey> = queue
            .iter()
            .filter(|info| {
                info.workload.namespace == lq.namespace && info.workload.queue_name == lq.name
            })
            .map(|info| info.key())
            .collect();
        keys.iter().filter_map(|key| queue.delete(key)).collect()
    }

    /// Record a namespace's labels for gating
    pub fn upsert_namespace(&self, name: &str, labels: BTreeMap<String, String>) {
        self.namespaces.write().insert(name.to_string(), labels);
    }

    /// Forget a namespace
    pub fn delete_namespace(&self, name: &str) {
        self.namespaces.write().remove(name);
    }

    // ---- workload traffic --------------------------------------------

    /// Queue a pending workload; false when its ClusterQueue is unknown
    pub fn add_or_update_workload(&self, info: WorkloadInfo) -> bool {
        let Some(queue) = self.queue(&info.cluster_queue) else {
            return false;
        };
        queue.lock().push(info);
        true
    }

    /// Remove a workload from its queue
    pub fn delete_workload(&self, cluster_queue: &str, key: &WorkloadKey) {
        if let Some(queue) = self.queue(cluster_queue) {
            queue.lock().delete(key);
        }
    }

    /// Return an unadmitted candidate to its heap
    ///
    /// `inadmissible` parks the workload until the next flush instead of
    /// re-offering it every cycle.
    pub fn requeue(&self, info: WorkloadInfo, inadmissible: bool) -> bool {
        let Some(queue) = self.queue(&info.cluster_queue) else {
            return false;
        };
        let mut queue = queue.lock();
        if inadmissible {
            queue.park(info);
        } else {
            queue.push(info);
        }
        true
    }

    /// Flush parked workloads of one queue, or of all queues
    pub fn flush_inadmissible(&self, cluster_queue: Option<&str>) {
        match cluster_queue {
            Some(name) => {
                if let Some(queue) = self.queue(name) {
                    queue.lock().flush_parked();
                }
            }
            None => {
                for queue in self.queues.read().values() {
                    queue.lock().flush_parked();
                }
            }
        }
    }

    // ---- counts ------------------------------------------------------

    /// Pending count of a ClusterQueue, parked entries included
    pub fn pending_count(&self, cluster_queue: &str) -> usize {
        self.queue(cluster_queue)
            .map(|queue| queue.lock().len())
            .unwrap_or(0)
    }

    /// Pending count of one LocalQueue
    pub fn pending_count_for(&self, lq: &LocalQueue) -> usize {
        self.queue(&lq.cluster_queue)
            .map(|queue| {
                queue
                    .lock()
                    .iter()
                    .filter(|info| {
                        info.workload.namespace == lq.namespace
                            && info.workload.queue_name == lq.name
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    /// True when the workload is pending in its queue
    pub fn contains(&self, cluster_queue: &str, key: &WorkloadKey) -> bool {
        self.queue(cluster_queue)
            .is_some_and(|queue| queue.lock().contains(key))
    }

    // ---- cycle interface ---------------------------------------------

    /// Hand out the cycle's candidates, one list per ClusterQueue, in a
    /// deterministic round-robin rotation
    ///
    /// Parked entries are flushed first: a cycle only runs because
    /// something changed, so they deserve another look. Workloads whose
    /// namespace fails the queue's selector stay queued but are not handed
    /// out. Unattempted candidates must be returned through `requeue`.
    pub fn heads(&self) -> Vec<CycleCandidates> {
        let queues = self.queues.read();
        let mut names: Vec<_> = queues.keys().cloned().collect();
        names.sort();
        if names.is_empty() {
            return Vec::new();
        }
        let offset = self.round.fetch_add(1, Ordering::Relaxed) % names.len();
        names.rotate_left(offset);

        let namespaces = self.namespaces.read();
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let Some(queue) = queues.get(&name) else {
                continue;
            };
            let mut queue = queue.lock();
            queue.flush_parked();
            let strategy = queue.strategy;
            let selector = queue.namespace_selector.clone();
            let mut eligible = VecDeque::new();
            for info in queue.drain_ordered() {
                if namespace_eligible(&selector, &namespaces, &info.workload.namespace) {
                    eligible.push_back(info);
                } else {
                    // Stays queued, never offered: the selector may change.
                    queue.push(info);
                }
            }
            if !eligible.is_empty() {
                out.push(CycleCandidates {
                    cluster_queue: name,
                    strategy,
                    workloads: eligible,
                });
            }
        }
        out
    }

    fn queue(&self, name: &str) -> Option<Arc<Mutex<PendingQueue>>> {
        self.queues.read().get(name).cloned()
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate a queue's namespace selector against observed namespace labels
///
/// `None` admits no namespace; an empty selector admits all. Unobserved
/// namespaces match on the conventional name label only.
fn namespace_eligible(
    selector: &Option<LabelSelector>,
    namespaces: &HashMap<String, BTreeMap<String, String>>,
    namespace: &str,
) -> bool {
    let Some(selector) = selector else {
        return false;
    };
    if selector.is_empty() {
        return true;
    }
    match namespaces.get(namespace) {
        Some(labels) => selector.matches(labels),
        None => {
            let implied: BTreeMap<String, String> =
                [(NAMESPACE_NAME_LABEL.to_string(), namespace.to_string())].into();
            selector.matches(&implied)
        }
    }
}
