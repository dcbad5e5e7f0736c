//! Inbound event handling
//!
//! The object stream delivers add/update/delete events with at-least-once
//! semantics; every handler here is idempotent. Handlers feed the cache and
//! the queue manager and wake the scheduler. They may run concurrently;
//! both collaborators are internally synchronized.

use crate::cache::Cache;
use crate::error::CoreResult;
use crate::framework::{AdapterRegistry, JobObject};
use crate::queue::Manager;
use crate::workload::WorkloadInfo;
use batchgate_api::{ClusterQueue, LocalQueue, ResourceFlavor, Workload};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// An observed object-stream event
#[derive(Debug, Clone)]
pub enum Event<T> {
    Added(T),
    Updated(T),
    Deleted(T),
}

impl<T> Event<T> {
    fn into_inner(self) -> (T, bool) {
        match self {
            Event::Added(obj) | Event::Updated(obj) => (obj, false),
            Event::Deleted(obj) => (obj, true),
        }
    }
}

/// Event-handler surface feeding the admission core
pub struct Controller {
    cache: Arc<Cache>,
    queues: Arc<Manager>,
    adapters: AdapterRegistry,
    manage_jobs_without_queue_name: bool,
    wake: Arc<Notify>,
    /// Workloads seen before their LocalQueue; replayed when it appears
    unrouted: DashMap<String, Workload>,
}

impl Controller {
    pub fn new(
        cache: Arc<Cache>,
        queues: Arc<Manager>,
        adapters: AdapterRegistry,
        manage_jobs_without_queue_name: bool,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            cache,
            queues,
            adapters,
            manage_jobs_without_queue_name,
            wake,
            unrouted: DashMap::new(),
        }
    }

    /// Handle a ResourceFlavor event
    pub fn handle_flavor_event(&self, event: Event<ResourceFlavor>) {
        let (flavor, deleted) = event.into_inner();
        if deleted {
            self.cache.delete_flavor(&flavor.name);
        } else {
            self.cache.upsert_flavor(flavor);
            // New capacity may unblock parked workloads.
            self.queues.flush_inadmissible(None);
        }
        self.wake.notify_one();
    }

    /// Handle a ClusterQueue event
    pub fn handle_cluster_queue_event(&self, event: Event<ClusterQueue>) {
        let (cq, deleted) = event.into_inner();
        let name = cq.name.clone();
        if deleted {
            self.cache.delete_cluster_queue(&name);
            let orphaned = self.queues.delete_cluster_queue(&name);
            if !orphaned.is_empty() {
                debug!(cluster_queue = %name, count = orphaned.len(), "orphaned pending workloads");
            }
        } else {
            let strategy = cq.queueing_strategy;
            let selector = cq.namespace_selector.clone();
            match self.cache.upsert_cluster_queue(cq) {
                Ok(()) => {
                    self.queues.add_cluster_queue(&name, strategy, selector);
                }
                Err(err) => {
                    // The queue is recorded inactive; keep its heap so
                    // status still counts the pending workloads.
                    warn!(cluster_queue = %name, %err, "ClusterQueue rejected");
                    self.queues.add_cluster_queue(&name, strategy, selector);
                }
            }
        }
        self.wake.notify_one();
    }

    /// Handle a LocalQueue event
    pub fn handle_local_queue_event(&self, event: Event<LocalQueue>) {
        let (lq, deleted) = event.into_inner();
        if deleted {
            self.cache.delete_local_queue(&lq.key());
            let moved = self.queues.delete_local_queue(&lq);
            for info in moved {
                // Back to the waiting room until a queue routes them again.
                self.unrouted.insert(info.key(), info.workload);
            }
        } else {
            self.cache.add_local_queue(lq.clone());
            self.queues.add_local_queue(lq.clone());
            self.replay_unrouted(&lq);
        }
        self.wake.notify_one();
    }

    /// Handle a namespace event (labels drive namespace gating)
    pub fn handle_namespace_event(&self, name: &str, labels: Option<BTreeMap<String, String>>) {
        match labels {
            Some(labels) => self.queues.upsert_namespace(name, labels),
            None => self.queues.delete_namespace(name),
        }
        self.wake.notify_one();
    }

    /// Handle a Workload event
    pub fn handle_workload_event(&self, event: Event<Workload>) {
        let (workload, deleted) = event.into_inner();
        let key = workload.key();
        if deleted {
            self.unrouted.remove(&key);
            if let Some(owner) = self.cache.admitted_owner(&key) {
                self.queues.delete_workload(&owner, &key);
            } else if let Some(cq) = self.route(&workload) {
                self.queues.delete_workload(&cq, &key);
            }
            self.cache.delete_workload(&key);
            self.wake.notify_one();
            return;
        }

        let Some(cluster_queue) = self.route(&workload) else {
            debug!(workload = %key, queue = %workload.queue_name, "no LocalQueue; parked unrouted");
            self.unrouted.insert(key, workload);
            return;
        };
        self.unrouted.remove(&key);
        let info = WorkloadInfo::new(workload, cluster_queue.clone());

        self.cache.add_or_update_workload(info.clone());
        if info.workload.is_admitted() || info.workload.finished {
            // Not pending anymore; make sure no heap still offers it.
            self.queues.delete_workload(&cluster_queue, &key);
            if info.workload.finished {
                // Freed quota may unblock parked peers.
                self.queues.flush_inadmissible(None);
            }
        } else if !self.queues.add_or_update_workload(info) {
            debug!(workload = %key, cluster_queue = %cluster_queue, "target queue not yet known");
        }
        self.wake.notify_one();
    }

    /// Handle a framework job event, translating through the adapter
    ///
    /// A suspended job is withdrawn from queueing until it is resumed;
    /// the resume event re-enqueues it.
    pub fn handle_job_event(&self, event: Event<JobObject>) -> CoreResult<()> {
        let (job, deleted) = event.into_inner();
        let adapter = self.adapters.adapter_for(&job.framework)?;
        let workload = adapter.build_workload(&job, self.manage_jobs_without_queue_name)?;
        let event = if deleted || adapter.is_suspended(&job) {
            Event::Deleted(workload)
        } else {
            Event::Updated(workload)
        };
        self.handle_workload_event(event);
        Ok(())
    }

    /// Resolve a workload's target ClusterQueue
    ///
    /// An admitted workload is pinned to its admission's queue; a pending
    /// one routes through its LocalQueue.
    fn route(&self, workload: &Workload) -> Option<String> {
        if let Some(admission) = &workload.status.admission {
            return Some(admission.cluster_queue.clone());
        }
        self.cache
            .local_queue(&workload.namespace, &workload.queue_name)
            .map(|lq| lq.cluster_queue)
    }

    /// Re-handle workloads that were waiting for this LocalQueue
    fn replay_unrouted(&self, lq: &LocalQueue) {
        let matching: Vec<Workload> = self
            .unrouted
            .iter()
            .filter(|entry| {
                entry.value().namespace == lq.namespace && entry.value().queue_name == lq.name
            })
            .map(|entry| entry.value().clone())
            .collect();
        for workload in matching {
            self.handle_workload_event(Event::Updated(workload));
        }
    }
}
