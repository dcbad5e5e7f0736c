//! Shared harness for the integration suites
//!
//! Wires a real Cache, Manager, Controller, and Scheduler against the
//! in-memory object store, and feeds store mutations back through the
//! event handlers the way the watch stream would.

// Each integration binary uses a different slice of the harness.
#![allow(dead_code)]

use batchgate_api::{
    ClusterQueue, FlavorQuotas, LabelSelector, LocalQueue, PodSet, PreemptionPolicy, Quantity,
    QueueingStrategy, ResourceFlavor, ResourceGroup, ResourceName, ResourceQuota, Workload,
    WorkloadStatus,
};
use batchgate_config::ControllerConfig;
use batchgate_core::{
    AdapterRegistry, Cache, Controller, CycleStats, Event, FakeObjectStore, Manager, ObjectStore,
    Scheduler, TracingRecorder,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub struct Harness {
    pub cache: Arc<Cache>,
    pub queues: Arc<Manager>,
    pub store: Arc<FakeObjectStore>,
    pub controller: Controller,
    pub scheduler: Scheduler,
}

impl Harness {
    pub fn new(config: ControllerConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let cache = Arc::new(Cache::new(config.scheduler.assume_ttl_cycles));
        let queues = Arc::new(Manager::new());
        let store = Arc::new(FakeObjectStore::new());
        let scheduler = Scheduler::new(
            cache.clone(),
            queues.clone(),
            store.clone() as Arc<dyn ObjectStore>,
            Arc::new(TracingRecorder),
            &config,
        );
        let controller = Controller::new(
            cache.clone(),
            queues.clone(),
            AdapterRegistry::with_defaults(&config.integrations.frameworks)
                .expect("default adapters"),
            config.manage_jobs_without_queue_name,
            scheduler.waker(),
        );
        Self {
            cache,
            queues,
            store,
            controller,
            scheduler,
        }
    }

    pub fn default_setup() -> Self {
        Self::new(ControllerConfig::default())
    }

    pub fn add_flavor(&self, name: &str) {
        self.controller
            .handle_flavor_event(Event::Added(ResourceFlavor::new(name)));
    }

    pub fn add_cluster_queue(&self, cq: ClusterQueue) {
        self.controller.handle_cluster_queue_event(Event::Added(cq));
    }

    pub fn add_local_queue(&self, namespace: &str, name: &str, cluster_queue: &str) {
        self.controller
            .handle_local_queue_event(Event::Added(LocalQueue {
                name: name.to_string(),
                namespace: namespace.to_string(),
                cluster_queue: cluster_queue.to_string(),
                resource_version: 0,
            }));
    }

    /// Create the workload object and deliver its add event
    pub fn submit(&self, workload: Workload) {
        self.store.put_workload(workload.clone());
        self.controller.handle_workload_event(Event::Added(workload));
    }

    /// Feed every store object back through the handlers, as the watch
    /// stream would after the scheduler's writes
    pub fn pump(&self) {
        for workload in self.store.workloads() {
            self.controller
                .handle_workload_event(Event::Updated(workload));
        }
    }

    /// One scheduling cycle followed by event observation
    pub async fn cycle(&self) -> CycleStats {
        let stats = self.scheduler.schedule_cycle().await;
        self.pump();
        stats
    }

    pub fn usage_of(&self, cq: &str, flavor: &str, resource: &str) -> Quantity {
        self.cache
            .usage(cq)
            .expect("queue exists")
            .iter()
            .find(|fu| fu.name == flavor.into())
            .and_then(|fu| {
                fu.resources
                    .iter()
                    .find(|r| r.name == resource.into())
                    .map(|r| r.total)
            })
            .unwrap_or(Quantity::ZERO)
    }

    pub fn borrowed_of(&self, cq: &str, flavor: &str, resource: &str) -> Quantity {
        self.cache
            .usage(cq)
            .expect("queue exists")
            .iter()
            .find(|fu| fu.name == flavor.into())
            .and_then(|fu| {
                fu.resources
                    .iter()
                    .find(|r| r.name == resource.into())
                    .map(|r| r.borrowed)
            })
            .unwrap_or(Quantity::ZERO)
    }
}

/// A single-group, single-flavor cpu queue
pub fn cpu_queue(
    name: &str,
    cohort: Option<&str>,
    nominal: i64,
    strategy: QueueingStrategy,
    preemption: PreemptionPolicy,
) -> ClusterQueue {
    ClusterQueue {
        name: name.to_string(),
        cohort: cohort.map(str::to_string),
        resource_groups: vec![ResourceGroup {
            covered_resources: vec![ResourceName::cpu()],
            flavors: vec![FlavorQuotas {
                name: "x".into(),
                resources: vec![ResourceQuota {
                    name: ResourceName::cpu(),
                    nominal_quota: Quantity::from_units(nominal),
                    borrowing_limit: None,
                }],
            }],
        }],
        queueing_strategy: strategy,
        namespace_selector: Some(LabelSelector::everything()),
        preemption,
        resource_version: 0,
    }
}

/// A one-pod workload requesting whole cpu units
pub fn cpu_workload(name: &str, queue: &str, priority: i32, cpu: i64, age_secs: i64) -> Workload {
    Workload {
        name: name.to_string(),
        namespace: "default".to_string(),
        uid: Uuid::new_v4(),
        priority,
        queue_name: queue.to_string(),
        created_at: Utc::now() - chrono::Duration::seconds(age_secs),
        pod_sets: vec![PodSet {
            name: "main".to_string(),
            count: 1,
            requests: [(ResourceName::cpu(), Quantity::from_units(cpu))].into(),
            node_selector: BTreeMap::new(),
            affinity_terms: vec![],
            tolerations: vec![],
        }],
        finished: false,
        resource_version: 0,
        status: WorkloadStatus::default(),
    }
}

pub fn never_preempts() -> PreemptionPolicy {
    PreemptionPolicy::default()
}
