//! Job-framework adapters
//!
//! Concrete job kinds (batch jobs, MPI jobs, ...) share the Workload
//! contract through an adapter per framework: pod-set shape extraction,
//! suspension, and the pod-readiness signal. The admission core itself only
//! ever sees Workloads.

use crate::error::{CoreError, CoreResult};
use batchgate_api::{
    condition::{Condition, ConditionType},
    PodSet, Quantity, Requests, Toleration, Workload, WorkloadStatus,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// A framework job as observed from the object stream
#[derive(Debug, Clone)]
pub struct JobObject {
    /// Owning framework (`batch/job`, ...)
    pub framework: String,
    /// Job name
    pub name: String,
    /// Owning namespace
    pub namespace: String,
    /// Stable identity
    pub uid: Uuid,
    /// LocalQueue reference, when labeled
    pub queue_name: Option<String>,
    /// Admission priority
    pub priority: i32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Whether the job is currently suspended
    pub suspended: bool,
    /// Whether the job ran to completion
    pub finished: bool,
    /// Whether all pods reported ready
    pub pods_ready: bool,
    /// Object revision
    pub resource_version: u64,
    /// Framework-specific spec
    pub payload: serde_json::Value,
}

/// Translation between one framework's jobs and Workloads
///
/// The capability set per framework: pod-set shape extraction,
/// suspend/resume, and the pod-readiness signal. A suspended job is
/// withdrawn from admission until it is resumed.
pub trait JobAdapter: Send + Sync {
    /// Framework this adapter serves
    fn framework_name(&self) -> &str;

    /// Extract the pod-set shape from a job
    fn pod_sets(&self, job: &JobObject) -> CoreResult<Vec<PodSet>>;

    /// Whether the job is currently withdrawn from admission
    fn is_suspended(&self, job: &JobObject) -> bool {
        job.suspended
    }

    /// Withdraw a job from admission
    fn suspend(&self, job: &mut JobObject) {
        job.suspended = true;
    }

    /// Hand a job back to admission
    fn resume(&self, job: &mut JobObject) {
        job.suspended = false;
    }

    /// Whether all of the job's pods reported ready
    fn pods_ready(&self, job: &JobObject) -> bool {
        job.pods_ready
    }

    /// Build the Workload shadowing a job
    ///
    /// Jobs without a queue name are only managed when the controller is
    /// configured to do so; their Workload stays unroutable until labeled.
    fn build_workload(&self, job: &JobObject, manage_unlabeled: bool) -> CoreResult<Workload> {
        let queue_name = match (&job.queue_name, manage_unlabeled) {
            (Some(queue), _) => queue.clone(),
            (None, true) => String::new(),
            (None, false) => {
                return Err(CoreError::MissingQueueName(format!(
                    "{}/{}",
                    job.namespace, job.name
                )))
            }
        };
        let mut status = WorkloadStatus::default();
        if self.pods_ready(job) {
            status
                .conditions
                .push(Condition::new(ConditionType::PodsReady, true, "PodsReady"));
        }
        Ok(Workload {
            name: job.name.clone(),
            namespace: job.namespace.clone(),
            uid: job.uid,
            priority: job.priority,
            queue_name,
            created_at: job.created_at,
            pod_sets: self.pod_sets(job)?,
            finished: job.finished,
            resource_version: job.resource_version,
            status,
        })
    }
}

/// Registered adapters, keyed by framework name
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn JobAdapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("frameworks", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdapterRegistry {
    /// Build a registry from the configured framework list
    pub fn with_defaults(frameworks: &[String]) -> CoreResult<Self> {
        let mut registry = Self {
            adapters: HashMap::new(),
        };
        for framework in frameworks {
            match framework.as_str() {
                "batch/job" => registry.register(Arc::new(BatchJobAdapter)),
                other => return Err(CoreError::UnknownFramework(other.to_string())),
            }
        }
        Ok(registry)
    }

    /// Register an adapter, replacing any previous one for the framework
    pub fn register(&mut self, adapter: Arc<dyn JobAdapter>) {
        self.adapters
            .insert(adapter.framework_name().to_string(), adapter);
    }

    /// Adapter serving a framework
    pub fn adapter_for(&self, framework: &str) -> CoreResult<Arc<dyn JobAdapter>> {
        self.adapters
            .get(framework)
            .cloned()
            .ok_or_else(|| CoreError::UnknownFramework(framework.to_string()))
    }

    /// Names of all registered frameworks
    pub fn frameworks(&self) -> Vec<String> {
        let mut names: Vec<_> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Payload shape of a generic batch job
#[derive(Debug, Deserialize)]
struct BatchJobSpec {
    #[serde(default = "default_parallelism")]
    parallelism: u32,
    #[serde(default)]
    template: BatchPodTemplate,
}

fn default_parallelism() -> u32 {
    1
}

#[derive(Debug, Default, Deserialize)]
struct BatchPodTemplate {
    #[serde(default)]
    requests: BTreeMap<String, String>,
    #[serde(default)]
    node_selector: BTreeMap<String, String>,
    #[serde(default)]
    tolerations: Vec<Toleration>,
}

/// Adapter for generic batch jobs
pub struct BatchJobAdapter;

impl JobAdapter for BatchJobAdapter {
    fn framework_name(&self) -> &str {
        "batch/job"
    }

    fn pod_sets(&self, job: &JobObject) -> CoreResult<Vec<PodSet>> {
        let spec: BatchJobSpec = serde_json::from_value(job.payload.clone()).map_err(|e| {
            CoreError::InvalidConfig {
                cluster_queue: String::new(),
                reason: format!("malformed batch job {}/{}: {e}", job.namespace, job.name),
            }
        })?;
        let mut requests = Requests::new();
        for (resource, literal) in &spec.template.requests {
            let quantity = Quantity::parse(literal)?;
            requests.insert(resource.as_str().into(), quantity);
        }
        Ok(vec![PodSet {
            name: "main".to_string(),
            count: spec.parallelism.max(1),
            requests,
            node_selector: spec.template.node_selector,
            affinity_terms: Vec::new(),
            tolerations: spec.template.tolerations,
        }])
    }
}
