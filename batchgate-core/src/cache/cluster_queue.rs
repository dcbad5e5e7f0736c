//! Cached per-ClusterQueue quota state
//!
//! The cache keeps one `CachedClusterQueue` per observed ClusterQueue: the
//! flattened quota table, current usage per (flavor, resource), and the
//! admitted workloads charged against it. All usage arithmetic lives here.

use crate::error::{CoreError, CoreResult};
use crate::workload::{WorkloadInfo, WorkloadKey};
use batchgate_api::{
    Admission, ClusterQueue, FlavorName, FlavorUsage, Quantity, ResourceFlavor, ResourceName,
    ResourceUsage,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// A (flavor, resource) quota coordinate
pub type FlavorResource = (FlavorName, ResourceName);

/// Declared limits for one (flavor, resource)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    /// Capacity owned unconditionally
    pub nominal: Quantity,
    /// Cap above nominal; `None` means unlimited borrowing
    pub borrowing_limit: Option<Quantity>,
}

/// An admitted workload and the usage it is charged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmittedWorkload {
    /// The enriched workload record
    pub info: WorkloadInfo,
    /// Usage charged per (flavor, resource)
    pub usage: BTreeMap<FlavorResource, Quantity>,
    /// When quota was reserved
    pub admitted_at: DateTime<Utc>,
    /// True while the admission is assumed but not yet observed
    pub assumed: bool,
}

impl AdmittedWorkload {
    /// Build the usage breakdown an admission record implies
    pub fn usage_of(admission: &Admission) -> BTreeMap<FlavorResource, Quantity> {
        let mut usage: BTreeMap<FlavorResource, Quantity> = BTreeMap::new();
        for assignment in &admission.pod_set_assignments {
            for (resource, flavor) in &assignment.flavors {
                if let Some(amount) = assignment.usage.get(resource) {
                    *usage
                        .entry((flavor.clone(), resource.clone()))
                        .or_default() += *amount;
                }
            }
        }
        usage
    }
}

/// Quota table, usage, and admitted set of one ClusterQueue
#[derive(Debug, Clone)]
pub struct CachedClusterQueue {
    /// The observed spec
    pub spec: ClusterQueue,
    /// Flattened (flavor, resource) → limits
    pub quotas: BTreeMap<FlavorResource, QuotaLimits>,
    /// Current usage per (flavor, resource)
    pub usage: BTreeMap<FlavorResource, Quantity>,
    /// Admitted workloads charged against this queue
    pub admitted: HashMap<WorkloadKey, AdmittedWorkload>,
    /// False when configuration is invalid or a flavor is missing
    pub active: bool,
    /// (reason, message) backing the Active=false condition
    pub inactive_reason: Option<(String, String)>,
}

impl CachedClusterQueue {
    /// Build from a spec, resolving flavor references
    pub fn from_spec(
        spec: ClusterQueue,
        flavors: &HashMap<FlavorName, ResourceFlavor>,
    ) -> Self {
        let quotas = spec
            .quotas()
            .map(|(flavor, quota)| {
                (
                    (flavor.clone(), quota.name.clone()),
                    QuotaLimits {
                        nominal: quota.nominal_quota,
                        borrowing_limit: quota.borrowing_limit,
                    },
                )
            })
            .collect();
        let mut cq = Self {
            spec,
            quotas,
            usage: BTreeMap::new(),
            admitted: HashMap::new(),
            active: false,
            inactive_reason: None,
        };
        cq.refresh_active(flavors);
        cq
    }

    /// Recompute the Active condition against the known flavors
    pub fn refresh_active(&mut self, flavors: &HashMap<FlavorName, ResourceFlavor>) {
        let missing: Vec<_> = self
            .spec
            .referenced_flavors()
            .into_iter()
            .filter(|f| !flavors.contains_key(*f))
            .collect();
        if missing.is_empty() {
            self.active = true;
            self.inactive_reason = None;
        } else {
            self.active = false;
            let names: Vec<_> = missing.iter().map(|f| f.to_string()).collect();
            self.inactive_reason = Some((
                "FlavorNotFound".to_string(),
                format!("referenced flavors not found: {}", names.join(", ")),
            ));
        }
    }

    /// Deactivate with an explicit reason, overriding flavor resolution
    pub fn deactivate(&mut self, reason: &str, message: impl Into<String>) {
        self.active = false;
        self.inactive_reason = Some((reason.to_string(), message.into()));
    }

    /// Charge an admitted workload; idempotent on identical admissions
    pub fn add_workload(&mut self, admitted: AdmittedWorkload) -> CoreResult<()> {
        let key = admitted.info.key();
        if let Some(existing) = self.admitted.get_mut(&key) {
            if existing.usage == admitted.usage {
                // Replaying the same admission must not change usage.
                existing.assumed = admitted.assumed && existing.assumed;
                existing.info = admitted.info;
                return Ok(());
            }
            self.remove_workload(&key)?;
        }
        for (fr, amount) in &admitted.usage {
            *self.usage.entry(fr.clone()).or_default() += *amount;
        }
        self.admitted.insert(key, admitted);
        Ok(())
    }

    /// Release an admitted workload's usage
    ///
    /// Underflow means the books are inconsistent; the caller rebuilds the
    /// queue from its admission records.
    pub fn remove_workload(&mut self, key: &WorkloadKey) -> CoreResult<Option<AdmittedWorkload>> {
        let Some(admitted) = self.admitted.remove(key) else {
            return Ok(None);
        };
        for (fr, amount) in &admitted.usage {
            let current = self.usage.get(fr).copied().unwrap_or(Quantity::ZERO);
            match current.checked_sub(*amount) {
                Some(rest) => {
                    if rest.is_zero() {
                        self.usage.remove(fr);
                    } else {
                        self.usage.insert(fr.clone(), rest);
                    }
                }
                None => {
                    return Err(CoreError::UsageUnderflow {
                        cluster_queue: self.spec.name.clone(),
                        flavor: fr.0.to_string(),
                        resource: fr.1.to_string(),
                    });
                }
            }
        }
        Ok(Some(admitted))
    }

    /// Recompute usage from the admission records after an inconsistency
    pub fn rebuild_usage(&mut self) {
        self.usage.clear();
        for admitted in self.admitted.values() {
            for (fr, amount) in &admitted.usage {
                *self.usage.entry(fr.clone()).or_default() += *amount;
            }
        }
    }

    /// Usage on one (flavor, resource)
    pub fn usage_of(&self, fr: &FlavorResource) -> Quantity {
        self.usage.get(fr).copied().unwrap_or(Quantity::ZERO)
    }

    /// Portion of usage above nominal on one (flavor, resource)
    pub fn borrowed(&self, fr: &FlavorResource) -> Quantity {
        let Some(limits) = self.quotas.get(fr) else {
            return Quantity::ZERO;
        };
        self.usage_of(fr).saturating_sub(limits.nominal)
    }

    /// Unused nominal on one (flavor, resource)
    pub fn nominal_headroom(&self, fr: &FlavorResource) -> Quantity {
        let Some(limits) = self.quotas.get(fr) else {
            return Quantity::ZERO;
        };
        limits.nominal.saturating_sub(self.usage_of(fr))
    }

    /// Per-flavor usage in spec declaration order, for status reporting
    ///
    /// Coordinates absent from the quota table (a deactivated queue) report
    /// nothing.
    pub fn flavors_usage(&self) -> Vec<FlavorUsage> {
        let mut out = Vec::new();
        for group in &self.spec.resource_groups {
            for flavor in &group.flavors {
                let resources: Vec<_> = flavor
                    .resources
                    .iter()
                    .filter_map(|quota| {
                        let fr = (flavor.name.clone(), quota.name.clone());
                        self.quotas.contains_key(&fr).then(|| ResourceUsage {
                            name: quota.name.clone(),
                            total: self.usage_of(&fr),
                            borrowed: self.borrowed(&fr),
                        })
                    })
                    .collect();
                if !resources.is_empty() {
                    out.push(FlavorUsage {
                        name: flavor.name.clone(),
                        resources,
                    });
                }
            }
        }
        out
    }

    /// Admitted workloads not yet observed ready, oldest first
    pub fn admitted_not_ready(&self) -> Vec<&AdmittedWorkload> {
        let mut waiting: Vec<_> = self
            .admitted
            .values()
            .filter(|aw| !aw.info.workload.pods_ready())
            .collect();
        waiting.sort_by_key(|aw| aw.admitted_at);
        waiting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::WorkloadInfo;
    use batchgate_api::{
        FlavorQuotas, PodSetAssignment, PreemptionPolicy, QueueingStrategy, ResourceGroup,
        ResourceQuota, Workload, WorkloadStatus,
    };
    use uuid::Uuid;

    fn spec(nominal: i64) -> ClusterQueue {
        ClusterQueue {
            name: "q".to_string(),
            cohort: None,
            resource_groups: vec![ResourceGroup {
                covered_resources: vec![ResourceName::cpu()],
                flavors: vec![FlavorQuotas {
                    name: "default".into(),
                    resources: vec![ResourceQuota {
                        name: ResourceName::cpu(),
                        nominal_quota: Quantity::from_units(nominal),
                        borrowing_limit: None,
                    }],
                }],
            }],
            queueing_strategy: QueueingStrategy::BestEffortFIFO,
            namespace_selector: None,
            preemption: PreemptionPolicy::default(),
            resource_version: 0,
        }
    }

    fn flavors() -> HashMap<FlavorName, ResourceFlavor> {
        let mut map = HashMap::new();
        map.insert("default".into(), ResourceFlavor::new("default"));
        map
    }

    fn admitted(name: &str, cpu: i64) -> AdmittedWorkload {
        let workload = Workload {
            name: name.to_string(),
            namespace: "ns".to_string(),
            uid: Uuid::new_v4(),
            priority: 0,
            queue_name: "lq".to_string(),
            created_at: Utc::now(),
            pod_sets: vec![],
            finished: false,
            resource_version: 0,
            status: WorkloadStatus::default(),
        };
        AdmittedWorkload {
            info: WorkloadInfo::new(workload, "q"),
            usage: [(("default".into(), ResourceName::cpu()), Quantity::from_units(cpu))].into(),
            admitted_at: Utc::now(),
            assumed: false,
        }
    }

    fn fr() -> FlavorResource {
        ("default".into(), ResourceName::cpu())
    }

    #[test]
    fn test_missing_flavor_deactivates() {
        let cq = CachedClusterQueue::from_spec(spec(10), &HashMap::new());
        assert!(!cq.active);
        let (reason, _) = cq.inactive_reason.clone().unwrap();
        assert_eq!(reason, "FlavorNotFound");

        let cq = CachedClusterQueue::from_spec(spec(10), &flavors());
        assert!(cq.active);
    }

    #[test]
    fn test_add_remove_workload_balances_usage() {
        let mut cq = CachedClusterQueue::from_spec(spec(10), &flavors());
        cq.add_workload(admitted("w1", 4)).unwrap();
        assert_eq!(cq.usage_of(&fr()), Quantity::from_units(4));

        cq.remove_workload(&"ns/w1".to_string()).unwrap();
        assert_eq!(cq.usage_of(&fr()), Quantity::ZERO);
        assert!(cq.usage.is_empty());
    }

    #[test]
    fn test_add_is_idempotent_on_identical_admission() {
        let mut cq = CachedClusterQueue::from_spec(spec(10), &flavors());
        let aw = admitted("w1", 4);
        cq.add_workload(aw.clone()).unwrap();
        cq.add_workload(aw).unwrap();
        assert_eq!(cq.usage_of(&fr()), Quantity::from_units(4));
        assert_eq!(cq.admitted.len(), 1);
    }

    #[test]
    fn test_replacing_admission_swaps_usage() {
        let mut cq = CachedClusterQueue::from_spec(spec(10), &flavors());
        cq.add_workload(admitted("w1", 4)).unwrap();
        let mut updated = admitted("w1", 6);
        updated.info.workload.namespace = "ns".to_string();
        cq.add_workload(updated).unwrap();
        assert_eq!(cq.usage_of(&fr()), Quantity::from_units(6));
    }

    #[test]
    fn test_underflow_is_reported() {
        let mut cq = CachedClusterQueue::from_spec(spec(10), &flavors());
        cq.add_workload(admitted("w1", 4)).unwrap();
        // Corrupt the books to force an underflow on removal.
        cq.usage.insert(fr(), Quantity::from_units(1));
        let err = cq.remove_workload(&"ns/w1".to_string()).unwrap_err();
        assert!(matches!(err, CoreError::UsageUnderflow { .. }));
    }

    #[test]
    fn test_borrowed_above_nominal() {
        let mut cq = CachedClusterQueue::from_spec(spec(10), &flavors());
        cq.add_workload(admitted("w1", 15)).unwrap();
        assert_eq!(cq.borrowed(&fr()), Quantity::from_units(5));
        assert_eq!(cq.nominal_headroom(&fr()), Quantity::ZERO);
    }

    #[test]
    fn test_usage_of_admission_groups_by_flavor() {
        let admission = Admission {
            cluster_queue: "q".to_string(),
            pod_set_assignments: vec![
                PodSetAssignment {
                    name: "a".to_string(),
                    flavors: [(ResourceName::cpu(), "default".into())].into(),
                    usage: [(ResourceName::cpu(), Quantity::from_units(2))].into(),
                },
                PodSetAssignment {
                    name: "b".to_string(),
                    flavors: [(ResourceName::cpu(), "default".into())].into(),
                    usage: [(ResourceName::cpu(), Quantity::from_units(3))].into(),
                },
            ],
        };
        let usage = AdmittedWorkload::usage_of(&admission);
        assert_eq!(usage[&fr()], Quantity::from_units(5));
    }
}
