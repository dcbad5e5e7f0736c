//! Frozen per-cycle view of the cache
//!
//! A snapshot clones the cluster-queue map as shared handles; the first
//! mutation of a queue within the cycle deep-copies just that queue
//! (`Arc::make_mut`), so snapshot cost stays proportional to activity.
//! Mutations to the live cache never show through an in-flight snapshot.

use crate::cache::cluster_queue::{
    AdmittedWorkload, CachedClusterQueue, FlavorResource,
};
use crate::hierarchy::CohortIndex;
use crate::workload::WorkloadKey;
use batchgate_api::{FlavorName, Quantity, ResourceFlavor};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Cohort-wide nominal and usage sums per (flavor, resource)
#[derive(Debug, Clone, Default)]
pub struct CohortAggregate {
    /// Σ nominal across members
    pub nominal: BTreeMap<FlavorResource, Quantity>,
    /// Σ usage across members
    pub usage: BTreeMap<FlavorResource, Quantity>,
}

impl CohortAggregate {
    pub fn nominal_of(&self, fr: &FlavorResource) -> Quantity {
        self.nominal.get(fr).copied().unwrap_or(Quantity::ZERO)
    }

    pub fn usage_of(&self, fr: &FlavorResource) -> Quantity {
        self.usage.get(fr).copied().unwrap_or(Quantity::ZERO)
    }
}

/// Result of checking one amount against one (flavor, resource)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCheck {
    /// The amount fits under current usage
    pub fits: bool,
    /// Borrow the admission would create (usage above nominal)
    pub borrow_needed: Quantity,
    /// Shortfall against the tightest violated limit; zero when fitting
    pub exceeded_by: Quantity,
    /// The limits permit the amount if enough usage were evicted
    pub preemptable: bool,
}

/// Immutable-by-default view of every ClusterQueue and cohort
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) cluster_queues: HashMap<String, Arc<CachedClusterQueue>>,
    pub(crate) cohorts: CohortIndex,
    pub(crate) flavors: HashMap<FlavorName, ResourceFlavor>,
    /// Cycle the snapshot was taken in
    pub cycle: u64,
}

impl Snapshot {
    pub(crate) fn new(
        cluster_queues: HashMap<String, Arc<CachedClusterQueue>>,
        cohorts: CohortIndex,
        flavors: HashMap<FlavorName, ResourceFlavor>,
        cycle: u64,
    ) -> Self {
        Self {
            cluster_queues,
            cohorts,
            flavors,
            cycle,
        }
    }

    /// Look up a queue
    pub fn cluster_queue(&self, name: &str) -> Option<&CachedClusterQueue> {
        self.cluster_queues.get(name).map(Arc::as_ref)
    }

    /// Look up a flavor
    pub fn flavor(&self, name: &FlavorName) -> Option<&ResourceFlavor> {
        self.flavors.get(name)
    }

    /// All queue names, sorted for deterministic iteration
    pub fn cluster_queue_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.cluster_queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Aggregate nominal and usage over a queue's cohort, if it has one
    pub fn cohort_aggregate(&self, cq: &CachedClusterQueue) -> Option<CohortAggregate> {
        let cohort = cq.spec.cohort_name()?;
        let mut agg = CohortAggregate::default();
        for member in self.cohorts.members(cohort) {
            let Some(peer) = self.cluster_queues.get(member) else {
                continue;
            };
            for (fr, limits) in &peer.quotas {
                *agg.nominal.entry(fr.clone()).or_default() += limits.nominal;
            }
            for (fr, used) in &peer.usage {
                *agg.usage.entry(fr.clone()).or_default() += *used;
            }
        }
        Some(agg)
    }

    /// Check one amount against a queue's limits on one (flavor, resource)
    ///
    /// Enforces both caps: per-queue usage ≤ nominal + borrowing limit, and
    /// cohort usage ≤ cohort nominal. `None` when the queue does not cover
    /// the coordinate at all.
    pub fn quota_check(
        &self,
        cq: &CachedClusterQueue,
        fr: &FlavorResource,
        amount: Quantity,
        cohort: Option<&CohortAggregate>,
    ) -> Option<QuotaCheck> {
        let limits = cq.quotas.get(fr)?;
        let usage = cq.usage_of(fr);
        let after = usage + amount;

        let mut fits = true;
        let mut exceeded_by = Quantity::ZERO;
        let mut preemptable = true;

        // Per-queue cap: nominal plus borrowing limit when borrowing is
        // possible at all.
        let cap = match (cohort, limits.borrowing_limit) {
            (Some(_), Some(bl)) => Some(limits.nominal + bl),
            (Some(_), None) => None, // unlimited borrow, cohort cap governs
            (None, _) => Some(limits.nominal),
        };
        if let Some(cap) = cap {
            if after > cap {
                fits = false;
                exceeded_by = exceeded_by.max(after.saturating_sub(cap));
            }
            if amount > cap {
                preemptable = false;
            }
        }

        // Cohort pool cap: Σ usage may never exceed Σ nominal.
        if let Some(agg) = cohort {
            let pool_after = agg.usage_of(fr) + amount;
            let pool_cap = agg.nominal_of(fr);
            if pool_after > pool_cap {
                fits = false;
                exceeded_by = exceeded_by.max(pool_after.saturating_sub(pool_cap));
            }
            if amount > pool_cap {
                preemptable = false;
            }
        }

        let borrow_needed = if fits {
            after.saturating_sub(limits.nominal)
        } else {
            Quantity::ZERO
        };

        Some(QuotaCheck {
            fits,
            borrow_needed,
            exceeded_by,
            preemptable,
        })
    }

    /// Check a full per-(flavor, resource) amount map against a queue
    pub fn fits_amounts(
        &self,
        cq_name: &str,
        amounts: &BTreeMap<FlavorResource, Quantity>,
    ) -> bool {
        let Some(cq) = self.cluster_queue(cq_name) else {
            return false;
        };
        let cohort = self.cohort_aggregate(cq);
        amounts.iter().all(|(fr, amount)| {
            self.quota_check(cq, fr, *amount, cohort.as_ref())
                .is_some_and(|check| check.fits)
        })
    }

    /// Charge a workload in the snapshot so later candidates in the cycle
    /// see the consumed quota
    pub fn add_admitted(&mut self, cq_name: &str, admitted: AdmittedWorkload) {
        if let Some(entry) = self.cluster_queues.get_mut(cq_name) {
            // Deep-copies the queue on first mutation this cycle.
            let cq = Arc::make_mut(entry);
            if let Err(err) = cq.add_workload(admitted) {
                tracing::error!(cluster_queue = cq_name, %err, "snapshot charge failed; rebuilding");
                cq.rebuild_usage();
            }
        }
    }

    /// Release a workload in the snapshot (victim simulation)
    pub fn remove_admitted(
        &mut self,
        cq_name: &str,
        key: &WorkloadKey,
    ) -> Option<AdmittedWorkload> {
        let entry = self.cluster_queues.get_mut(cq_name)?;
        let cq = Arc::make_mut(entry);
        match cq.remove_workload(key) {
            Ok(removed) => removed,
            Err(err) => {
                tracing::error!(cluster_queue = cq_name, %err, "snapshot release failed; rebuilding");
                cq.rebuild_usage();
                None
            }
        }
    }

    /// Admitted workloads of one queue, any order
    pub fn admitted_of(&self, cq_name: &str) -> Vec<&AdmittedWorkload> {
        self.cluster_queue(cq_name)
            .map(|cq| cq.admitted.values().collect())
            .unwrap_or_default()
    }
}
