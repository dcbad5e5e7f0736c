//! Flavor assignment
//!
//! Walks a ClusterQueue's resource groups in declared order and, within
//! each group, tries flavors in declared order. A flavor serves a pod set
//! only when the pod set's node selection is compatible with the flavor's
//! labels and taints and every covered resource fits under quota. The first
//! satisfying flavor wins for the group; groups are independent.

use crate::cache::{CachedClusterQueue, FlavorResource, Snapshot};
use crate::workload::WorkloadInfo;
use batchgate_api::{PodSet, PodSetAssignment, Quantity, ResourceName};
use std::collections::BTreeMap;
use tracing::trace;

/// How an assignment can be satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentMode {
    /// Fits under nominal quota everywhere
    Fit,
    /// Fits, but part of the usage is borrowed from the cohort
    FitWithBorrow,
    /// The limits allow it, but admitted workloads must be evicted first
    Preempt,
}

/// A complete flavor assignment for a workload
#[derive(Debug, Clone)]
pub struct FlavorAssignment {
    /// One assignment per pod set, in pod-set order
    pub pod_sets: Vec<PodSetAssignment>,
    /// Worst mode across all groups and pod sets
    pub mode: AssignmentMode,
    /// Total borrow the admission would create
    pub total_borrow: Quantity,
    /// Aggregate usage per (flavor, resource); the preemption target
    pub amounts: BTreeMap<FlavorResource, Quantity>,
}

/// Result of attempting an assignment
#[derive(Debug, Clone)]
pub enum AssignmentOutcome {
    /// Admissible now
    Assigned(FlavorAssignment),
    /// Admissible only after preemption frees the listed amounts
    NeedsPreemption(FlavorAssignment),
    /// No flavor can ever serve the request under current limits
    NoFit { reason: String },
}

/// Assign flavors to every pod set of a workload against a snapshot
pub fn assign(snapshot: &Snapshot, cq: &CachedClusterQueue, info: &WorkloadInfo) -> AssignmentOutcome {
    let cohort = snapshot.cohort_aggregate(cq);
    let mut accumulated: BTreeMap<FlavorResource, Quantity> = BTreeMap::new();
    let mut pod_sets = Vec::with_capacity(info.workload.pod_sets.len());
    let mut mode = AssignmentMode::Fit;
    let mut total_borrow = Quantity::ZERO;

    for (pod_set, totals) in info.workload.pod_sets.iter().zip(&info.total_requests) {
        let mut flavors: BTreeMap<ResourceName, batchgate_api::FlavorName> = BTreeMap::new();
        let mut usage: BTreeMap<ResourceName, Quantity> = BTreeMap::new();

        for group in &cq.spec.resource_groups {
            let requested: Vec<(&ResourceName, Quantity)> = group
                .covered_resources
                .iter()
                .filter_map(|r| {
                    totals
                        .requests
                        .get(r)
                        .filter(|q| !q.is_zero())
                        .map(|q| (r, *q))
                })
                .collect();
            if requested.is_empty() {
                continue;
            }

            let mut chosen = None;
            let mut preempt_fallback = None;
            for flavor_quotas in &group.flavors {
                let Some(flavor) = snapshot.flavor(&flavor_quotas.name) else {
                    trace!(flavor = %flavor_quotas.name, "flavor not resolved; skipping");
                    continue;
                };
                if !flavor_fits_pod(flavor, pod_set) {
                    continue;
                }

                let mut all_fit = true;
                let mut all_preemptable = true;
                let mut borrow = Quantity::ZERO;
                for (resource, amount) in &requested {
                    let fr = (flavor_quotas.name.clone(), (*resource).clone());
                    let already = accumulated.get(&fr).copied().unwrap_or(Quantity::ZERO);
                    match snapshot.quota_check(cq, &fr, already + *amount, cohort.as_ref()) {
                        Some(check) => {
                            all_fit &= check.fits;
                            all_preemptable &= check.preemptable;
                            borrow += check.borrow_needed;
                        }
                        None => {
                            all_fit = false;
                            all_preemptable = false;
                        }
                    }
                }
                if all_fit {
                    chosen = Some((flavor_quotas.name.clone(), borrow));
                    break;
                }
                if all_preemptable && preempt_fallback.is_none() {
                    preempt_fallback = Some(flavor_quotas.name.clone());
                }
            }

            let flavor_name = match (chosen, preempt_fallback) {
                (Some((name, borrow)), _) => {
                    if !borrow.is_zero() && mode == AssignmentMode::Fit {
                        mode = AssignmentMode::FitWithBorrow;
                    }
                    total_borrow += borrow;
                    name
                }
                (None, Some(name)) => {
                    mode = AssignmentMode::Preempt;
                    name
                }
                (None, None) => {
                    return AssignmentOutcome::NoFit {
                        reason: format!(
                            "no flavor can serve pod set {} for resources {:?}",
                            pod_set.name,
                            requested
                                .iter()
                                .map(|(r, _)| r.to_string())
                                .collect::<Vec<_>>()
                        ),
                    };
                }
            };

            for (resource, amount) in &requested {
                let fr = (flavor_name.clone(), (*resource).clone());
                *accumulated.entry(fr).or_default() += *amount;
                flavors.insert((*resource).clone(), flavor_name.clone());
                usage.insert((*resource).clone(), *amount);
            }
        }

        // Every requested resource must be covered by some group.
        for (resource, amount) in &totals.requests {
            if !amount.is_zero() && !flavors.contains_key(resource) {
                return AssignmentOutcome::NoFit {
                    reason: format!(
                        "resource {resource} of pod set {} is not covered by any resource group",
                        pod_set.name
                    ),
                };
            }
        }

        pod_sets.push(PodSetAssignment {
            name: pod_set.name.clone(),
            flavors,
            usage,
        });
    }

    let assignment = FlavorAssignment {
        pod_sets,
        mode,
        total_borrow,
        amounts: accumulated,
    };
    match mode {
        AssignmentMode::Preempt => AssignmentOutcome::NeedsPreemption(assignment),
        _ => AssignmentOutcome::Assigned(assignment),
    }
}

/// Node-constraint compatibility between a pod set and a flavor
fn flavor_fits_pod(flavor: &batchgate_api::ResourceFlavor, pod_set: &PodSet) -> bool {
    flavor.accepts(
        &pod_set.node_selector,
        &pod_set.affinity_terms,
        &pod_set.tolerations,
    )
}
