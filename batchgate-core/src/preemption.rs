//! Preemption planning
//!
//! Given a pending workload whose request does not fit, the planner picks
//! an ordered victim set whose eviction makes it fit, or reports
//! infeasibility. Victims come from the same ClusterQueue (within-queue
//! policy) and from cohort peers holding usage above their nominal quota
//! (reclaim policy). Selection is greedy against the largest residual
//! shortfall, then pruned in reverse order to a locally minimal set.

use crate::cache::{FlavorResource, Snapshot};
use crate::workload::WorkloadInfo;
use batchgate_api::{Quantity, ReclaimPolicy, WithinQueuePolicy};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// An admitted workload chosen for eviction
#[derive(Debug, Clone)]
pub struct Victim {
    /// Queue the victim is admitted in
    pub cluster_queue: String,
    /// The victim's record
    pub info: WorkloadInfo,
}

#[derive(Debug, Clone)]
struct Candidate {
    cluster_queue: String,
    info: WorkloadInfo,
    usage: BTreeMap<FlavorResource, Quantity>,
    priority: i32,
    admitted_at: DateTime<Utc>,
    uid: Uuid,
    reclaim: bool,
}

impl Candidate {
    /// Lowest priority first, most recently admitted first, then uid
    fn fairness_key(&self) -> (i32, i64, Uuid) {
        (
            self.priority,
            -self.admitted_at.timestamp_micros(),
            self.uid,
        )
    }
}

/// The victim planner
pub struct Planner;

impl Planner {
    /// Plan victims so `amounts` fits into `cq_name`
    ///
    /// Returns `None` when infeasible under the queue's policies; an empty
    /// list when the request already fits. The snapshot is not modified;
    /// all eviction simulation happens on a scratch copy.
    pub fn plan(
        snapshot: &Snapshot,
        cq_name: &str,
        pending: &WorkloadInfo,
        amounts: &BTreeMap<FlavorResource, Quantity>,
    ) -> Option<Vec<Victim>> {
        let cq = snapshot.cluster_queue(cq_name)?;
        let policy = cq.spec.preemption;
        if policy.within_cluster_queue == WithinQueuePolicy::Never
            && policy.reclaim_within_cohort == ReclaimPolicy::Never
        {
            return None;
        }

        let mut scratch = snapshot.clone();
        if scratch.fits_amounts(cq_name, amounts) {
            return Some(Vec::new());
        }

        let mut candidates = collect_candidates(snapshot, cq_name, pending, amounts);
        candidates.sort_by(|a, b| a.fairness_key().cmp(&b.fairness_key()));

        // Greedy phase: always attack the largest residual shortfall.
        let mut victims: Vec<Candidate> = Vec::new();
        while !scratch.fits_amounts(cq_name, amounts) {
            let worst = largest_shortfall(&scratch, cq_name, amounts)?;
            let position = candidates.iter().position(|candidate| {
                candidate.usage.get(&worst).copied().unwrap_or(Quantity::ZERO) > Quantity::ZERO
                    && (!candidate.reclaim || reclaim_still_valid(&scratch, candidate, &worst))
            })?;
            let candidate = candidates.remove(position);
            scratch.remove_admitted(&candidate.cluster_queue, &candidate.info.key());
            victims.push(candidate);
        }

        // Minimality phase: drop any victim whose eviction turned out to be
        // unnecessary, newest selection first.
        let mut index = victims.len();
        while index > 0 {
            index -= 1;
            let candidate = &victims[index];
            let key = candidate.info.key();
            let owner = candidate.cluster_queue.clone();
            let restored = restore(&mut scratch, candidate);
            if scratch.fits_amounts(cq_name, amounts) {
                victims.remove(index);
            } else if restored {
                scratch.remove_admitted(&owner, &key);
            }
        }

        debug!(
            cluster_queue = cq_name,
            workload = %pending.key(),
            victims = victims.len(),
            "preemption plan computed"
        );
        Some(
            victims
                .into_iter()
                .map(|candidate| Victim {
                    cluster_queue: candidate.cluster_queue,
                    info: candidate.info,
                })
                .collect(),
        )
    }
}

/// Admitted workloads the policies allow evicting for `pending`
fn collect_candidates(
    snapshot: &Snapshot,
    cq_name: &str,
    pending: &WorkloadInfo,
    amounts: &BTreeMap<FlavorResource, Quantity>,
) -> Vec<Candidate> {
    let Some(cq) = snapshot.cluster_queue(cq_name) else {
        return Vec::new();
    };
    let policy = cq.spec.preemption;
    let pending_key = pending.key();
    let mut candidates = Vec::new();

    let uses_needed = |usage: &BTreeMap<FlavorResource, Quantity>| {
        amounts
            .keys()
            .any(|fr| usage.get(fr).copied().unwrap_or(Quantity::ZERO) > Quantity::ZERO)
    };

    if policy.within_cluster_queue == WithinQueuePolicy::LowerPriority {
        for aw in cq.admitted.values() {
            if aw.assumed
                || aw.info.key() == pending_key
                || aw.info.workload.priority >= pending.workload.priority
                || !uses_needed(&aw.usage)
            {
                continue;
            }
            candidates.push(Candidate {
                cluster_queue: cq_name.to_string(),
                info: aw.info.clone(),
                usage: aw.usage.clone(),
                priority: aw.info.workload.priority,
                admitted_at: aw.admitted_at,
                uid: aw.info.workload.uid,
                reclaim: false,
            });
        }
    }

    if policy.reclaim_within_cohort != ReclaimPolicy::Never {
        if let Some(cohort) = cq.spec.cohort_name() {
            let peers: Vec<String> = snapshot
                .cohorts
                .members(cohort)
                .filter(|member| member.as_str() != cq_name)
                .cloned()
                .collect();
            for peer_name in peers {
                let Some(peer) = snapshot.cluster_queue(&peer_name) else {
                    continue;
                };
                // Only peers above nominal on a needed coordinate block
                // reclaim; their other workloads are untouchable.
                let over: Vec<&FlavorResource> = amounts
                    .keys()
                    .filter(|fr| peer.borrowed(fr) > Quantity::ZERO)
                    .collect();
                if over.is_empty() {
                    continue;
                }
                for aw in peer.admitted.values() {
                    if aw.assumed || !uses_needed(&aw.usage) {
                        continue;
                    }
                    if policy.reclaim_within_cohort == ReclaimPolicy::LowerPriority
                        && aw.info.workload.priority >= pending.workload.priority
                    {
                        continue;
                    }
                    if !over
                        .iter()
                        .any(|fr| aw.usage.get(fr).copied().unwrap_or(Quantity::ZERO) > Quantity::ZERO)
                    {
                        continue;
                    }
                    candidates.push(Candidate {
                        cluster_queue: peer_name.clone(),
                        info: aw.info.clone(),
                        usage: aw.usage.clone(),
                        priority: aw.info.workload.priority,
                        admitted_at: aw.admitted_at,
                        uid: aw.info.workload.uid,
                        reclaim: true,
                    });
                }
            }
        }
    }

    candidates
}

/// The (flavor, resource) with the largest remaining shortfall
fn largest_shortfall(
    scratch: &Snapshot,
    cq_name: &str,
    amounts: &BTreeMap<FlavorResource, Quantity>,
) -> Option<FlavorResource> {
    let cq = scratch.cluster_queue(cq_name)?;
    let cohort = scratch.cohort_aggregate(cq);
    let mut worst: Option<(FlavorResource, Quantity)> = None;
    for (fr, amount) in amounts {
        let check = scratch.quota_check(cq, fr, *amount, cohort.as_ref())?;
        if check.exceeded_by > Quantity::ZERO {
            let bigger = worst
                .as_ref()
                .is_none_or(|(_, current)| check.exceeded_by > *current);
            if bigger {
                worst = Some((fr.clone(), check.exceeded_by));
            }
        }
    }
    worst.map(|(fr, _)| fr)
}

/// A reclaim victim must still sit in a queue above nominal on the blocked
/// coordinate; earlier evictions may already have cleared the over-borrow
fn reclaim_still_valid(scratch: &Snapshot, candidate: &Candidate, fr: &FlavorResource) -> bool {
    scratch
        .cluster_queue(&candidate.cluster_queue)
        .is_some_and(|peer| peer.borrowed(fr) > Quantity::ZERO)
}

/// Put a simulated victim back; false when its queue vanished
fn restore(scratch: &mut Snapshot, candidate: &Candidate) -> bool {
    use crate::cache::AdmittedWorkload;
    if scratch.cluster_queue(&candidate.cluster_queue).is_none() {
        return false;
    }
    scratch.add_admitted(
        &candidate.cluster_queue,
        AdmittedWorkload {
            info: candidate.info.clone(),
            usage: candidate.usage.clone(),
            admitted_at: candidate.admitted_at,
            assumed: false,
        },
    );
    true
}
