//! Structural validation of API objects
//!
//! Single-object checks live here. Cross-object rules that need the full
//! quota graph (unknown flavor references, (resource, flavor) overlap
//! between cohort siblings) are enforced by the admission core's cache,
//! which can see every object at once.

use crate::cluster_queue::{ClusterQueue, MAX_GROUP_FANOUT};
use crate::error::{ApiError, ApiResult};
use crate::workload::Workload;
use std::collections::BTreeSet;

/// Validate a ClusterQueue spec in isolation
pub fn validate_cluster_queue(cq: &ClusterQueue) -> ApiResult<()> {
    const OBJECT: &str = "ClusterQueue";

    if cq.name.is_empty() {
        return Err(ApiError::invalid(OBJECT, &cq.name, "name must not be empty"));
    }
    if cq.resource_groups.is_empty() {
        return Err(ApiError::invalid(
            OBJECT,
            &cq.name,
            "at least one resource group is required",
        ));
    }
    if cq.resource_groups.len() > MAX_GROUP_FANOUT {
        return Err(ApiError::invalid(
            OBJECT,
            &cq.name,
            format!("at most {MAX_GROUP_FANOUT} resource groups are allowed"),
        ));
    }

    let mut seen = BTreeSet::new();
    for (i, group) in cq.resource_groups.iter().enumerate() {
        if group.covered_resources.is_empty() || group.flavors.is_empty() {
            return Err(ApiError::invalid(
                OBJECT,
                &cq.name,
                format!("resource group {i} must cover resources and declare flavors"),
            ));
        }
        if group.covered_resources.len() > MAX_GROUP_FANOUT {
            return Err(ApiError::invalid(
                OBJECT,
                &cq.name,
                format!("resource group {i} covers more than {MAX_GROUP_FANOUT} resources"),
            ));
        }
        if group.flavors.len() > MAX_GROUP_FANOUT {
            return Err(ApiError::invalid(
                OBJECT,
                &cq.name,
                format!("resource group {i} declares more than {MAX_GROUP_FANOUT} flavors"),
            ));
        }
        for flavor in &group.flavors {
            let declared: Vec<_> = flavor.resources.iter().map(|q| &q.name).collect();
            let covered: Vec<_> = group.covered_resources.iter().collect();
            if declared != covered {
                return Err(ApiError::invalid(
                    OBJECT,
                    &cq.name,
                    format!(
                        "flavor {} must declare quotas for the group's resources in order",
                        flavor.name
                    ),
                ));
            }
            for quota in &flavor.resources {
                if !seen.insert((flavor.name.clone(), quota.name.clone())) {
                    return Err(ApiError::invalid(
                        OBJECT,
                        &cq.name,
                        format!(
                            "resource {} under flavor {} appears in more than one group",
                            quota.name, flavor.name
                        ),
                    ));
                }
                if quota.borrowing_limit.is_some() && cq.cohort_name().is_none() {
                    return Err(ApiError::invalid(
                        OBJECT,
                        &cq.name,
                        format!(
                            "borrowing limit on {}/{} requires a cohort",
                            flavor.name, quota.name
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Validate an update against the previous spec
pub fn validate_cluster_queue_update(old: &ClusterQueue, new: &ClusterQueue) -> ApiResult<()> {
    validate_cluster_queue(new)?;
    if old.queueing_strategy != new.queueing_strategy {
        return Err(ApiError::ImmutableField {
            object: "ClusterQueue",
            name: new.name.clone(),
            field: "queueing_strategy",
        });
    }
    Ok(())
}

/// Validate a Workload spec
pub fn validate_workload(workload: &Workload) -> ApiResult<()> {
    const OBJECT: &str = "Workload";

    if workload.pod_sets.is_empty() {
        return Err(ApiError::invalid(
            OBJECT,
            workload.key(),
            "at least one pod set is required",
        ));
    }
    let mut names = BTreeSet::new();
    for ps in &workload.pod_sets {
        if ps.count == 0 {
            return Err(ApiError::invalid(
                OBJECT,
                workload.key(),
                format!("pod set {} must have a positive count", ps.name),
            ));
        }
        if !names.insert(&ps.name) {
            return Err(ApiError::invalid(
                OBJECT,
                workload.key(),
                format!("duplicate pod set name {}", ps.name),
            ));
        }
    }
    Ok(())
}
