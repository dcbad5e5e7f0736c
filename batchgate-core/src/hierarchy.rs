//! Cohort bookkeeping
//!
//! A cohort is not an object; it is the set of ClusterQueues sharing a
//! cohort name. The map is rebuilt incrementally on every ClusterQueue add,
//! move, and delete.

use std::collections::{BTreeSet, HashMap};

/// The set of ClusterQueues forming one borrowing pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cohort {
    /// Member ClusterQueue names
    pub members: BTreeSet<String>,
}

/// Cohort-name to member-set index
#[derive(Debug, Clone, Default)]
pub struct CohortIndex {
    cohorts: HashMap<String, Cohort>,
}

impl CohortIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Members of a cohort; empty set when unknown
    pub fn members(&self, cohort: &str) -> impl Iterator<Item = &String> {
        self.cohorts
            .get(cohort)
            .into_iter()
            .flat_map(|c| c.members.iter())
    }

    /// True when the cohort has at least two members
    pub fn has_peers(&self, cohort: &str) -> bool {
        self.cohorts.get(cohort).is_some_and(|c| c.members.len() > 1)
    }

    /// Record a ClusterQueue joining a cohort
    pub fn insert(&mut self, cohort: &str, cluster_queue: &str) {
        self.cohorts
            .entry(cohort.to_string())
            .or_default()
            .members
            .insert(cluster_queue.to_string());
    }

    /// Record a ClusterQueue leaving a cohort; empty cohorts are dropped
    pub fn remove(&mut self, cohort: &str, cluster_queue: &str) {
        if let Some(entry) = self.cohorts.get_mut(cohort) {
            entry.members.remove(cluster_queue);
            if entry.members.is_empty() {
                self.cohorts.remove(cohort);
            }
        }
    }

    /// Move a ClusterQueue between cohorts on spec change
    pub fn update(
        &mut self,
        cluster_queue: &str,
        old_cohort: Option<&str>,
        new_cohort: Option<&str>,
    ) {
        if old_cohort == new_cohort {
            return;
        }
        if let Some(old) = old_cohort {
            self.remove(old, cluster_queue);
        }
        if let Some(new) = new_cohort {
            self.insert(new, cluster_queue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_peers() {
        let mut index = CohortIndex::new();
        index.insert("pool", "a");
        assert!(!index.has_peers("pool"));
        index.insert("pool", "b");
        assert!(index.has_peers("pool"));
        assert_eq!(index.members("pool").count(), 2);
    }

    #[test]
    fn test_remove_prunes_empty_cohort() {
        let mut index = CohortIndex::new();
        index.insert("pool", "a");
        index.remove("pool", "a");
        assert_eq!(index.members("pool").count(), 0);
        assert!(!index.cohorts.contains_key("pool"));
    }

    #[test]
    fn test_update_moves_membership() {
        let mut index = CohortIndex::new();
        index.insert("old", "a");
        index.update("a", Some("old"), Some("new"));
        assert_eq!(index.members("old").count(), 0);
        assert_eq!(index.members("new").count(), 1);
    }
}
