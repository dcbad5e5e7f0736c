//! The pending heap of one ClusterQueue
//!
//! Entries are ordered (priority desc, creation asc, uid). The heap uses
//! lazy deletion: stale entries (deleted or re-keyed workloads) are skipped
//! at pop time. Workloads that failed admission under BestEffortFIFO are
//! parked in an inadmissible pool and flushed back when something changes.

use crate::workload::{OrderKey, WorkloadInfo, WorkloadKey};
use batchgate_api::{LabelSelector, QueueingStrategy};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

struct HeapEntry {
    key: OrderKey,
    workload: WorkloadKey,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.workload == other.workload
    }
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the max; OrderKey sorts preferred-first.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.workload.cmp(&self.workload))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending workloads of one ClusterQueue
pub struct PendingQueue {
    /// Ordering contract; immutable after creation
    pub strategy: QueueingStrategy,
    /// Namespace gate copied from the ClusterQueue spec
    pub namespace_selector: Option<LabelSelector>,
    heap: BinaryHeap<HeapEntry>,
    items: HashMap<WorkloadKey, WorkloadInfo>,
    inadmissible: HashMap<WorkloadKey, WorkloadInfo>,
}

impl PendingQueue {
    pub fn new(strategy: QueueingStrategy, namespace_selector: Option<LabelSelector>) -> Self {
        Self {
            strategy,
            namespace_selector,
            heap: BinaryHeap::new(),
            items: HashMap::new(),
            inadmissible: HashMap::new(),
        }
    }

    /// Pending count including parked entries
    pub fn len(&self) -> usize {
        self.items.len() + self.inadmissible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.inadmissible.is_empty()
    }

    /// True when the workload is queued here, active or parked
    pub fn contains(&self, key: &WorkloadKey) -> bool {
        self.items.contains_key(key) || self.inadmissible.contains_key(key)
    }

    /// Iterate every pending workload, active and parked
    pub fn iter(&self) -> impl Iterator<Item = &WorkloadInfo> {
        self.items.values().chain(self.inadmissible.values())
    }

    /// Insert or re-key a workload; a priority change re-sorts it
    pub fn push(&mut self, info: WorkloadInfo) {
        let key = info.key();
        self.inadmissible.remove(&key);
        self.heap.push(HeapEntry {
            key: info.order_key(),
            workload: key.clone(),
        });
        self.items.insert(key, info);
    }

    /// Park a workload until the next flush
    pub fn park(&mut self, info: WorkloadInfo) {
        let key = info.key();
        self.items.remove(&key);
        self.inadmissible.insert(key, info);
    }

    /// Remove a workload wherever it sits
    pub fn delete(&mut self, key: &WorkloadKey) -> Option<WorkloadInfo> {
        self.items
            .remove(key)
            .or_else(|| self.inadmissible.remove(key))
    }

    /// Move every parked workload back into the heap
    pub fn flush_parked(&mut self) {
        let parked: Vec<_> = self.inadmissible.drain().map(|(_, info)| info).collect();
        for info in parked {
            self.push(info);
        }
    }

    /// Pop the most-preferred live entry
    pub fn pop(&mut self) -> Option<WorkloadInfo> {
        while let Some(entry) = self.heap.pop() {
            match self.items.get(&entry.workload) {
                // Stale entries (re-keyed or deleted) are skipped.
                Some(info) if info.order_key() == entry.key => {
                    return self.items.remove(&entry.workload);
                }
                _ => continue,
            }
        }
        None
    }

    /// Drain all live entries in heap order
    pub fn drain_ordered(&mut self) -> Vec<WorkloadInfo> {
        let mut out = Vec::with_capacity(self.items.len());
        while let Some(info) = self.pop() {
            out.push(info);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchgate_api::{PodSet, Quantity, ResourceName, Workload, WorkloadStatus};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn info(name: &str, priority: i32, age_secs: i64) -> WorkloadInfo {
        let w = Workload {
            name: name.to_string(),
            namespace: "ns".to_string(),
            uid: Uuid::new_v4(),
            priority,
            queue_name: "lq".to_string(),
            created_at: Utc::now() - chrono::Duration::seconds(age_secs),
            pod_sets: vec![PodSet {
                name: "main".to_string(),
                count: 1,
                requests: [(ResourceName::cpu(), Quantity::from_units(1))].into(),
                node_selector: BTreeMap::new(),
                affinity_terms: vec![],
                tolerations: vec![],
            }],
            finished: false,
            resource_version: 0,
            status: WorkloadStatus::default(),
        };
        WorkloadInfo::new(w, "cq")
    }

    #[test]
    fn test_pop_order_priority_then_age() {
        let mut q = PendingQueue::new(QueueingStrategy::BestEffortFIFO, None);
        q.push(info("old-low", 1, 300));
        q.push(info("new-high", 5, 10));
        q.push(info("older-low", 1, 600));

        let order: Vec<_> = q.drain_ordered().iter().map(|i| i.workload.name.clone()).collect();
        assert_eq!(order, vec!["new-high", "older-low", "old-low"]);
    }

    #[test]
    fn test_priority_update_rekeys() {
        let mut q = PendingQueue::new(QueueingStrategy::BestEffortFIFO, None);
        let low = info("w", 1, 300);
        q.push(low.clone());
        q.push(info("other", 3, 300));

        let mut bumped = low;
        bumped.workload.priority = 10;
        q.push(bumped);

        let first = q.pop().unwrap();
        assert_eq!(first.workload.name, "w");
        assert_eq!(first.workload.priority, 10);
        // The stale heap entry for the old key must not resurface it.
        let second = q.pop().unwrap();
        assert_eq!(second.workload.name, "other");
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_park_and_flush() {
        let mut q = PendingQueue::new(QueueingStrategy::BestEffortFIFO, None);
        let w = info("w", 1, 0);
        q.push(w.clone());
        let popped = q.pop().unwrap();
        q.park(popped);

        assert!(q.pop().is_none());
        assert_eq!(q.len(), 1);
        assert!(q.contains(&w.key()));

        q.flush_parked();
        assert_eq!(q.pop().unwrap().key(), w.key());
    }

    #[test]
    fn test_delete_reaches_parked_entries() {
        let mut q = PendingQueue::new(QueueingStrategy::BestEffortFIFO, None);
        let w = info("w", 1, 0);
        q.push(w.clone());
        let popped = q.pop().unwrap();
        q.park(popped);
        assert!(q.delete(&w.key()).is_some());
        assert!(q.is_empty());
    }
}
