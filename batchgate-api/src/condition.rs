//! Status conditions
//!
//! Conditions record observed state transitions on Workloads and
//! ClusterQueues with a reason and transition timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a status condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    /// Workload has quota reserved and an admission record
    Admitted,
    /// Workload quota is reserved pending admission observation
    QuotaReserved,
    /// Workload was evicted (preemption, pods-ready timeout)
    Evicted,
    /// All pods of an admitted workload reported ready
    PodsReady,
    /// ClusterQueue configuration is valid and all flavors exist
    Active,
}

/// One observed condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition kind
    #[serde(rename = "type")]
    pub type_: ConditionType,
    /// Whether the condition currently holds
    pub status: bool,
    /// Machine-readable reason
    pub reason: String,
    /// Human-readable detail
    #[serde(default)]
    pub message: String,
    /// When the status last flipped
    pub last_transition: DateTime<Utc>,
}

impl Condition {
    /// Build a condition transitioning now
    pub fn new(type_: ConditionType, status: bool, reason: impl Into<String>) -> Self {
        Self {
            type_,
            status,
            reason: reason.into(),
            message: String::new(),
            last_transition: Utc::now(),
        }
    }

    /// Attach a message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Find a condition by type
pub fn find(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// True when the condition is present with status true
pub fn is_true(conditions: &[Condition], type_: ConditionType) -> bool {
    find(conditions, type_).is_some_and(|c| c.status)
}

/// Insert or update a condition, keeping the old transition time when the
/// status did not change
pub fn upsert(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            let unchanged = existing.status == condition.status;
            let last_transition = if unchanged {
                existing.last_transition
            } else {
                condition.last_transition
            };
            *existing = Condition {
                last_transition,
                ..condition
            };
        }
        None => conditions.push(condition),
    }
}
