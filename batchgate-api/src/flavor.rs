//! Resource flavors, taints, and tolerations
//!
//! A flavor associates a quota dimension with a class of nodes via labels
//! and taints. Flavors are referenced by name from ClusterQueue resource
//! groups; identity is the name.

use crate::selector::LabelSelector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of a resource flavor
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlavorName(pub String);

impl From<&str> for FlavorName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for FlavorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Effect of a node taint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TaintEffect {
    /// Pods without a matching toleration are not scheduled
    NoSchedule,
    /// Pods without a matching toleration are evicted
    NoExecute,
    /// Scheduler avoids the node but may still place pods
    PreferNoSchedule,
}

/// A taint carried by the nodes of a flavor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    /// Taint key
    pub key: String,
    /// Taint value
    #[serde(default)]
    pub value: String,
    /// Taint effect
    pub effect: TaintEffect,
}

/// Operator of a toleration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TolerationOperator {
    /// Tolerate any value of the key
    Exists,
    /// Tolerate only the given value
    Equal,
}

/// A pod-set toleration against node taints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toleration {
    /// Taint key tolerated; empty with Exists tolerates everything
    #[serde(default)]
    pub key: String,
    /// Comparison operator
    pub operator: TolerationOperator,
    /// Value for Equal
    #[serde(default)]
    pub value: String,
    /// Effect tolerated; `None` tolerates all effects
    #[serde(default)]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    /// True when this toleration covers the taint
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if let Some(effect) = self.effect {
            if effect != taint.effect {
                return false;
            }
        }
        match self.operator {
            TolerationOperator::Exists => self.key.is_empty() || self.key == taint.key,
            TolerationOperator::Equal => self.key == taint.key && self.value == taint.value,
        }
    }
}

/// True when every taint that gates scheduling is tolerated
///
/// PreferNoSchedule taints never block a flavor.
pub fn tolerates_taints(tolerations: &[Toleration], taints: &[Taint]) -> bool {
    taints
        .iter()
        .filter(|t| t.effect != TaintEffect::PreferNoSchedule)
        .all(|taint| tolerations.iter().any(|tol| tol.tolerates(taint)))
}

/// A named quota dimension tied to a class of nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFlavor {
    /// Flavor name; identity
    pub name: FlavorName,
    /// Labels carried by the flavor's nodes
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,
    /// Taints carried by the flavor's nodes
    #[serde(default)]
    pub taints: Vec<Taint>,
    /// Object revision for conditional writes
    #[serde(default)]
    pub resource_version: u64,
}

impl ResourceFlavor {
    /// Flavor with no node constraints
    pub fn new(name: impl Into<FlavorName>) -> Self {
        Self {
            name: name.into(),
            node_labels: BTreeMap::new(),
            taints: Vec::new(),
            resource_version: 0,
        }
    }

    /// True when a pod set's node selection is compatible with this flavor
    ///
    /// The selector and affinity terms must select the flavor's labels and
    /// the tolerations must cover its scheduling taints.
    pub fn accepts(
        &self,
        node_selector: &BTreeMap<String, String>,
        affinity_terms: &[LabelSelector],
        tolerations: &[Toleration],
    ) -> bool {
        let selector_ok = node_selector
            .iter()
            .all(|(k, v)| self.node_labels.get(k) == Some(v));
        // Affinity terms are OR'd, matching node-affinity semantics.
        let affinity_ok =
            affinity_terms.is_empty() || affinity_terms.iter().any(|t| t.matches(&self.node_labels));
        selector_ok && affinity_ok && tolerates_taints(tolerations, &self.taints)
    }
}

impl From<FlavorName> for ResourceFlavor {
    fn from(name: FlavorName) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpu_flavor() -> ResourceFlavor {
        ResourceFlavor {
            name: "gpu-a100".into(),
            node_labels: [("accelerator".to_string(), "a100".to_string())].into(),
            taints: vec![Taint {
                key: "accelerator".to_string(),
                value: "a100".to_string(),
                effect: TaintEffect::NoSchedule,
            }],
            resource_version: 0,
        }
    }

    #[test]
    fn test_selector_must_match_flavor_labels() {
        let flavor = gpu_flavor();
        let tolerate_all = vec![Toleration {
            key: String::new(),
            operator: TolerationOperator::Exists,
            value: String::new(),
            effect: None,
        }];
        let selector = [("accelerator".to_string(), "a100".to_string())].into();
        assert!(flavor.accepts(&selector, &[], &tolerate_all));

        let wrong = [("accelerator".to_string(), "h100".to_string())].into();
        assert!(!flavor.accepts(&wrong, &[], &tolerate_all));
    }

    #[test]
    fn test_untolerated_taint_blocks() {
        let flavor = gpu_flavor();
        assert!(!flavor.accepts(&BTreeMap::new(), &[], &[]));
    }

    #[test]
    fn test_equal_toleration() {
        let taint = Taint {
            key: "dedicated".to_string(),
            value: "batch".to_string(),
            effect: TaintEffect::NoSchedule,
        };
        let tol = Toleration {
            key: "dedicated".to_string(),
            operator: TolerationOperator::Equal,
            value: "batch".to_string(),
            effect: Some(TaintEffect::NoSchedule),
        };
        assert!(tol.tolerates(&taint));

        let other = Taint {
            value: "web".to_string(),
            ..taint
        };
        assert!(!tol.tolerates(&other));
    }

    #[test]
    fn test_prefer_no_schedule_never_blocks() {
        let flavor = ResourceFlavor {
            name: "spot".into(),
            node_labels: BTreeMap::new(),
            taints: vec![Taint {
                key: "spot".to_string(),
                value: String::new(),
                effect: TaintEffect::PreferNoSchedule,
            }],
            resource_version: 0,
        };
        assert!(flavor.accepts(&BTreeMap::new(), &[], &[]));
    }
}
