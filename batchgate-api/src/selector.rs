//! Label selectors
//!
//! Used for both namespace gating on ClusterQueues and node-affinity terms
//! on pod sets. `None` at the use site means "select nothing"; an empty
//! selector means "select everything".

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operator of a single match expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SelectorOperator {
    /// Label value must be one of the listed values
    In,
    /// Label value must not be one of the listed values
    NotIn,
    /// Label key must be present
    Exists,
    /// Label key must be absent
    DoesNotExist,
}

/// A single requirement against a label set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchExpression {
    /// Label key the expression applies to
    pub key: String,
    /// Comparison operator
    pub operator: SelectorOperator,
    /// Values for In/NotIn; ignored for Exists/DoesNotExist
    #[serde(default)]
    pub values: Vec<String>,
}

impl MatchExpression {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self.operator {
            SelectorOperator::In => labels
                .get(&self.key)
                .is_some_and(|v| self.values.iter().any(|want| want == v)),
            SelectorOperator::NotIn => labels
                .get(&self.key)
                .is_none_or(|v| !self.values.iter().any(|want| want == v)),
            SelectorOperator::Exists => labels.contains_key(&self.key),
            SelectorOperator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

/// Conjunction of exact-match labels and match expressions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    /// Labels that must be present with exactly these values
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    /// Additional expression requirements
    #[serde(default)]
    pub match_expressions: Vec<MatchExpression>,
}

impl LabelSelector {
    /// Selector matching every label set
    pub fn everything() -> Self {
        Self::default()
    }

    /// True when the selector has no requirements
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Evaluate the selector against a label set
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
            && self.match_expressions.iter().all(|e| e.matches(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let sel = LabelSelector::everything();
        assert!(sel.matches(&labels(&[])));
        assert!(sel.matches(&labels(&[("team", "ml")])));
    }

    #[test]
    fn test_match_labels() {
        let sel = LabelSelector {
            match_labels: labels(&[("team", "ml")]),
            match_expressions: vec![],
        };
        assert!(sel.matches(&labels(&[("team", "ml"), ("env", "prod")])));
        assert!(!sel.matches(&labels(&[("team", "web")])));
        assert!(!sel.matches(&labels(&[])));
    }

    #[test]
    fn test_match_expressions() {
        let sel = LabelSelector {
            match_labels: BTreeMap::new(),
            match_expressions: vec![
                MatchExpression {
                    key: "env".to_string(),
                    operator: SelectorOperator::In,
                    values: vec!["prod".to_string(), "staging".to_string()],
                },
                MatchExpression {
                    key: "legacy".to_string(),
                    operator: SelectorOperator::DoesNotExist,
                    values: vec![],
                },
            ],
        };
        assert!(sel.matches(&labels(&[("env", "prod")])));
        assert!(!sel.matches(&labels(&[("env", "dev")])));
        assert!(!sel.matches(&labels(&[("env", "prod"), ("legacy", "1")])));
    }
}
