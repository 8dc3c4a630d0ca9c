//! State-transition validation for entities with a state column.

use crate::error::AppError;
use crate::service::record::Values;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Legal successor states per state value, for one state column.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionGraph {
    key: String,
    graph: HashMap<String, HashSet<String>>,
}

fn state_str(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl TransitionGraph {
    pub fn new(key: impl Into<String>, graph: BTreeMap<String, Vec<String>>) -> Self {
        TransitionGraph {
            key: key.into(),
            graph: graph
                .into_iter()
                .map(|(from, to)| (from, to.into_iter().collect()))
                .collect(),
        }
    }

    /// Check `changes` against the current row. Only runs when the state key is
    /// among the changes; a state with no entry (or no successors) allows nothing.
    pub fn validate(&self, resource: &str, current: &Values, changes: &Values) -> Result<(), AppError> {
        let Some(proposed) = changes.get(&self.key) else {
            return Ok(());
        };
        let from = current.get(&self.key).map(state_str).unwrap_or_default();
        let to = state_str(proposed);
        let allowed = self
            .graph
            .get(&from)
            .map(|next| next.contains(&to))
            .unwrap_or(false);
        if allowed {
            Ok(())
        } else {
            Err(AppError::TransitionNotPermitted {
                resource: resource.to_string(),
                from,
                to,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph() -> TransitionGraph {
        let mut g = BTreeMap::new();
        g.insert("A".to_string(), vec!["B".to_string()]);
        g.insert("B".to_string(), vec!["C".to_string()]);
        TransitionGraph::new("state", g)
    }

    fn values(v: Value) -> Values {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let err = graph()
            .validate("orders", &values(json!({ "state": "A" })), &values(json!({ "state": "C" })))
            .unwrap_err();
        match err {
            AppError::TransitionNotPermitted { resource, from, to } => {
                assert_eq!((resource.as_str(), from.as_str(), to.as_str()), ("orders", "A", "C"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn stepwise_transitions_succeed() {
        let g = graph();
        g.validate("orders", &values(json!({ "state": "A" })), &values(json!({ "state": "B" })))
            .unwrap();
        g.validate("orders", &values(json!({ "state": "B" })), &values(json!({ "state": "C" })))
            .unwrap();
    }

    #[test]
    fn unrelated_changes_are_not_checked() {
        graph()
            .validate("orders", &values(json!({ "state": "C" })), &values(json!({ "note": "x" })))
            .unwrap();
    }

    #[test]
    fn terminal_and_unknown_states_allow_nothing() {
        let g = graph();
        assert!(g
            .validate("orders", &values(json!({ "state": "C" })), &values(json!({ "state": "A" })))
            .is_err());
        assert!(g
            .validate("orders", &values(json!({ "state": "Z" })), &values(json!({ "state": "A" })))
            .is_err());
    }
}
