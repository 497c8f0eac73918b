//! Ordered result store
//!
//! SubTask id → TaskResult, kept in insertion order. Serializes as an array
//! of `[id, result]` pairs so it round-trips through JSON storage.

use crate::types::{TaskResult, TaskStatus};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Insertion-ordered map of task results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultMap {
    entries: IndexMap<String, TaskResult>,
}

impl ResultMap {
    /// Create empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the result for a subtask
    ///
    /// Replacing keeps the original insertion position.
    pub fn insert(&mut self, result: TaskResult) {
        self.entries.insert(result.subtask_id.clone(), result);
    }

    /// Get result
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TaskResult> {
        self.entries.get(id)
    }

    /// Whether a result exists for the subtask
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Whether the subtask reached `completed` or `failed`
    #[must_use]
    pub fn is_resolved(&self, id: &str) -> bool {
        self.entries
            .get(id)
            .is_some_and(|r| r.status.is_terminal())
    }

    /// Number of results
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&String, &TaskResult)> {
        self.entries.iter()
    }

    /// Count of results in a given status
    #[must_use]
    pub fn count(&self, status: TaskStatus) -> usize {
        self.entries.values().filter(|r| r.status == status).count()
    }

    /// Outputs of the completed results among `ids`
    #[must_use]
    pub fn completed_outputs<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a String>,
    ) -> serde_json::Map<String, serde_json::Value> {
        ids.into_iter()
            .filter_map(|id| {
                self.entries
                    .get(id)
                    .filter(|r| r.is_completed())
                    .map(|r| (id.clone(), r.output.clone()))
            })
            .collect()
    }

    /// Most recent non-empty `rollbackInstructions` / `rollbackPlan`
    #[must_use]
    pub fn latest_rollback_plan(&self) -> Option<String> {
        self.entries.values().rev().find_map(|r| {
            r.output_str("rollbackInstructions")
                .or_else(|| r.output_str("rollbackPlan"))
                .map(str::to_string)
        })
    }
}

impl Serialize for ResultMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&String, &TaskResult)> = self.entries.iter().collect();
        pairs.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ResultMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs: Vec<(String, TaskResult)> = Vec::deserialize(deserializer)?;
        Ok(Self {
            entries: pairs.into_iter().collect(),
        })
    }
}

impl FromIterator<TaskResult> for ResultMap {
    fn from_iter<I: IntoIterator<Item = TaskResult>>(iter: I) -> Self {
        let mut map = Self::new();
        for result in iter {
            map.insert(result);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn serializes_as_ordered_pairs() {
        let map: ResultMap = vec![
            TaskResult::running("b", "advisor").complete(json!({})),
            TaskResult::running("a", "reviewer").fail("boom"),
        ]
        .into_iter()
        .collect();

        let value = serde_json::to_value(&map).unwrap();
        let pairs = value.as_array().unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0][0], json!("b"));
        assert_eq!(pairs[1][0], json!("a"));

        let back: ResultMap = serde_json::from_value(value).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn replacing_keeps_position() {
        let mut map = ResultMap::new();
        map.insert(TaskResult::running("a", "advisor"));
        map.insert(TaskResult::running("b", "advisor"));
        map.insert(TaskResult::running("a", "advisor").complete(json!(1)));

        let ids: Vec<_> = map.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(map.is_resolved("a"));
        assert!(!map.is_resolved("b"));
    }

    #[test]
    fn rollback_plan_prefers_latest_result() {
        let mut map = ResultMap::new();
        map.insert(TaskResult::running("a", "operator").complete(json!({"rollbackPlan": "old"})));
        map.insert(
            TaskResult::running("b", "executor")
                .complete(json!({"rollbackInstructions": "restore snapshot"})),
        );
        map.insert(TaskResult::running("c", "reviewer").complete(json!({"rollbackPlan": "  "})));

        assert_eq!(map.latest_rollback_plan().as_deref(), Some("restore snapshot"));
    }

    #[test]
    fn completed_outputs_skips_failures() {
        let mut map = ResultMap::new();
        map.insert(TaskResult::running("a", "advisor").complete(json!({"x": 1})));
        map.insert(TaskResult::running("b", "advisor").fail("nope"));

        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let outputs = map.completed_outputs(&ids);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["a"], json!({"x": 1}));
    }
}
