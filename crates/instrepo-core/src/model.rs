// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain model for workflow instances.
//!
//! These are plain values: a `WorkflowInstance` carries a full snapshot of the
//! `Workflow` it was started from, so an instance can always be reconstructed
//! without consulting a workflow definition store.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Priority assigned to instances that do not specify one.
pub const DEFAULT_PRIORITY: f64 = 5.0;

/// Timeout value meaning "this condition never times out".
pub const NO_TIMEOUT: i64 = -1;

/// Ordered key/value configuration of a task or condition (one value per key).
pub type TaskConfig = IndexMap<String, String>;

/// Ordered, multi-valued string map.
///
/// Both the key insertion order and the order of values under a key are
/// significant and are preserved by every backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    entries: IndexMap<String, Vec<String>>,
}

impl Metadata {
    /// Create an empty metadata map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `key`, creating the key if needed.
    pub fn add_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .entry(key.into())
            .or_default()
            .push(value.into());
    }

    /// Replace every value under `key` with `values`.
    ///
    /// An existing key keeps its position in the iteration order.
    pub fn replace(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.entries.insert(key.into(), values);
    }

    /// All values stored under `key`, in insertion order.
    pub fn get_all(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// First value stored under `key`.
    pub fn get_first(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Remove `key` and return its values. Remaining keys keep their order.
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.entries.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// `(key, values)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in iter {
            metadata.add_value(key, value);
        }
        metadata
    }
}

/// A pre/post condition guarding a task or a whole workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCondition {
    pub id: String,
    pub name: String,
    /// 1-based position within its owning list.
    pub order: i32,
    /// Opaque identifier of the executable condition behavior.
    pub instance_class_name: String,
    /// Seconds before the condition times out; [`NO_TIMEOUT`] disables it.
    pub timeout_seconds: i64,
    /// Whether a failing condition may be skipped.
    pub optional: bool,
    #[serde(default)]
    pub config: TaskConfig,
}

impl Default for WorkflowCondition {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            order: 1,
            instance_class_name: String::new(),
            timeout_seconds: NO_TIMEOUT,
            optional: false,
            config: TaskConfig::new(),
        }
    }
}

/// One step of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: String,
    pub name: String,
    /// 1-based position within the workflow.
    pub order: i32,
    /// Opaque identifier of the executable task behavior.
    pub instance_class_name: String,
    #[serde(default)]
    pub conditions: Vec<WorkflowCondition>,
    #[serde(default)]
    pub config: TaskConfig,
    /// Metadata keys that must be present before the task may run.
    #[serde(default)]
    pub required_metadata_fields: Vec<String>,
}

/// Workflow definition snapshot embedded in every instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<WorkflowTask>,
    #[serde(default)]
    pub pre_conditions: Vec<WorkflowCondition>,
    #[serde(default)]
    pub post_conditions: Vec<WorkflowCondition>,
}

impl Workflow {
    /// A workflow reference carrying only its id.
    pub fn reference(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// One execution of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Backend-assigned identifier; empty until the instance is added.
    pub id: String,
    /// Free-form status, e.g. `RUNNING`, `FINISHED`, `PAUSED`.
    pub status: String,
    pub current_task_id: String,
    /// ISO-8601 timestamps, each independently optional.
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub current_task_start_time: Option<String>,
    pub current_task_end_time: Option<String>,
    pub priority: f64,
    /// How many times the instance was blocked waiting on a condition.
    pub times_blocked: u32,
    #[serde(default)]
    pub shared_context: Metadata,
    pub workflow: Workflow,
}

impl Default for WorkflowInstance {
    fn default() -> Self {
        Self {
            id: String::new(),
            status: String::new(),
            current_task_id: String::new(),
            start_time: None,
            end_time: None,
            current_task_start_time: None,
            current_task_end_time: None,
            priority: DEFAULT_PRIORITY,
            times_blocked: 0,
            shared_context: Metadata::new(),
            workflow: Workflow::default(),
        }
    }
}

impl WorkflowInstance {
    /// Minutes elapsed between the start time and the end time, or `now` if
    /// the instance has not finished.
    pub fn wall_clock_minutes(&self, now: DateTime<Utc>) -> Option<f64> {
        elapsed_minutes(self.start_time.as_deref(), self.end_time.as_deref(), now)
    }

    /// Minutes elapsed in the current task, measured like
    /// [`wall_clock_minutes`](Self::wall_clock_minutes).
    pub fn current_task_wall_clock_minutes(&self, now: DateTime<Utc>) -> Option<f64> {
        elapsed_minutes(
            self.current_task_start_time.as_deref(),
            self.current_task_end_time.as_deref(),
            now,
        )
    }
}

fn elapsed_minutes(start: Option<&str>, end: Option<&str>, now: DateTime<Utc>) -> Option<f64> {
    let start = parse_iso(start?)?;
    let end = match end {
        Some(end) => parse_iso(end)?,
        None => now,
    };
    Some((end - start).num_milliseconds() as f64 / 60_000.0)
}

fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_preserves_key_and_value_order() {
        let mut met = Metadata::new();
        met.add_value("zeta", "1");
        met.add_value("alpha", "2");
        met.add_value("zeta", "3");

        let keys: Vec<_> = met.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(met.get_all("zeta").unwrap(), ["1", "3"]);
        assert_eq!(met.get_first("alpha"), Some("2"));
    }

    #[test]
    fn test_metadata_remove_keeps_order() {
        let mut met: Metadata = [("a", "1"), ("b", "2"), ("c", "3")].into_iter().collect();
        assert_eq!(met.remove("b"), Some(vec!["2".to_string()]));

        let keys: Vec<_> = met.keys().collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert!(!met.contains_key("b"));
        assert_eq!(met.len(), 2);
    }

    #[test]
    fn test_metadata_json_is_a_plain_object() {
        let met: Metadata = [("k", "v1"), ("k", "v2")].into_iter().collect();
        let json = serde_json::to_string(&met).unwrap();
        assert_eq!(json, r#"{"k":["v1","v2"]}"#);
    }

    #[test]
    fn test_instance_defaults() {
        let inst = WorkflowInstance::default();
        assert_eq!(inst.priority, DEFAULT_PRIORITY);
        assert_eq!(inst.times_blocked, 0);
        assert!(inst.shared_context.is_empty());
        assert_eq!(WorkflowCondition::default().timeout_seconds, NO_TIMEOUT);
    }

    #[test]
    fn test_wall_clock_minutes_finished() {
        let inst = WorkflowInstance {
            start_time: Some("2025-01-01T10:00:00Z".to_string()),
            end_time: Some("2025-01-01T10:30:00Z".to_string()),
            ..Default::default()
        };
        assert_eq!(inst.wall_clock_minutes(Utc::now()), Some(30.0));
    }

    #[test]
    fn test_wall_clock_minutes_running_uses_now() {
        let now = DateTime::parse_from_rfc3339("2025-01-01T11:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let inst = WorkflowInstance {
            current_task_start_time: Some("2025-01-01T10:45:00Z".to_string()),
            ..Default::default()
        };
        assert_eq!(inst.current_task_wall_clock_minutes(now), Some(15.0));
    }

    #[test]
    fn test_wall_clock_minutes_without_start() {
        let inst = WorkflowInstance {
            start_time: Some("not a timestamp".to_string()),
            ..Default::default()
        };
        assert_eq!(inst.wall_clock_minutes(Utc::now()), None);
        assert_eq!(
            WorkflowInstance::default().wall_clock_minutes(Utc::now()),
            None
        );
    }
}
