//! Per-iteration status record threaded through every phase.
//!
//! The record is also the wire format shared with external commands (the
//! round-trip file) and written by `write-file` phases, so serialization must
//! stay permissive: unknown keys are ignored and missing keys default.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Agent run state as reported to the coordination service.
///
/// Phases may write arbitrary strings into this slot; anything other than
/// `IDLE`/`RUNNING` is carried verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Other(String),
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Idle => "IDLE",
            RunStatus::Running => "RUNNING",
            RunStatus::Other(raw) => raw,
        }
    }
}

impl From<String> for RunStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "IDLE" => RunStatus::Idle,
            "RUNNING" => RunStatus::Running,
            _ => RunStatus::Other(raw),
        }
    }
}

impl From<&str> for RunStatus {
    fn from(raw: &str) -> Self {
        RunStatus::from(raw.to_string())
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Project/release/build triple the agent is allowed to pull tests for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectReleaseBuild {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub release: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub build: String,
}

/// Mutable snapshot of agent state for one loop iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusRecord {
    /// Capabilities discovered this iteration (semantically a set).
    pub provides: Vec<String>,
    /// Capabilities that are present but currently unusable.
    #[serde(rename = "broken")]
    pub broken_provides: Vec<String>,
    #[serde(rename = "runStatus")]
    pub run_status: RunStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<ProjectReleaseBuild>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub versions: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hardware: String,
    /// Extra attributes merged into every queue query.
    #[serde(rename = "requiredAttrs", skip_serializing_if = "BTreeMap::is_empty")]
    pub required_test_attributes: BTreeMap<String, String>,
    #[serde(rename = "ranTest")]
    pub ran_test: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(rename = "actionParameter", skip_serializing_if = "String::is_empty")]
    pub action_parameter: String,
    #[serde(rename = "IP", skip_serializing_if = "String::is_empty")]
    pub ip: String,
    pub attributes: BTreeMap<String, String>,
    /// Result descriptor returned by the queue, if a test was handed out.
    #[serde(rename = "testcase")]
    pub result_to_run: Option<Value>,
    pub groups: Vec<String>,
    #[serde(rename = "shouldExit")]
    pub should_exit: bool,
    #[serde(rename = "agentName")]
    pub agent_name: String,
}

impl StatusRecord {
    /// Fresh record for the top of an iteration.
    pub fn fresh(groups: &[String], projects: &[ProjectReleaseBuild], agent_name: &str) -> Self {
        Self {
            groups: groups.to_vec(),
            projects: projects.to_vec(),
            agent_name: agent_name.to_string(),
            ..Self::default()
        }
    }

    /// `provides` minus `broken`, deduplicated. Sorted for stable queries.
    pub fn non_broken_provides(&self) -> Vec<String> {
        let broken: BTreeSet<&str> = self.broken_provides.iter().map(String::as_str).collect();
        self.provides
            .iter()
            .map(String::as_str)
            .filter(|provide| !broken.contains(provide))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn is_idle(&self) -> bool {
        self.run_status == RunStatus::Idle
    }

    /// Serialize to the JSON wire format.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Apply a JSON document produced by an external command on top of `self`.
    ///
    /// Top-level keys present in `document` replace the matching field, keys
    /// that are absent keep their current value and `null` resets a field to
    /// its default. Object values (`attributes`, `requiredAttrs`, `versions`,
    /// `testcase`) merge their entries into the current map one level deep.
    /// Returns the merged record; `self` is left untouched.
    pub fn overlaid_with(&self, document: &str) -> serde_json::Result<StatusRecord> {
        let incoming: serde_json::Map<String, Value> = serde_json::from_str(document)?;
        let mut merged = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        for (key, value) in incoming {
            if value.is_null() {
                merged.remove(&key);
            } else if let (Some(Value::Object(current)), Value::Object(entries)) =
                (merged.get_mut(&key), &value)
            {
                current.extend(entries.clone());
            } else {
                merged.insert(key, value);
            }
        }
        serde_json::from_value(Value::Object(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_with(provides: &[&str], broken: &[&str]) -> StatusRecord {
        StatusRecord {
            provides: provides.iter().map(|s| s.to_string()).collect(),
            broken_provides: broken.iter().map(|s| s.to_string()).collect(),
            ..StatusRecord::default()
        }
    }

    #[test]
    fn non_broken_provides_removes_broken_and_duplicates() {
        let status = status_with(&["b", "a", "b", "c", "a"], &["c", "zz"]);
        assert_eq!(status.non_broken_provides(), vec!["a", "b"]);
    }

    #[test]
    fn non_broken_provides_ignores_list_order() {
        let left = status_with(&["cap-a", "cap-b"], &["cap-a"]);
        let right = status_with(&["cap-b", "cap-a"], &["cap-a", "cap-a"]);
        assert_eq!(left.non_broken_provides(), vec!["cap-b"]);
        assert_eq!(right.non_broken_provides(), vec!["cap-b"]);
    }

    #[test]
    fn run_status_keeps_unknown_values() {
        let status: StatusRecord =
            serde_json::from_str(r#"{"runStatus":"MAINTENANCE"}"#).expect("parse");
        assert_eq!(status.run_status, RunStatus::Other("MAINTENANCE".to_string()));
        assert!(status.to_json().expect("json").contains(r#""runStatus":"MAINTENANCE""#));
    }

    #[test]
    fn fresh_status_uses_wire_defaults() {
        let status = StatusRecord::fresh(&["g1".to_string()], &[], "agent-1");
        let json = status.to_json().expect("json");
        assert_eq!(
            json,
            r#"{"provides":[],"broken":[],"runStatus":"IDLE","ranTest":false,"attributes":{},"testcase":null,"groups":["g1"],"shouldExit":false,"agentName":"agent-1"}"#
        );
    }

    #[test]
    fn unknown_keys_are_ignored_and_missing_keys_default() {
        let status: StatusRecord =
            serde_json::from_str(r#"{"provides":["x"],"somethingNew":42}"#).expect("parse");
        assert_eq!(status.provides, vec!["x"]);
        assert!(status.is_idle());
        assert!(status.result_to_run.is_none());
    }

    #[test]
    fn overlay_replaces_present_keys_and_keeps_absent_ones() {
        let mut before = status_with(&["a"], &["b"]);
        before.agent_name = "agent".to_string();
        before.attributes.insert("os".to_string(), "linux".to_string());

        let after = before
            .overlaid_with(r#"{"provides":["x"],"shouldExit":true,"broken":null}"#)
            .expect("overlay");
        assert_eq!(after.provides, vec!["x"]);
        assert!(after.should_exit);
        assert!(after.broken_provides.is_empty());
        assert_eq!(after.agent_name, "agent");
        assert_eq!(after.attributes.get("os").map(String::as_str), Some("linux"));
        assert_eq!(before.provides, vec!["a"]);
    }

    /// Map fields gain and overwrite entries; entries the command omits stay.
    #[test]
    fn overlay_merges_map_fields_entry_by_entry() {
        let mut before = StatusRecord::default();
        before.attributes.insert("os".to_string(), "linux".to_string());
        before.attributes.insert("arch".to_string(), "x86".to_string());
        before.result_to_run = Some(serde_json::json!({"id": "r1", "testcase": {"name": "a"}}));

        let after = before
            .overlaid_with(
                r#"{"attributes":{"arch":"arm","gpu":"yes"},"testcase":{"status":"PASS","testcase":{"automationId":"x"}}}"#,
            )
            .expect("overlay");

        assert_eq!(
            after.attributes,
            BTreeMap::from([
                ("arch".to_string(), "arm".to_string()),
                ("gpu".to_string(), "yes".to_string()),
                ("os".to_string(), "linux".to_string()),
            ])
        );
        assert_eq!(
            after.result_to_run,
            Some(serde_json::json!({
                "id": "r1",
                "status": "PASS",
                "testcase": {"automationId": "x"},
            }))
        );
    }

    #[test]
    fn overlay_map_into_absent_field_sets_it() {
        let before = StatusRecord::default();
        let after = before
            .overlaid_with(r#"{"requiredAttrs":{"os":"linux"},"testcase":{"id":"r9"}}"#)
            .expect("overlay");
        assert_eq!(
            after.required_test_attributes.get("os").map(String::as_str),
            Some("linux")
        );
        assert_eq!(after.result_to_run, Some(serde_json::json!({"id": "r9"})));
    }

    #[test]
    fn overlay_rejects_non_object_documents() {
        let before = StatusRecord::default();
        assert!(before.overlaid_with("[1, 2]").is_err());
        assert!(before.overlaid_with("not json").is_err());
    }
}
