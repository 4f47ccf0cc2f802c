//! Queue query construction.

use serde_json::{Map, Value};

use crate::core::status::{ProjectReleaseBuild, StatusRecord};

/// JSON object posted to the queue endpoint.
pub type QueueQuery = Map<String, Value>;

/// Base query: usable capabilities plus required test attributes as top-level keys.
pub fn base_query(status: &StatusRecord) -> QueueQuery {
    let mut query = QueueQuery::new();
    query.insert(
        "provides".to_string(),
        Value::from(status.non_broken_provides()),
    );
    for (key, value) in &status.required_test_attributes {
        query.insert(key.clone(), Value::from(value.as_str()));
    }
    query
}

/// Queries to try in order, stopping at the first one that yields a test.
///
/// One query per project (with `project`, and `release`/`build` when set), or a
/// single unfiltered query when no projects are configured.
pub fn queue_queries(status: &StatusRecord, projects: &[ProjectReleaseBuild]) -> Vec<QueueQuery> {
    let base = base_query(status);
    if projects.is_empty() {
        return vec![base];
    }
    projects
        .iter()
        .map(|project| {
            let mut query = base.clone();
            query.insert("project".to_string(), Value::from(project.name.as_str()));
            if !project.release.is_empty() {
                query.insert("release".to_string(), Value::from(project.release.as_str()));
            }
            if !project.build.is_empty() {
                query.insert("build".to_string(), Value::from(project.build.as_str()));
            }
            query
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project(name: &str, release: &str, build: &str) -> ProjectReleaseBuild {
        ProjectReleaseBuild {
            name: name.to_string(),
            release: release.to_string(),
            build: build.to_string(),
        }
    }

    #[test]
    fn base_query_merges_required_attributes() {
        let mut status = StatusRecord {
            provides: vec!["b".to_string(), "a".to_string(), "b".to_string()],
            broken_provides: vec!["a".to_string()],
            ..StatusRecord::default()
        };
        status
            .required_test_attributes
            .insert("os".to_string(), "linux".to_string());

        assert_eq!(
            Value::Object(base_query(&status)),
            json!({"provides": ["b"], "os": "linux"})
        );
    }

    #[test]
    fn no_projects_yields_single_unfiltered_query() {
        let queries = queue_queries(&StatusRecord::default(), &[]);
        assert_eq!(queries.len(), 1);
        assert!(!queries[0].contains_key("project"));
    }

    #[test]
    fn project_keys_do_not_leak_between_queries() {
        let queries = queue_queries(
            &StatusRecord::default(),
            &[project("first", "r1", "b1"), project("second", "", "")],
        );
        assert_eq!(
            Value::Object(queries[0].clone()),
            json!({"provides": [], "project": "first", "release": "r1", "build": "b1"})
        );
        assert_eq!(
            Value::Object(queries[1].clone()),
            json!({"provides": [], "project": "second"})
        );
    }
}
