//! Views over the opaque result descriptor handed out by the queue.

use serde_json::Value;

/// Identifying fields of the test a result descriptor points at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestInfo {
    /// Result id.
    pub id: String,
    pub name: String,
    pub automation_id: String,
    /// Present only when the descriptor carries a `testrun` object with an id.
    pub testrun_id: Option<String>,
}

impl TestInfo {
    /// Extract test info; missing or non-string fields become empty.
    pub fn from_result(result: &Value) -> Self {
        let testcase = result.get("testcase");
        Self {
            id: string_at(Some(result), "id"),
            name: string_at(testcase, "name"),
            automation_id: string_at(testcase, "automationId"),
            testrun_id: result
                .get("testrun")
                .and_then(|testrun| testrun.get("testrunId"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Link to the result in the web UI, when the testrun is known.
    pub fn url(&self, base_url: &str) -> Option<String> {
        self.testrun_id.as_ref().map(|testrun_id| {
            format!(
                "{}/testruns/{}?result={}",
                base_url.trim_end_matches('/'),
                testrun_id,
                self.id
            )
        })
    }
}

/// Outcome recorded on the result (`status` key), normalized for logging.
pub fn result_outcome(result: &Value) -> &str {
    match result.get("status").and_then(Value::as_str) {
        None | Some("") | Some("NO_RESULT") => "UNKNOWN",
        Some(status) => status,
    }
}

fn string_at(value: Option<&Value>, key: &str) -> String {
    value
        .and_then(|value| value.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
