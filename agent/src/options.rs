//! Program options the agent core consumes.

use std::sync::LazyLock;

use regex::Regex;

use crate::io::process::Shell;

static GROUP_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(",[ ]?").expect("group separator regex"));

/// Startup options, independent of how they were collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOptions {
    /// Configuration file path or HTTP(S) URL.
    pub config_location: String,
    /// Groups copied into every fresh status.
    pub groups: Vec<String>,
    pub shell: Shell,
    pub debug: bool,
}

/// Split a comma separated group list; a single space after a comma is allowed.
pub fn parse_groups(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    GROUP_SEPARATOR.split(raw).map(str::to_string).collect()
}
