//! Agent pipeline configuration (YAML, local file or HTTP URL).
//!
//! The [`ConfigStore`] owns the active configuration and its parsed view and
//! replaces both wholesale on a successful reload. A failed reload keeps the
//! previous pair; only the first load at startup is fatal.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::phase::Phase;
use crate::core::schedule::{
    DEFAULT_AFTER_TEST_SLEEP, DEFAULT_NO_TEST_SLEEP, DEFAULT_RELOAD_INTERVAL, parse_duration,
    should_reload,
};
use crate::core::stage::Stage;
use crate::core::status::ProjectReleaseBuild;

/// Declarative pipeline: phase lists per stage plus remote endpoints and timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct AgentConfig {
    /// Organization the agent reports under.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub company: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<ProjectReleaseBuild>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub loop_start: Vec<Phase>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub check_for_action: Vec<Phase>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub test_attribute_discovery: Vec<Phase>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub discovery: Vec<Phase>,
    #[serde(
        rename = "broke-discovery",
        alias = "broken-discovery",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub broken_discovery: Vec<Phase>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub get_status: Vec<Phase>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub update_status: Vec<Phase>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub run_test: Vec<Phase>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub no_test: Vec<Phase>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleanup: Vec<Phase>,
    /// Ad hoc actions selected by name through `status.action`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub action_map: BTreeMap<String, Phase>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub before_get_test: Vec<Phase>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub get_test: Vec<Phase>,
    pub slick: SlickConfig,
    pub check_for_configuration_every: String,
    pub sleep: SleepConfig,
}

/// Remote coordination service endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct SlickConfig {
    /// Base URL of the web API (queue requests, result links).
    pub base_url: String,
    /// Address of the status RPC service. Empty disables reporting.
    pub grpc_url: String,
    /// Defaults to the hostname when empty.
    pub agent_name: String,
    /// Static secret exchanged for a bearer token.
    #[serde(skip_serializing)]
    pub api_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct SleepConfig {
    pub after_test: String,
    pub no_test: String,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            after_test: "500ms".to_string(),
            no_test: "2s".to_string(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            company: String::new(),
            projects: Vec::new(),
            loop_start: Vec::new(),
            check_for_action: Vec::new(),
            test_attribute_discovery: Vec::new(),
            discovery: Vec::new(),
            broken_discovery: Vec::new(),
            get_status: Vec::new(),
            update_status: Vec::new(),
            run_test: Vec::new(),
            no_test: Vec::new(),
            cleanup: Vec::new(),
            action_map: BTreeMap::new(),
            before_get_test: Vec::new(),
            get_test: Vec::new(),
            slick: SlickConfig::default(),
            check_for_configuration_every: "5s".to_string(),
            sleep: SleepConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Phase list configured for `stage`.
    pub fn phases(&self, stage: Stage) -> &[Phase] {
        match stage {
            Stage::LoopStart => &self.loop_start,
            Stage::CheckForAction => &self.check_for_action,
            Stage::TestAttributeDiscovery => &self.test_attribute_discovery,
            Stage::Discovery => &self.discovery,
            Stage::BrokenDiscovery => &self.broken_discovery,
            Stage::GetStatus => &self.get_status,
            Stage::UpdateStatus => &self.update_status,
            Stage::BeforeGetTest => &self.before_get_test,
            Stage::GetTest => &self.get_test,
            Stage::RunTest => &self.run_test,
            Stage::NoTest => &self.no_test,
            Stage::Cleanup => &self.cleanup,
        }
    }

    /// Parse the YAML configuration schema.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let mut config: AgentConfig =
            serde_yaml::from_str(contents).context("parse configuration yaml")?;
        if config.slick.agent_name.is_empty() {
            config.slick.agent_name = gethostname::gethostname().to_string_lossy().into_owned();
        }
        Ok(config)
    }
}

/// Durations derived from the configuration strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedConfig {
    pub reload_interval: Duration,
    pub after_test_sleep: Duration,
    pub no_test_sleep: Duration,
}

impl Default for ParsedConfig {
    fn default() -> Self {
        Self {
            reload_interval: DEFAULT_RELOAD_INTERVAL,
            after_test_sleep: DEFAULT_AFTER_TEST_SLEEP,
            no_test_sleep: DEFAULT_NO_TEST_SLEEP,
        }
    }
}

impl ParsedConfig {
    /// Parse each duration independently; a bad field falls back to its own default.
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            reload_interval: duration_or_default(
                "check-for-configuration-every",
                &config.check_for_configuration_every,
                DEFAULT_RELOAD_INTERVAL,
            ),
            after_test_sleep: duration_or_default(
                "sleep.after-test",
                &config.sleep.after_test,
                DEFAULT_AFTER_TEST_SLEEP,
            ),
            no_test_sleep: duration_or_default(
                "sleep.no-test",
                &config.sleep.no_test,
                DEFAULT_NO_TEST_SLEEP,
            ),
        }
    }
}

fn duration_or_default(field: &str, raw: &str, default: Duration) -> Duration {
    match parse_duration(raw) {
        Ok(duration) => duration,
        Err(err) => {
            warn!(field, default = ?default, "{err}, using default");
            default
        }
    }
}

/// Where the configuration is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLocation {
    Url(String),
    File(PathBuf),
}

impl ConfigLocation {
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            ConfigLocation::Url(raw.to_string())
        } else {
            ConfigLocation::File(PathBuf::from(raw))
        }
    }
}

impl std::fmt::Display for ConfigLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLocation::Url(url) => f.write_str(url),
            ConfigLocation::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Fetch and parse the configuration from `location`.
#[instrument(skip_all, fields(location = %location))]
pub fn load_config(
    location: &ConfigLocation,
    http: &Client,
) -> Result<(AgentConfig, ParsedConfig)> {
    let contents = match location {
        ConfigLocation::Url(url) => fetch_config(url, http)?,
        ConfigLocation::File(path) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
    };
    let config = AgentConfig::from_yaml(&contents).with_context(|| format!("parse {location}"))?;
    let parsed = ParsedConfig::from_config(&config);
    debug!(?parsed, "configuration loaded");
    Ok((config, parsed))
}

fn fetch_config(url: &str, http: &Client) -> Result<String> {
    debug!(url, "fetching configuration");
    let response = http.get(url).send().with_context(|| format!("GET {url}"))?;
    if response.status() != StatusCode::OK {
        return Err(anyhow!(
            "GET {url} returned status {}",
            response.status().as_u16()
        ));
    }
    response
        .text()
        .with_context(|| format!("read body of {url}"))
}

/// Owner of the active configuration with fail-open reloads.
#[derive(Debug)]
pub struct ConfigStore {
    location: ConfigLocation,
    http: Client,
    config: AgentConfig,
    parsed: ParsedConfig,
    last_check: Instant,
}

impl ConfigStore {
    /// Perform the initial load. Failure here is fatal to the caller.
    pub fn open(location: &str) -> Result<Self> {
        let http = Client::builder().build().context("build http client")?;
        Self::open_with_client(ConfigLocation::parse(location), http)
    }

    pub fn open_with_client(location: ConfigLocation, http: Client) -> Result<Self> {
        let (config, parsed) = load_config(&location, &http)
            .with_context(|| format!("load configuration from {location}"))?;
        Ok(Self {
            location,
            http,
            config,
            parsed,
            last_check: Instant::now(),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn parsed(&self) -> &ParsedConfig {
        &self.parsed
    }

    pub fn location(&self) -> &ConfigLocation {
        &self.location
    }

    pub fn last_check(&self) -> Instant {
        self.last_check
    }

    /// Reload if the interval elapsed. Returns whether a reload was attempted.
    pub fn maybe_reload(&mut self, now: Instant) -> bool {
        debug!(
            since_last_check = ?now.saturating_duration_since(self.last_check),
            "checking whether configuration is due for reload"
        );
        if !should_reload(now, self.last_check, self.parsed.reload_interval) {
            return false;
        }
        if let Err(err) = self.reload(now) {
            warn!(
                location = %self.location,
                "error loading configuration, using old configuration: {err:#}"
            );
        }
        true
    }

    /// Reload now. On error the previous configuration is kept; the check
    /// timestamp moves forward either way.
    pub fn reload(&mut self, now: Instant) -> Result<()> {
        self.last_check = now;
        let (config, parsed) = load_config(&self.location, &self.http)?;
        if config != self.config {
            info!(location = %self.location, "configuration changed");
        }
        self.config = config;
        self.parsed = parsed;
        Ok(())
    }
}
