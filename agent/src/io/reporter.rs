//! Authenticated status reporting to the coordination service.
//!
//! A [`StatusReporter`] owns one live [`RpcClient`]: a transport plus the
//! bearer-token cache tied to it. Tokens are obtained by exchanging the static
//! API token through a login call and are reused until they expire. When an
//! update fails the reporter closes the client and swaps in a freshly
//! connected one, keeping the old handle if reconnecting fails.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::status::{ProjectReleaseBuild, StatusRecord};
use crate::core::test_info::TestInfo;
use crate::io::config::AgentConfig;
use crate::io::grpc::{
    AgentCurrentTest, AgentId, AgentStatus, AgentStatusUpdate, ProjectReleaseBuildInfo,
};

/// How long a bearer token is trusted after login.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(10 * 60);

/// Pushes the agent status somewhere outside the process.
pub trait ReportStatus {
    fn report_status(&self, config: &AgentConfig, status: &StatusRecord) -> Result<()>;
}

/// Raw calls against the status service.
pub trait RpcTransport {
    /// Exchange the static API token for a bearer token.
    fn login(&self, api_token: &str) -> Result<String>;
    /// Send one status update with the given `authorization` metadata value.
    fn update_status(&self, authorization: &str, update: &AgentStatusUpdate) -> Result<()>;
    fn close(&self) {}
}

/// Creates transports bound to one endpoint.
pub trait Connect {
    type Transport: RpcTransport;
    fn connect(&self) -> Result<Self::Transport>;
}

impl AgentCurrentTest {
    /// Summarize the fetched result; the url stays empty when the testrun is unknown.
    pub fn from_result(result: Option<&serde_json::Value>, base_url: &str) -> Self {
        let Some(result) = result else {
            return Self::default();
        };
        let info = TestInfo::from_result(result);
        Self {
            url: info.url(base_url).unwrap_or_default(),
            name: info.name,
            automation_id: info.automation_id,
        }
    }
}

impl From<&ProjectReleaseBuild> for ProjectReleaseBuildInfo {
    fn from(project: &ProjectReleaseBuild) -> Self {
        Self {
            project: project.name.clone(),
            release: project.release.clone(),
            build: project.build.clone(),
        }
    }
}

impl AgentStatusUpdate {
    /// The current test is always present, empty while idle.
    pub fn from_status(config: &AgentConfig, status: &StatusRecord) -> Self {
        Self {
            id: Some(AgentId {
                company: config.company.clone(),
                name: status.agent_name.clone(),
            }),
            status: Some(AgentStatus {
                projects: status.projects.iter().map(Into::into).collect(),
                run_status: status.run_status.as_str().to_string(),
                current_test: Some(AgentCurrentTest::from_result(
                    status.result_to_run.as_ref(),
                    &config.slick.base_url,
                )),
            }),
        }
    }
}

#[derive(Debug, Clone)]
struct AuthToken {
    token: String,
    expires_at: Instant,
}

/// Cached bearer token, refreshed through [`RpcTransport::login`] when absent
/// or expired. Check and refresh happen under one lock, so concurrent callers
/// never log in twice for the same expiry.
#[derive(Debug)]
pub struct TokenAuth {
    api_token: String,
    token: Mutex<Option<AuthToken>>,
}

impl TokenAuth {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            token: Mutex::new(None),
        }
    }

    /// `Authorization` header value valid at `now`.
    pub fn credential_at<T: RpcTransport + ?Sized>(
        &self,
        transport: &T,
        now: Instant,
    ) -> Result<String> {
        let mut cached = self
            .token
            .lock()
            .map_err(|_| anyhow!("token cache lock poisoned"))?;
        let stale = cached.as_ref().is_none_or(|token| now > token.expires_at);
        if stale {
            debug!("bearer token missing or expired, logging in");
            let token = transport.login(&self.api_token).context("login with api token")?;
            info!("obtained new bearer token");
            *cached = Some(AuthToken {
                token,
                expires_at: now + TOKEN_LIFETIME,
            });
        }
        match cached.as_ref() {
            Some(token) => Ok(format!("Bearer {}", token.token)),
            None => Err(anyhow!("no bearer token available")),
        }
    }
}

/// One connection to the status service with its own token cache.
#[derive(Debug)]
pub struct RpcClient<T> {
    transport: T,
    auth: TokenAuth,
}

impl<T: RpcTransport> RpcClient<T> {
    pub fn new(transport: T, api_token: impl Into<String>) -> Self {
        Self {
            transport,
            auth: TokenAuth::new(api_token),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn update_status(&self, update: &AgentStatusUpdate) -> Result<()> {
        let authorization = self.auth.credential_at(&self.transport, Instant::now())?;
        self.transport.update_status(&authorization, update)
    }

    pub fn close(&self) {
        self.transport.close();
    }
}

/// Reports status through a live client and reconnects after failures.
pub struct StatusReporter<C: Connect> {
    connector: C,
    api_token: String,
    client: Mutex<RpcClient<C::Transport>>,
}

impl<C: Connect> StatusReporter<C> {
    /// Connect once up front; the caller decides what a failure here means.
    pub fn connect(connector: C, api_token: impl Into<String>) -> Result<Self> {
        let api_token = api_token.into();
        let transport = connector.connect().context("connect to status service")?;
        Ok(Self {
            client: Mutex::new(RpcClient::new(transport, api_token.clone())),
            connector,
            api_token,
        })
    }

    /// Run `f` against the live client.
    pub fn with_client<R>(&self, f: impl FnOnce(&RpcClient<C::Transport>) -> R) -> Result<R> {
        let client = self
            .client
            .lock()
            .map_err(|_| anyhow!("status client lock poisoned"))?;
        Ok(f(&client))
    }
}

impl<C: Connect> ReportStatus for StatusReporter<C> {
    #[instrument(skip_all, fields(agent = %status.agent_name))]
    fn report_status(&self, config: &AgentConfig, status: &StatusRecord) -> Result<()> {
        let update = AgentStatusUpdate::from_status(config, status);
        debug!(?update, "sending status update");
        let mut client = self
            .client
            .lock()
            .map_err(|_| anyhow!("status client lock poisoned"))?;
        let Err(err) = client.update_status(&update) else {
            return Ok(());
        };

        client.close();
        info!("trying to reconnect to status service");
        match self.connector.connect() {
            Ok(transport) => *client = RpcClient::new(transport, self.api_token.clone()),
            Err(reconnect_err) => {
                warn!("error reconnecting to status service: {reconnect_err:#}");
            }
        }
        Err(err.context("update agent status"))
    }
}
