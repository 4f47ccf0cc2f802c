//! gRPC transport to the slick status service.
//!
//! The `slickqa` messages are declared by hand with `prost` derives; field
//! tags follow the declaration order of the service schema. Calls go through
//! tonic's generic unary client, so no protoc step is involved. The transport
//! is synchronous: each one owns a single-threaded runtime that drives its
//! channel for the duration of a call.

use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tokio::runtime::Runtime;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Status};
use tonic_prost::ProstCodec;
use tracing::{debug, info};

use crate::io::reporter::{Connect, RpcTransport};

pub const LOGIN_PATH: &str = "/slickqa.Auth/LoginWithToken";
pub const UPDATE_STATUS_PATH: &str = "/slickqa.Agents/UpdateStatus";

#[derive(Clone, PartialEq, prost::Message)]
pub struct ApiTokenLoginRequest {
    #[prost(string, tag = "1")]
    pub token: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoginResponse {
    #[prost(string, tag = "1")]
    pub token: String,
}

/// Identity the status is reported under.
#[derive(Clone, PartialEq, prost::Message)]
pub struct AgentId {
    #[prost(string, tag = "1")]
    pub company: String,
    #[prost(string, tag = "2")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProjectReleaseBuildInfo {
    #[prost(string, tag = "1")]
    pub project: String,
    #[prost(string, tag = "2")]
    pub release: String,
    #[prost(string, tag = "3")]
    pub build: String,
}

/// Test the agent is currently busy with; all fields empty when idle.
#[derive(Clone, PartialEq, prost::Message)]
pub struct AgentCurrentTest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub automation_id: String,
    #[prost(string, tag = "3")]
    pub url: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AgentStatus {
    #[prost(message, repeated, tag = "1")]
    pub projects: Vec<ProjectReleaseBuildInfo>,
    #[prost(string, tag = "2")]
    pub run_status: String,
    #[prost(message, optional, tag = "3")]
    pub current_test: Option<AgentCurrentTest>,
}

/// Body of the update-status call.
#[derive(Clone, PartialEq, prost::Message)]
pub struct AgentStatusUpdate {
    #[prost(message, optional, tag = "1")]
    pub id: Option<AgentId>,
    #[prost(message, optional, tag = "2")]
    pub status: Option<AgentStatus>,
}

/// Reply with no fields; anything the server sends is skipped.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Empty {}

/// One channel to the status service.
#[derive(Debug)]
pub struct GrpcTransport {
    runtime: Runtime,
    address: String,
    channel: Mutex<Option<Channel>>,
}

impl GrpcTransport {
    fn channel(&self) -> Result<Channel> {
        let channel = self
            .channel
            .lock()
            .map_err(|_| anyhow!("grpc channel lock poisoned"))?;
        channel
            .clone()
            .ok_or_else(|| anyhow!("connection to {} is closed", self.address))
    }

    fn unary<Req, Resp>(&self, path: &'static str, request: Request<Req>) -> Result<Resp>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let channel = self.channel()?;
        let response = self
            .runtime
            .block_on(call_unary::<Req, Resp>(channel, path, request))
            .with_context(|| format!("call {path} on {}", self.address))?;
        Ok(response.into_inner())
    }
}

async fn call_unary<Req, Resp>(
    channel: Channel,
    path: &'static str,
    request: Request<Req>,
) -> Result<tonic::Response<Resp>, Status>
where
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready()
        .await
        .map_err(|err| Status::unavailable(format!("service not ready: {err}")))?;
    let codec = ProstCodec::<Req, Resp>::default();
    grpc.unary(request, PathAndQuery::from_static(path), codec)
        .await
}

impl RpcTransport for GrpcTransport {
    fn login(&self, api_token: &str) -> Result<String> {
        let request = Request::new(ApiTokenLoginRequest {
            token: api_token.to_string(),
        });
        let response: LoginResponse = self.unary(LOGIN_PATH, request)?;
        Ok(response.token)
    }

    fn update_status(&self, authorization: &str, update: &AgentStatusUpdate) -> Result<()> {
        let value: MetadataValue<Ascii> = authorization
            .parse()
            .context("authorization is not valid metadata")?;
        let mut request = Request::new(update.clone());
        request.metadata_mut().insert("authorization", value);
        let _: Empty = self.unary(UPDATE_STATUS_PATH, request)?;
        Ok(())
    }

    fn close(&self) {
        debug!(address = %self.address, "closing status service channel");
        if let Ok(mut channel) = self.channel.lock() {
            channel.take();
        }
    }
}

/// Connects [`GrpcTransport`]s to `grpc-url`. A bare `host:port` means https.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    address: String,
}

impl GrpcConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    fn normalized_address(&self) -> Result<String> {
        let raw = self.address.trim().trim_end_matches('/');
        if raw.is_empty() {
            return Err(anyhow!("status service address is empty"));
        }
        let address = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{raw}")
        };
        let url = reqwest::Url::parse(&address)
            .with_context(|| format!("invalid status service address {address:?}"))?;
        match url.scheme() {
            "http" | "https" => Ok(address),
            scheme => Err(anyhow!("unsupported scheme {scheme:?} in {address:?}")),
        }
    }
}

impl Connect for GrpcConnector {
    type Transport = GrpcTransport;

    fn connect(&self) -> Result<GrpcTransport> {
        let address = self.normalized_address()?;
        info!(%address, "connecting to status service");
        let mut endpoint = Endpoint::from_shared(address.clone())
            .with_context(|| format!("invalid status service address {address:?}"))?;
        if address.starts_with("https://") {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_webpki_roots())
                .context("configure tls for status service")?;
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build status service runtime")?;
        // The channel spawns its worker onto whichever runtime is entered.
        let channel = {
            let _guard = runtime.enter();
            endpoint.connect_lazy()
        };
        Ok(GrpcTransport {
            runtime,
            address,
            channel: Mutex::new(Some(channel)),
        })
    }
}
