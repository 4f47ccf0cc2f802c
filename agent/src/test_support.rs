//! Test-only helpers: in-process HTTP and gRPC stubs and scripted collaborators.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Result, anyhow};
use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::Value;
use tokio::sync::oneshot;
use tonic::Status;
use tonic::server::{Grpc, UnaryService};
use tonic_prost::ProstCodec;

use crate::core::query::QueueQuery;
use crate::core::status::StatusRecord;
use crate::io::config::{AgentConfig, SlickConfig};
use crate::io::grpc::{
    AgentStatusUpdate, ApiTokenLoginRequest, Empty, LOGIN_PATH, LoginResponse,
    UPDATE_STATUS_PATH,
};
use crate::io::queue::Queue;
use crate::io::reporter::ReportStatus;

/// Canned response served by [`StubServer`].
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub body: String,
}

impl StubResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn json(value: &Value) -> Self {
        Self::ok(value.to_string())
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }
}

/// Request observed by [`StubServer`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

#[derive(Default)]
struct StubState {
    responses: VecDeque<StubResponse>,
    requests: Vec<RecordedRequest>,
}

type Shared = Arc<Mutex<StubState>>;

/// An axum app served from a background thread on a loopback port; stops on drop.
struct ServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    fn spawn(app: Router) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind stub listener");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let addr = listener.local_addr().expect("stub addr");
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .expect("stub runtime");
            runtime.block_on(async move {
                let listener =
                    tokio::net::TcpListener::from_std(listener).expect("tokio listener");
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.await;
                    })
                    .await
                    .expect("stub server");
            });
        });

        Self {
            addr,
            shutdown: Some(shutdown),
            thread: Some(thread),
        }
    }

    fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// HTTP server on a loopback port that answers every request with the next
/// scripted response. The last response repeats once the script runs out; an
/// empty script answers 404.
pub struct StubServer {
    server: ServerHandle,
    state: Shared,
}

impl StubServer {
    pub fn start(responses: Vec<StubResponse>) -> Self {
        let state: Shared = Arc::new(Mutex::new(StubState {
            responses: responses.into(),
            requests: Vec::new(),
        }));
        let app = Router::new().fallback(handle).with_state(state.clone());
        Self {
            server: ServerHandle::spawn(app),
            state,
        }
    }

    pub fn base_url(&self) -> String {
        self.server.base_url()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().expect("stub state").requests.clone()
    }
}

async fn handle(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let mut state = state.lock().expect("stub state");
    state.requests.push(RecordedRequest {
        method: method.to_string(),
        path: uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string()),
        headers: headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect(),
        body,
    });
    let response = if state.responses.len() > 1 {
        state.responses.pop_front()
    } else {
        state.responses.front().cloned()
    };
    match response {
        Some(response) => (
            StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            response.body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Default)]
struct GrpcStubState {
    logins: Vec<String>,
    updates: Vec<(String, AgentStatusUpdate)>,
    fail_updates: bool,
}

type GrpcShared = Arc<Mutex<GrpcStubState>>;

/// In-process slick status service speaking gRPC over cleartext HTTP/2.
/// Logins always succeed and hand out `jwt-1`, `jwt-2`, ...; updates are
/// recorded with their `authorization` metadata.
pub struct GrpcStub {
    server: ServerHandle,
    state: GrpcShared,
}

impl GrpcStub {
    pub fn start() -> Self {
        Self::with_state(GrpcStubState::default())
    }

    /// Stub whose updates are recorded and then answered with `UNAVAILABLE`.
    pub fn failing() -> Self {
        Self::with_state(GrpcStubState {
            fail_updates: true,
            ..GrpcStubState::default()
        })
    }

    fn with_state(state: GrpcStubState) -> Self {
        let state: GrpcShared = Arc::new(Mutex::new(state));
        let app = Router::new()
            .route(LOGIN_PATH, post(grpc_login))
            .route(UPDATE_STATUS_PATH, post(grpc_update_status))
            .with_state(state.clone());
        Self {
            server: ServerHandle::spawn(app),
            state,
        }
    }

    pub fn base_url(&self) -> String {
        self.server.base_url()
    }

    /// API tokens presented to the login call, in order.
    pub fn logins(&self) -> Vec<String> {
        self.state.lock().expect("grpc stub state").logins.clone()
    }

    pub fn updates(&self) -> Vec<(String, AgentStatusUpdate)> {
        self.state.lock().expect("grpc stub state").updates.clone()
    }
}

struct LoginHandler(GrpcShared);

impl UnaryService<ApiTokenLoginRequest> for LoginHandler {
    type Response = LoginResponse;
    type Future = std::future::Ready<Result<tonic::Response<LoginResponse>, Status>>;

    fn call(&mut self, request: tonic::Request<ApiTokenLoginRequest>) -> Self::Future {
        let mut state = self.0.lock().expect("grpc stub state");
        state.logins.push(request.into_inner().token);
        let token = format!("jwt-{}", state.logins.len());
        std::future::ready(Ok(tonic::Response::new(LoginResponse { token })))
    }
}

struct UpdateStatusHandler(GrpcShared);

impl UnaryService<AgentStatusUpdate> for UpdateStatusHandler {
    type Response = Empty;
    type Future = std::future::Ready<Result<tonic::Response<Empty>, Status>>;

    fn call(&mut self, request: tonic::Request<AgentStatusUpdate>) -> Self::Future {
        let authorization = request
            .metadata()
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let mut state = self.0.lock().expect("grpc stub state");
        state.updates.push((authorization, request.into_inner()));
        if state.fail_updates {
            return std::future::ready(Err(Status::unavailable("scripted failure")));
        }
        std::future::ready(Ok(tonic::Response::new(Empty {})))
    }
}

async fn grpc_login(State(state): State<GrpcShared>, request: Request) -> Response {
    let mut grpc = Grpc::new(ProstCodec::<LoginResponse, ApiTokenLoginRequest>::default());
    grpc.unary(LoginHandler(state), request)
        .await
        .map(axum::body::Body::new)
}

async fn grpc_update_status(State(state): State<GrpcShared>, request: Request) -> Response {
    let mut grpc = Grpc::new(ProstCodec::<Empty, AgentStatusUpdate>::default());
    grpc.unary(UpdateStatusHandler(state), request)
        .await
        .map(axum::body::Body::new)
}

/// Queue that hands out scripted results in order and records every query.
#[derive(Default)]
pub struct ScriptedQueue {
    results: Mutex<VecDeque<Option<Value>>>,
    queries: Mutex<Vec<QueueQuery>>,
}

impl ScriptedQueue {
    pub fn new(results: Vec<Option<Value>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<QueueQuery> {
        self.queries.lock().expect("queries").clone()
    }
}

impl Queue for ScriptedQueue {
    fn request(&self, _slick: &SlickConfig, query: &QueueQuery) -> Option<Value> {
        self.queries.lock().expect("queries").push(query.clone());
        self.results.lock().expect("results").pop_front().flatten()
    }
}

/// Reporter that records every status it is asked to push.
#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<StatusRecord>>,
    fail: bool,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reporter whose every push fails after being recorded.
    pub fn failing() -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn reports(&self) -> Vec<StatusRecord> {
        self.reports.lock().expect("reports").clone()
    }
}

impl ReportStatus for RecordingReporter {
    fn report_status(&self, _config: &AgentConfig, status: &StatusRecord) -> Result<()> {
        self.reports.lock().expect("reports").push(status.clone());
        if self.fail {
            return Err(anyhow!("scripted report failure"));
        }
        Ok(())
    }
}

/// Write `contents` as `agent.yml` inside `dir` and return its path as a string.
pub fn write_config(dir: &std::path::Path, contents: &str) -> String {
    let path = dir.join("agent.yml");
    std::fs::write(&path, contents).expect("write config");
    path.to_string_lossy().into_owned()
}
