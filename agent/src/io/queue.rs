//! Client for the remote result queue.

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::query::{QueueQuery, queue_queries};
use crate::core::status::{ProjectReleaseBuild, StatusRecord};
use crate::io::config::SlickConfig;

/// Source of test results to run.
pub trait Queue {
    /// Ask for one result matching `query`. `None` means nothing to run or an error.
    fn request(&self, slick: &SlickConfig, query: &QueueQuery) -> Option<Value>;
}

/// Queue backed by `POST <base-url>/api/results/queue/<agent-name>`.
#[derive(Debug, Clone, Default)]
pub struct HttpQueue {
    http: Client,
}

impl HttpQueue {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

/// Queue endpoint for `slick`.
pub fn queue_url(slick: &SlickConfig) -> String {
    format!(
        "{}/api/results/queue/{}",
        slick.base_url.trim_end_matches('/'),
        slick.agent_name
    )
}

impl Queue for HttpQueue {
    fn request(&self, slick: &SlickConfig, query: &QueueQuery) -> Option<Value> {
        let url = queue_url(slick);
        debug!(%url, ?query, "requesting result from queue");
        let response = match self.http.post(&url).json(query).send() {
            Ok(response) => response,
            Err(err) => {
                warn!(%url, "queue request failed: {err}");
                return None;
            }
        };
        let status = response.status();
        if status != StatusCode::OK {
            debug!(%url, status = status.as_u16(), "queue returned no result");
            return None;
        }
        match response.json::<Value>() {
            Ok(result) => Some(result),
            Err(err) => {
                warn!(%url, "queue response was not json: {err}");
                None
            }
        }
    }
}

/// Ask the queue once per project (or once when there are none) and return
/// the first result.
pub fn request_next<Q: Queue + ?Sized>(
    queue: &Q,
    slick: &SlickConfig,
    status: &StatusRecord,
    projects: &[ProjectReleaseBuild],
) -> Option<Value> {
    for query in queue_queries(status, projects) {
        if let Some(result) = queue.request(slick, &query) {
            info!(project = ?query.get("project"), "got result from queue");
            return Some(result);
        }
    }
    None
}
