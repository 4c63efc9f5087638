#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailexport::config::Config;
use mailexport::models::wire::RemoteErrorBody;
use mailexport::{Endpoint, ExportClient, ExportTransport, TransportFailure};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Scripted = Result<Value, TransportFailure>;

#[derive(Default)]
struct InFlight {
    current: usize,
    max: usize,
}

#[derive(Default)]
struct MockState {
    calls: Vec<(Endpoint, Value)>,
    scripts: HashMap<String, VecDeque<Scripted>>,
    in_flight: HashMap<String, InFlight>,
    allowlist: Vec<(String, Option<String>, DateTime<Utc>)>,
    account_exports: Vec<Value>,
}

/// In-process stand-in for the remote API. Responses are scripted per key; the
/// last scripted response for a key repeats. Allow-list and account export
/// listing endpoints fall back to a small simulated backend.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    latency: Duration,
}

/// Script key for an endpoint call: status queries are keyed per job.
pub fn script_key(endpoint: &Endpoint, payload: &Value) -> String {
    match endpoint {
        Endpoint::ExportInfo => info_key(payload["id"].as_str().unwrap_or_default()),
        Endpoint::AccountExport(id) => account_key(id.get()),
        other => other.to_string(),
    }
}

pub fn info_key(id: &str) -> String {
    format!("info:{id}")
}

pub fn account_key(id: u64) -> String {
    format!("account:{id}")
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn script(&self, key: impl Into<String>, responses: Vec<Scripted>) {
        let mut state = self.state.lock().unwrap();
        state.scripts.entry(key.into()).or_default().extend(responses);
    }

    pub fn respond(&self, endpoint: &Endpoint, response: Value) {
        self.script(endpoint.to_string(), vec![Ok(response)]);
    }

    pub fn seed_account_exports(&self, exports: Vec<Value>) {
        self.state.lock().unwrap().account_exports = exports;
    }

    pub fn calls(&self) -> Vec<(Endpoint, Value)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, endpoint: &Endpoint) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|(e, _)| e == endpoint).count()
    }

    pub fn calls_with_key(&self, key: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(e, p)| script_key(e, p) == key)
            .count()
    }

    pub fn max_in_flight(&self, key: &str) -> usize {
        self.state.lock().unwrap().in_flight.get(key).map(|f| f.max).unwrap_or(0)
    }

    fn begin(&self, endpoint: &Endpoint, payload: &Value, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.calls.push((endpoint.clone(), payload.clone()));
        let flight = state.in_flight.entry(key.to_string()).or_default();
        flight.current += 1;
        flight.max = flight.max.max(flight.current);
    }

    fn end(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(flight) = state.in_flight.get_mut(key) {
            flight.current -= 1;
        }
    }

    fn answer(&self, endpoint: &Endpoint, payload: &Value, key: &str) -> Scripted {
        let mut state = self.state.lock().unwrap();

        if let Some(queue) = state.scripts.get_mut(key) {
            let next = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
            if let Some(response) = next {
                return response;
            }
        }

        match endpoint {
            Endpoint::AllowListAdd => {
                let email = payload["email"].as_str().unwrap_or_default().to_string();
                let comment = payload["comment"].as_str().map(str::to_string);
                match state.allowlist.iter_mut().find(|(e, _, _)| *e == email) {
                    Some(entry) => {
                        if comment.is_some() {
                            entry.1 = comment;
                        }
                    }
                    None => state.allowlist.push((email.clone(), comment, Utc::now())),
                }
                Ok(json!({ "email": email, "added": true }))
            }
            Endpoint::AllowListDelete => {
                let email = payload["email"].as_str().unwrap_or_default().to_string();
                let before = state.allowlist.len();
                state.allowlist.retain(|(e, _, _)| *e != email);
                Ok(json!({ "email": email, "deleted": state.allowlist.len() < before }))
            }
            Endpoint::AllowListList => {
                let prefix = payload["email"].as_str().unwrap_or_default();
                let entries: Vec<Value> = state
                    .allowlist
                    .iter()
                    .filter(|(e, _, _)| e.starts_with(prefix))
                    .map(|(email, detail, created_at)| {
                        json!({
                            "email": email,
                            "detail": detail.clone().unwrap_or_default(),
                            "created_at": created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        })
                    })
                    .collect();
                Ok(Value::Array(entries))
            }
            Endpoint::ListAccountExports => {
                let count = payload["count"].as_u64().unwrap_or(10) as usize;
                let offset = payload["offset"].as_u64().unwrap_or(0) as usize;
                let page: Vec<Value> = state.account_exports.iter().skip(offset).take(count).cloned().collect();
                Ok(json!({
                    "exports": page,
                    "total_items": state.account_exports.len(),
                    "_links": [],
                }))
            }
            Endpoint::ExportList => Ok(json!([])),
            other => Err(TransportFailure::Remote(RemoteErrorBody {
                code: "Unknown_Export".to_string(),
                message: format!("nothing scripted for {other}"),
            })),
        }
    }
}

#[async_trait]
impl ExportTransport for MockTransport {
    async fn perform(&self, endpoint: Endpoint, payload: Value) -> Result<Value, TransportFailure> {
        let key = script_key(&endpoint, &payload);
        self.begin(&endpoint, &payload, &key);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let response = self.answer(&endpoint, &payload, &key);
        self.end(&key);
        response
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retry.max_attempts = 3;
    config.retry.base_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.transport.request_timeout = Duration::from_secs(5);
    config.transport.max_concurrent_requests = 8;
    config.artifact.require_https = true;
    config.allowlist.cache_enabled = false;
    config.account_exports.page_size = 100;
    config
}

pub fn client(mock: &MockTransport) -> ExportClient {
    ExportClient::new(Arc::new(mock.clone()), test_config())
}

pub fn client_with(mock: &MockTransport, config: Config) -> ExportClient {
    ExportClient::new(Arc::new(mock.clone()), config)
}

pub fn job_json(id: &str, kind: &str, state: &str) -> Value {
    json!({
        "id": id,
        "created_at": "2024-03-01 10:00:00",
        "type": kind,
        "finished_at": null,
        "state": state,
        "result_url": null,
    })
}

pub fn complete_job_json(id: &str, kind: &str, finished_at: DateTime<Utc>) -> Value {
    json!({
        "id": id,
        "created_at": (finished_at - chrono::Duration::minutes(10)).to_rfc3339(),
        "type": kind,
        "finished_at": finished_at.to_rfc3339(),
        "state": "complete",
        "result_url": format!("https://downloads.example.com/{id}.zip"),
    })
}

pub fn account_export_json(export_id: u64, finished: Option<DateTime<Utc>>) -> Value {
    json!({
        "export_id": export_id,
        "started": "2024-03-01T10:00:00+00:00",
        "finished": finished.map(|f| f.to_rfc3339()),
        "size_in_bytes": finished.map(|_| 4096),
        "download_url": finished.map(|_| format!("https://downloads.example.com/account-{export_id}.zip")),
        "_links": [],
    })
}

pub fn network_failure() -> Scripted {
    Err(TransportFailure::Network("connection reset by peer".to_string()))
}

pub fn remote_failure(code: &str, message: &str) -> Scripted {
    Err(TransportFailure::Remote(RemoteErrorBody {
        code: code.to_string(),
        message: message.to_string(),
    }))
}
