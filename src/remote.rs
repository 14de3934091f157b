/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The remote client: a stateless-ish wrapper issuing change-fetch,
//! batch-write and server-settings requests, and tracking server-imposed
//! backoff/deprecation via a shared listener.

use crate::clean::clean;
use crate::config::{ClientConfig, Endpoints};
use crate::error::{Error, Result};
use crate::events::{Deprecation, EventListener, NoopListener};
use crate::http::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
use crate::record::{Record, Status};
use crate::result::{Conflict, ConflictType, SyncError};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

const HEADER_BACKOFF: &str = "Backoff";
const HEADER_ALERT: &str = "Alert";
const HEADER_ETAG: &str = "ETag";
const HEADER_IF_NONE_MATCH: &str = "If-None-Match";
const HEADER_IF_MATCH: &str = "If-Match";

/// Server settings, as returned by `GET /vN/`. Kept as a raw JSON map since
/// the core only ever needs `cliquet.batch_max_requests` out of it, and new
/// settings keys must not require a core change to tolerate.
#[derive(Debug, Clone, Default)]
pub struct ServerSettings(Map<String, Value>);

impl ServerSettings {
    pub fn batch_max_requests(&self) -> Option<usize> {
        self.0.get("cliquet.batch_max_requests")?.as_u64().map(|n| n as usize)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChangesResponse {
    pub last_modified: i64,
    pub changes: Vec<Record>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub errors: Vec<SyncError>,
    pub published: Vec<Record>,
    pub conflicts: Vec<Conflict>,
    pub skipped: Vec<Record>,
}

impl BatchResult {
    fn extend(&mut self, other: BatchResult) {
        self.errors.extend(other.errors);
        self.published.extend(other.published);
        self.conflicts.extend(other.conflicts);
        self.skipped.extend(other.skipped);
    }
}

#[derive(Default)]
struct ClientState {
    settings: Option<ServerSettings>,
    backoff_release_ms: i64,
}

pub struct RemoteClient {
    transport: Arc<dyn HttpTransport>,
    endpoints: Endpoints,
    listener: Arc<dyn EventListener>,
    state: Mutex<ClientState>,
}

impl RemoteClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(ReqwestTransport::new()))
    }

    pub fn with_transport(config: &ClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            endpoints: config.endpoints(),
            listener: Arc::new(NoopListener),
            state: Mutex::new(ClientState::default()),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Milliseconds remaining in the current server-imposed backoff window;
    /// 0 if none is active or it has already elapsed.
    pub fn backoff(&self) -> i64 {
        let release = self.state.lock().backoff_release_ms;
        (release - now_ms()).max(0)
    }

    /// Caches the first successful result for the lifetime of the client.
    pub async fn fetch_server_settings(&self) -> Result<ServerSettings> {
        if let Some(settings) = self.state.lock().settings.clone() {
            return Ok(settings);
        }
        let url = Url::parse(&self.endpoints.root(true))?;
        let resp = self
            .transport
            .execute(HttpRequest::new(Method::Get, url))
            .await?;
        self.observe_response(&resp);
        if !resp.is_success() {
            return Err(Error::Http {
                status: resp.status,
                body: resp.text(),
            });
        }
        let body: Value = resp.json()?;
        let settings = ServerSettings(
            body.get("settings")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        );
        self.state.lock().settings = Some(settings.clone());
        Ok(settings)
    }

    pub async fn fetch_changes_since(
        &self,
        bucket: &str,
        collection: &str,
        last_modified: Option<i64>,
        headers: &HashMap<String, String>,
    ) -> Result<ChangesResponse> {
        let mut url = Url::parse(&self.endpoints.records(bucket, collection, true))?;
        if let Some(ts) = last_modified {
            url.query_pairs_mut().append_pair("_since", &ts.to_string());
        }
        let mut req = HttpRequest::new(Method::Get, url);
        for (k, v) in headers {
            req = req.with_header(k, v);
        }
        if let Some(ts) = last_modified {
            req = req.with_header(HEADER_IF_NONE_MATCH, format!("\"{ts}\""));
        }
        let resp = self.transport.execute(req).await?;
        self.observe_response(&resp);

        if resp.status == 304 {
            return Ok(ChangesResponse {
                last_modified: last_modified.unwrap_or(0),
                changes: Vec::new(),
            });
        }
        if !resp.is_success() {
            return Err(Error::Http {
                status: resp.status,
                body: resp.text(),
            });
        }
        let new_last_modified = parse_etag(resp.header(HEADER_ETAG)).unwrap_or_else(|| last_modified.unwrap_or(0));
        let body: Value = resp.json()?;
        let changes = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Protocol("missing `data` array in change feed response".into()))?
            .iter()
            .map(|v| {
                v.as_object()
                    .cloned()
                    .map(Record)
                    .ok_or_else(|| Error::Protocol("change feed entry is not an object".into()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ChangesResponse {
            last_modified: new_last_modified,
            changes,
        })
    }

    /// Issue one or more batch requests to publish `records`. Chunked
    /// according to the server's advertised `cliquet.batch_max_requests`.
    pub async fn batch(
        &self,
        bucket: &str,
        collection: &str,
        records: &[Record],
        safe: bool,
        headers: &HashMap<String, String>,
    ) -> Result<BatchResult> {
        if records.is_empty() {
            return Ok(BatchResult::default());
        }

        let limit = self.fetch_server_settings().await?.batch_max_requests();
        if let Some(limit) = limit {
            if limit > 0 && records.len() > limit {
                let mut combined = BatchResult::default();
                for chunk in records.chunks(limit) {
                    combined.extend(
                        Box::pin(self.batch(bucket, collection, chunk, safe, headers)).await?,
                    );
                }
                return Ok(combined);
            }
        }

        let requests: Vec<Value> = records
            .iter()
            .map(|record| self.subrequest(bucket, collection, record, safe))
            .collect();
        let body = json!({
            "defaults": { "headers": headers },
            "requests": requests,
        });
        let url = Url::parse(&self.endpoints.batch(true))?;
        let req = HttpRequest::new(Method::Post, url).with_json_body(body);
        let resp = self.transport.execute(req).await?;
        self.observe_response(&resp);
        if !resp.is_success() {
            return Err(Error::Http {
                status: resp.status,
                body: resp.text(),
            });
        }
        let body: Value = resp.json()?;
        let responses = body
            .get("responses")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Protocol("missing `responses` array in batch response".into()))?;

        let mut result = BatchResult::default();
        for (record, response) in records.iter().zip(responses.iter()) {
            let status = response.get("status").and_then(Value::as_u64).unwrap_or(0) as u16;
            let path = response
                .get("path")
                .and_then(Value::as_str)
                .map(str::to_string);
            let response_body = response.get("body").cloned().unwrap_or(Value::Null);
            match status {
                200..=399 => {
                    if let Some(data) = response_body.get("data").and_then(Value::as_object) {
                        result.published.push(Record(data.clone()));
                    }
                }
                404 => {
                    if let Some(obj) = response_body.as_object() {
                        result.skipped.push(Record(obj.clone()));
                    }
                }
                412 => {
                    let remote = response_body
                        .get("details")
                        .and_then(|d| d.get("existing"))
                        .and_then(Value::as_object)
                        .cloned()
                        .map(Record);
                    result.conflicts.push(Conflict {
                        kind: ConflictType::Outgoing,
                        local: record.clone(),
                        remote,
                    });
                }
                _ => result.errors.push(SyncError {
                    path,
                    sent: Some(record.clone()),
                    status,
                    error: response_body,
                }),
            }
        }
        Ok(result)
    }

    fn subrequest(&self, bucket: &str, collection: &str, record: &Record, safe: bool) -> Value {
        let id = record.id().unwrap_or_default();
        let path = self.endpoints.record(bucket, collection, id, false);
        let mut headers = Map::new();
        if safe {
            if let Some(last_modified) = record.last_modified() {
                headers.insert(
                    HEADER_IF_MATCH.to_string(),
                    json!(format!("\"{last_modified}\"")),
                );
            } else {
                headers.insert(HEADER_IF_NONE_MATCH.to_string(), json!("*"));
            }
        }
        if record.status() == Some(Status::Deleted) {
            json!({
                "method": "DELETE",
                "path": path,
                "headers": headers,
            })
        } else {
            json!({
                "method": "PUT",
                "path": path,
                "headers": headers,
                "body": { "data": clean(record) },
            })
        }
    }

    /// Inspect backoff/deprecation headers on every response.
    fn observe_response(&self, response: &HttpResponse) {
        if let Some(raw) = response.header(HEADER_BACKOFF) {
            if let Ok(seconds) = raw.parse::<i64>() {
                let release_ms = if seconds <= 0 {
                    0
                } else {
                    now_ms() + seconds * 1000
                };
                self.state.lock().backoff_release_ms = release_ms;
                self.listener.on_backoff(release_ms);
            }
        }
        if let Some(raw) = response.header(HEADER_ALERT) {
            match serde_json::from_str::<Value>(raw) {
                Ok(value) => {
                    let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
                    let url = value.get("url").and_then(Value::as_str).unwrap_or_default();
                    self.listener.on_deprecated(Deprecation {
                        message: message.to_string(),
                        url: url.to_string(),
                    });
                }
                Err(e) => log::warn!("Error parsing Alert header as JSON: {e}"),
            }
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Parse a quoted-integer ETag header value (`"1234"`) into its integer.
fn parse_etag(raw: Option<&str>) -> Option<i64> {
    raw.map(|s| s.trim_matches('"')).and_then(|s| s.parse().ok())
}
