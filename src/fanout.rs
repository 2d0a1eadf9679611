use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::storage::Storage;
use crate::types::{DeliveryResult, Endpoint, NewLogEntry, ProcessingStatus, WebhookId};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Headers never forwarded to a destination endpoint: `host` would name the
/// wrong authority, the rest are hop-by-hop and meaningless past one hop.
const STRIPPED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub(crate) fn is_stripped_header(name: &str) -> bool {
    STRIPPED_HEADERS
        .iter()
        .any(|stripped| name.eq_ignore_ascii_case(stripped))
}

/// Merge an incoming request's headers with an endpoint's custom headers.
///
/// Names are lower-cased so the merge and the strip list behave the same
/// regardless of input casing. Custom headers win on collision; `host` and
/// the hop-by-hop set are dropped.
pub fn merge_headers(
    incoming: &BTreeMap<String, String>,
    custom: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for (name, value) in incoming.iter().chain(custom.iter()) {
        let name = name.to_ascii_lowercase();
        if is_stripped_header(&name) {
            continue;
        }
        merged.insert(name, value.clone());
    }
    merged
}

/// Pick the result that decides an inbound record's terminal status.
///
/// Completed when the primary succeeded, or failing a primary success when
/// any endpoint succeeded; failed otherwise. The returned result is the one
/// whose status/body are persisted onto the record.
pub fn resolve_outcome(results: &[DeliveryResult]) -> (ProcessingStatus, Option<&DeliveryResult>) {
    let primary = results.iter().find(|r| r.is_primary);
    if let Some(primary) = primary {
        if primary.success {
            return (ProcessingStatus::Completed, Some(primary));
        }
    }
    if let Some(success) = results.iter().find(|r| r.success) {
        return (ProcessingStatus::Completed, Some(success));
    }
    (ProcessingStatus::Failed, primary.or_else(|| results.first()))
}

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Upper bound on a single delivery attempt; expiry is recorded as a
    /// transport failure.
    pub request_timeout: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Delivers one inbound request to a set of target endpoints.
///
/// Each endpoint is handled independently: a transport failure or slow
/// response on one never prevents attempts to the others, and every attempt
/// produces exactly one outgoing log entry and one `DeliveryResult`.
#[derive(Clone)]
pub struct FanoutEngine {
    storage: Arc<dyn Storage>,
    client: reqwest::Client,
    config: FanoutConfig,
}

impl FanoutEngine {
    pub fn new(storage: Arc<dyn Storage>, config: FanoutConfig) -> Self {
        Self {
            storage,
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Fan one request out to every target endpoint, awaiting all attempts.
    ///
    /// `targets` must be non-empty — resolving an empty set is the caller's
    /// error to surface. The returned list has exactly one entry per target;
    /// order is not significant, callers look results up by `is_primary`.
    pub async fn fan_out(
        &self,
        webhook_id: &WebhookId,
        method: &str,
        headers: &BTreeMap<String, String>,
        body: Option<&str>,
        targets: &[Endpoint],
    ) -> Vec<DeliveryResult> {
        debug_assert!(!targets.is_empty(), "fan_out called with no targets");

        let mut handles = Vec::with_capacity(targets.len());
        for endpoint in targets.iter().cloned() {
            let endpoint_id = endpoint.id;
            let is_primary = endpoint.is_primary;
            let engine = self.clone();
            let webhook_id = webhook_id.clone();
            let method = method.to_string();
            let headers = headers.clone();
            let body = body.map(str::to_string);
            let handle = tokio::spawn(async move {
                engine
                    .deliver(&webhook_id, &method, &headers, body.as_deref(), &endpoint)
                    .await
            });
            handles.push((endpoint_id, is_primary, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (endpoint_id, is_primary, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(err) => {
                    // A crashed delivery task still owes its result entry.
                    warn!(endpoint = %endpoint_id, error = %err, "delivery task aborted");
                    metric_inc("webhook.fanout.failure");
                    results.push(DeliveryResult {
                        endpoint_id,
                        is_primary,
                        success: false,
                        status_code: 0,
                        response_body: format!("Error: delivery task aborted: {err}"),
                        response_headers: BTreeMap::new(),
                        response_time_ms: 0,
                    });
                }
            }
        }
        results
    }

    /// One delivery attempt to one endpoint, plus its unconditional log row.
    async fn deliver(
        &self,
        webhook_id: &WebhookId,
        method: &str,
        incoming: &BTreeMap<String, String>,
        body: Option<&str>,
        endpoint: &Endpoint,
    ) -> DeliveryResult {
        let request_headers = merge_headers(incoming, &endpoint.headers);

        let result = match self.send(method, &request_headers, body, endpoint).await {
            Ok(response) => {
                let success = (200..300).contains(&response.status);
                if success {
                    metric_inc("webhook.fanout.success");
                } else {
                    metric_inc("webhook.fanout.failure");
                }
                DeliveryResult {
                    endpoint_id: endpoint.id,
                    is_primary: endpoint.is_primary,
                    success,
                    status_code: response.status,
                    response_body: response.body,
                    response_headers: response.headers,
                    response_time_ms: response.elapsed_ms,
                }
            }
            Err(diagnostic) => {
                warn!(
                    endpoint = %endpoint.url,
                    webhook = %webhook_id,
                    error = %diagnostic,
                    "delivery failed"
                );
                metric_inc("webhook.fanout.failure");
                DeliveryResult {
                    endpoint_id: endpoint.id,
                    is_primary: endpoint.is_primary,
                    success: false,
                    status_code: 0,
                    response_body: format!("Error: {diagnostic}"),
                    response_headers: BTreeMap::new(),
                    response_time_ms: 0,
                }
            }
        };

        // Losing an audit row is preferable to losing delivery to the
        // remaining endpoints, so a failed write only warns.
        let entry = NewLogEntry::outgoing(
            webhook_id.clone(),
            endpoint.url.clone(),
            method.to_string(),
            request_headers,
            body.map(str::to_string),
            result.status_code,
            result.response_body.clone(),
            result.response_time_ms,
        );
        if let Err(err) = self.storage.append_log(entry).await {
            warn!(endpoint = %endpoint.url, error = %err, "failed to record delivery attempt");
        }

        result
    }

    async fn send(
        &self,
        method: &str,
        headers: &BTreeMap<String, String>,
        body: Option<&str>,
        endpoint: &Endpoint,
    ) -> Result<CompletedResponse, String> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| format!("invalid method: {method}"))?;

        let mut header_map = reqwest::header::HeaderMap::new();
        for (name, value) in headers {
            let parsed_name = match reqwest::header::HeaderName::from_bytes(name.as_bytes()) {
                Ok(n) => n,
                Err(_) => {
                    warn!(header = %name, "skipping invalid header name");
                    continue;
                }
            };
            let parsed_value = match reqwest::header::HeaderValue::from_str(value) {
                Ok(v) => v,
                Err(_) => {
                    warn!(header = %name, "skipping invalid header value");
                    continue;
                }
            };
            header_map.append(parsed_name, parsed_value);
        }

        let send_body = if method == reqwest::Method::GET || method == reqwest::Method::HEAD {
            None
        } else {
            body
        };

        let started = Instant::now();
        let mut request = self
            .client
            .request(method, &endpoint.url)
            .headers(header_map)
            .timeout(self.config.request_timeout);
        if let Some(send_body) = send_body {
            request = request.body(send_body.to_string());
        }

        let response = request.send().await.map_err(|err| err.to_string())?;
        let status = response.status().as_u16();
        let response_headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|err| err.to_string())?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        Ok(CompletedResponse {
            status,
            body,
            headers: response_headers,
            elapsed_ms,
        })
    }
}

struct CompletedResponse {
    status: u16,
    body: String,
    headers: BTreeMap<String, String>,
    elapsed_ms: u64,
}
