use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Destination for webhook fan-out.
///
/// An `Endpoint` describes *where* an inbound webhook is relayed to and
/// *which headers* are overlaid onto the forwarded request. It is a pure
/// configuration record with no internal state.
///
/// At most one endpoint carries `is_primary = true`; the registry enforces
/// this on every create and update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Identifier assigned by storage on creation.
    pub id: EndpointId,

    /// Target URL for forwarded requests.
    pub url: String,

    /// Whether this endpoint's response is mirrored back to the original
    /// webhook sender.
    pub is_primary: bool,

    /// Custom headers overlaid onto the incoming request's headers on
    /// dispatch. Custom values win on name collision.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Optional tenant tag. Pure passthrough; no isolation logic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Inactive endpoints are skipped by live fan-out and rejected as
    /// replay targets.
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating an endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEndpoint {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// Partial update for an endpoint. Absent fields keep their prior value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointPatch {
    pub url: Option<String>,
    pub is_primary: Option<bool>,
    pub headers: Option<BTreeMap<String, String>>,
    pub is_active: Option<bool>,
    pub tenant_id: Option<String>,
}

/// Unique identifier for an endpoint.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of endpoint ids with other integer identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub i64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for an inbound webhook event.
///
/// Generated once per receipt or replay; delivery log entries reference it
/// to correlate every attempt produced by one inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookId(pub String);

impl WebhookId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for WebhookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One received (or replayed) webhook event.
///
/// Created exactly once, in `pending` state, before any fan-out is
/// attempted; settled exactly once afterwards. A replay creates a fresh
/// record and never mutates the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundWebhook {
    pub id: WebhookId,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub source_ip: String,
    pub user_agent: String,
    pub processing_status: ProcessingStatus,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of an inbound webhook record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

/// Which side of the relay a log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }
}

/// One audit record: either the receipt of an inbound webhook (`incoming`)
/// or a single delivery attempt to one endpoint (`outgoing`).
///
/// Append-only. Entries keep a copy of the endpoint URL rather than a
/// foreign key, so deleting an endpoint leaves its history intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLogEntry {
    pub id: i64,
    pub webhook_id: WebhookId,
    pub direction: Direction,
    pub endpoint_url: Option<String>,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// `Some(0)` records a transport-level failure, not an HTTP response.
    /// `None` on incoming entries.
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    /// Elapsed wall-clock milliseconds; 0 on transport failure.
    #[serde(rename = "responseTime")]
    pub response_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// A log entry before storage assigns its id and timestamp.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub webhook_id: WebhookId,
    pub direction: Direction,
    pub endpoint_url: Option<String>,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    pub response_time_ms: Option<u64>,
}

impl NewLogEntry {
    /// Audit entry for the receipt of an inbound webhook.
    pub fn incoming(
        webhook_id: WebhookId,
        method: String,
        headers: BTreeMap<String, String>,
        body: Option<String>,
    ) -> Self {
        Self {
            webhook_id,
            direction: Direction::Incoming,
            endpoint_url: None,
            method,
            headers,
            body,
            status_code: None,
            response_body: None,
            response_time_ms: None,
        }
    }

    /// Audit entry for one delivery attempt to one endpoint.
    #[allow(clippy::too_many_arguments)]
    pub fn outgoing(
        webhook_id: WebhookId,
        endpoint_url: String,
        method: String,
        headers: BTreeMap<String, String>,
        body: Option<String>,
        status_code: u16,
        response_body: String,
        response_time_ms: u64,
    ) -> Self {
        Self {
            webhook_id,
            direction: Direction::Outgoing,
            endpoint_url: Some(endpoint_url),
            method,
            headers,
            body,
            status_code: Some(status_code),
            response_body: Some(response_body),
            response_time_ms: Some(response_time_ms),
        }
    }
}

/// Outcome of one delivery attempt to one endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub endpoint_id: EndpointId,
    pub is_primary: bool,
    /// True when the endpoint answered with a 2xx status.
    pub success: bool,
    /// HTTP status, or 0 on a transport-level failure.
    pub status_code: u16,
    pub response_body: String,
    pub response_headers: BTreeMap<String, String>,
    /// Elapsed wall-clock milliseconds; 0 on transport failure.
    #[serde(rename = "responseTime")]
    pub response_time_ms: u64,
}

/// Result of replaying one stored webhook.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayOutcome {
    pub original_id: WebhookId,
    /// Id of the synthetic record, when the replay got far enough to
    /// create one.
    pub new_id: Option<WebhookId>,
    pub method: String,
    pub original_created_at: DateTime<Utc>,
    /// Terminal status of the synthetic record.
    pub status: Option<ProcessingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Default page size for log and webhook listings.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Pagination window for inbound webhook listings.
#[derive(Debug, Clone)]
pub struct PageQuery {
    pub limit: usize,
    pub skip: usize,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            skip: 0,
        }
    }
}

/// Filtered, paginated delivery log query. Listings are newest-first.
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub limit: usize,
    pub skip: usize,
    /// Exact match on the correlating inbound webhook id.
    pub webhook_id: Option<WebhookId>,
    /// Exact match on the stored endpoint URL copy.
    pub endpoint_url: Option<String>,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            skip: 0,
            webhook_id: None,
            endpoint_url: None,
        }
    }
}
