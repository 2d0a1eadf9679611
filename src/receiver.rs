use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::FanoutError;
use crate::fanout::{resolve_outcome, FanoutEngine};
use crate::registry::EndpointRegistry;
use crate::storage::Storage;
use crate::types::{
    DeliveryResult, InboundWebhook, NewLogEntry, ProcessingStatus, WebhookId,
};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// An inbound webhook call as handed over by the HTTP layer.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub source_ip: String,
    pub user_agent: String,
}

/// What the original webhook sender gets back.
#[derive(Debug, Clone)]
pub struct CallerResponse {
    pub status: u16,
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

impl CallerResponse {
    /// Generic acknowledgement used whenever the primary's response is not
    /// mirrored. Downstream failures are never exposed to the sender.
    pub fn ack() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            status: 200,
            body: r#"{"message":"Webhook processed successfully"}"#.to_string(),
            headers,
        }
    }
}

/// Accepts an inbound webhook, persists it, fans it out, and settles the
/// record.
///
/// The inbound row is written *before* fan-out starts, so the event exists
/// even if every delivery attempt subsequently fails.
#[derive(Clone)]
pub struct InboundReceiver {
    storage: Arc<dyn Storage>,
    registry: EndpointRegistry,
    engine: FanoutEngine,
}

impl InboundReceiver {
    pub fn new(storage: Arc<dyn Storage>, registry: EndpointRegistry, engine: FanoutEngine) -> Self {
        Self {
            storage,
            registry,
            engine,
        }
    }

    pub async fn receive(&self, request: InboundRequest) -> Result<CallerResponse, FanoutError> {
        let record = InboundWebhook {
            id: WebhookId::new(),
            method: request.method,
            headers: request.headers,
            body: request.body,
            source_ip: request.source_ip,
            user_agent: request.user_agent,
            processing_status: ProcessingStatus::Pending,
            response_status: None,
            response_body: None,
            created_at: Utc::now(),
        };
        self.storage.insert_inbound(record.clone()).await?;
        metric_inc("webhook.inbound.received");
        info!(webhook = %record.id, method = %record.method, "inbound webhook received");

        record_incoming_entry(&self.storage, &record).await;

        let targets = self.registry.active_endpoints().await?;
        if targets.is_empty() {
            metric_inc("webhook.inbound.no_endpoints");
            warn!(webhook = %record.id, "no active endpoints configured, dropping inbound webhook");
            if let Err(err) = self
                .storage
                .settle_inbound(&record.id, ProcessingStatus::Failed, None, None)
                .await
            {
                warn!(webhook = %record.id, error = %err, "failed to mark inbound record failed");
            }
            return Err(FanoutError::NoActiveEndpoints);
        }

        let results = self
            .engine
            .fan_out(
                &record.id,
                &record.method,
                &record.headers,
                record.body.as_deref(),
                &targets,
            )
            .await;

        let (status, basis) = resolve_outcome(&results);
        settle_record(&self.storage, &record.id, status, basis).await;

        Ok(match basis {
            Some(primary) if primary.is_primary && primary.success => CallerResponse {
                status: primary.status_code,
                body: primary.response_body.clone(),
                headers: primary.response_headers.clone(),
            },
            _ => CallerResponse::ack(),
        })
    }
}

/// Write the incoming audit entry for a freshly persisted inbound record.
/// Best-effort: its absence never blocks fan-out.
pub(crate) async fn record_incoming_entry(storage: &Arc<dyn Storage>, record: &InboundWebhook) {
    let entry = NewLogEntry::incoming(
        record.id.clone(),
        record.method.clone(),
        record.headers.clone(),
        record.body.clone(),
    );
    if let Err(err) = storage.append_log(entry).await {
        warn!(webhook = %record.id, error = %err, "failed to record incoming log entry");
    }
}

/// Move an inbound record out of `pending`, persisting the status and body
/// of the result that decided the outcome.
pub(crate) async fn settle_record(
    storage: &Arc<dyn Storage>,
    id: &WebhookId,
    status: ProcessingStatus,
    basis: Option<&DeliveryResult>,
) {
    let (response_status, response_body) = match basis {
        Some(result) => (Some(result.status_code), Some(result.response_body.clone())),
        None => (None, None),
    };
    if let Err(err) = storage
        .settle_inbound(id, status, response_status, response_body)
        .await
    {
        warn!(webhook = %id, error = %err, "failed to settle inbound record");
    }
}
