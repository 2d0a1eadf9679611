use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::FanoutError;
use crate::fanout::{resolve_outcome, FanoutEngine};
use crate::receiver::{record_incoming_entry, settle_record};
use crate::registry::EndpointRegistry;
use crate::storage::Storage;
use crate::types::{
    Endpoint, EndpointId, InboundWebhook, ProcessingStatus, ReplayOutcome, WebhookId,
};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Re-runs stored inbound webhooks against the present endpoint
/// configuration.
///
/// A replay synthesizes a brand-new inbound record (the original is never
/// mutated) and sends it down the same fan-out path as live traffic.
#[derive(Clone)]
pub struct ReplayEngine {
    storage: Arc<dyn Storage>,
    registry: EndpointRegistry,
    engine: FanoutEngine,
}

impl ReplayEngine {
    pub fn new(storage: Arc<dyn Storage>, registry: EndpointRegistry, engine: FanoutEngine) -> Self {
        Self {
            storage,
            registry,
            engine,
        }
    }

    /// Replay one stored webhook, optionally restricted to a single active
    /// endpoint.
    ///
    /// Target resolution happens before the synthetic record is created, so
    /// a bad target never strands a record in `pending`.
    pub async fn replay_by_id(
        &self,
        id: &WebhookId,
        target: Option<EndpointId>,
    ) -> Result<ReplayOutcome, FanoutError> {
        let original = self
            .storage
            .get_inbound(id)
            .await?
            .ok_or_else(|| FanoutError::webhook_not_found(id))?;
        let targets = self.resolve_targets(target).await?;
        Ok(self.replay_record(&original, &targets).await)
    }

    /// Replay every webhook with `created_at` in `[start, end]` inclusive,
    /// oldest first.
    ///
    /// One webhook's failure never aborts the rest of the batch: each item's
    /// outcome is recorded independently. An explicit target endpoint is
    /// validated up front so a bad id fails the whole request instead of
    /// producing a batch of identical per-item errors.
    pub async fn replay_by_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        target: Option<EndpointId>,
    ) -> Result<Vec<ReplayOutcome>, FanoutError> {
        if target.is_some() {
            self.resolve_targets(target).await?;
        }

        let originals = self.storage.inbound_in_range(start, end).await?;
        info!(count = originals.len(), "replaying webhooks in range");

        let mut outcomes = Vec::with_capacity(originals.len());
        for original in &originals {
            // Targets re-resolve per item: configuration may change while a
            // long batch runs, and a per-item failure stays per-item.
            match self.resolve_targets(target).await {
                Ok(targets) => outcomes.push(self.replay_record(original, &targets).await),
                Err(err) => {
                    let mut outcome = outcome_stub(original);
                    outcome.error = Some(err.to_string());
                    outcomes.push(outcome);
                }
            }
        }
        Ok(outcomes)
    }

    async fn resolve_targets(
        &self,
        target: Option<EndpointId>,
    ) -> Result<Vec<Endpoint>, FanoutError> {
        match target {
            Some(id) => {
                let endpoint = self
                    .registry
                    .get(id)
                    .await?
                    .ok_or_else(|| FanoutError::endpoint_not_found(id))?;
                if !endpoint.is_active {
                    return Err(FanoutError::InactiveEndpoint(id));
                }
                Ok(vec![endpoint])
            }
            None => {
                let active = self.registry.active_endpoints().await?;
                if active.is_empty() {
                    return Err(FanoutError::NoActiveEndpoints);
                }
                Ok(active)
            }
        }
    }

    /// Fan a stored record back out as a brand-new inbound event.
    async fn replay_record(
        &self,
        original: &InboundWebhook,
        targets: &[Endpoint],
    ) -> ReplayOutcome {
        let mut outcome = outcome_stub(original);

        let record = InboundWebhook {
            id: WebhookId::new(),
            method: original.method.clone(),
            headers: original.headers.clone(),
            body: original.body.clone(),
            source_ip: format!("replay:{}", original.id),
            user_agent: format!("{} [replay]", original.user_agent),
            processing_status: ProcessingStatus::Pending,
            response_status: None,
            response_body: None,
            created_at: Utc::now(),
        };
        if let Err(err) = self.storage.insert_inbound(record.clone()).await {
            outcome.error = Some(err.to_string());
            return outcome;
        }
        outcome.new_id = Some(record.id.clone());

        record_incoming_entry(&self.storage, &record).await;

        let results = self
            .engine
            .fan_out(
                &record.id,
                &record.method,
                &record.headers,
                record.body.as_deref(),
                targets,
            )
            .await;

        let (status, basis) = resolve_outcome(&results);
        settle_record(&self.storage, &record.id, status, basis).await;

        metric_inc("webhook.replay.replayed");
        info!(
            original = %original.id,
            replay = %record.id,
            status = status.as_str(),
            "webhook replayed"
        );
        outcome.status = Some(status);
        outcome
    }
}

fn outcome_stub(original: &InboundWebhook) -> ReplayOutcome {
    ReplayOutcome {
        original_id: original.id.clone(),
        new_id: None,
        method: original.method.clone(),
        original_created_at: original.created_at,
        status: None,
        error: None,
    }
}
