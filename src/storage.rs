use std::cmp::Reverse;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::types::{
    DeliveryLogEntry, Endpoint, EndpointId, EndpointPatch, InboundWebhook, LogQuery, NewEndpoint,
    NewLogEntry, PageQuery, ProcessingStatus, WebhookId,
};

/// Persistence seam for the three logical tables: endpoints, inbound
/// webhooks, and the delivery log.
///
/// Implementations that set `is_primary = true` on an insert or update must
/// clear every other endpoint's primary flag in the same atomic unit, so a
/// race between two set-primary calls cannot leave two primaries behind.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert_endpoint(&self, new: NewEndpoint) -> Result<Endpoint, StorageError>;
    async fn update_endpoint(
        &self,
        id: EndpointId,
        patch: EndpointPatch,
    ) -> Result<Option<Endpoint>, StorageError>;
    async fn delete_endpoint(&self, id: EndpointId) -> Result<bool, StorageError>;
    async fn get_endpoint(&self, id: EndpointId) -> Result<Option<Endpoint>, StorageError>;
    /// All endpoints, primary first, then insertion order.
    async fn list_endpoints(&self) -> Result<Vec<Endpoint>, StorageError>;
    /// The subset live fan-out targets.
    async fn active_endpoints(&self) -> Result<Vec<Endpoint>, StorageError>;

    async fn insert_inbound(&self, record: InboundWebhook) -> Result<(), StorageError>;
    async fn get_inbound(&self, id: &WebhookId) -> Result<Option<InboundWebhook>, StorageError>;
    /// One-shot transition out of `pending` after fan-out settles.
    async fn settle_inbound(
        &self,
        id: &WebhookId,
        status: ProcessingStatus,
        response_status: Option<u16>,
        response_body: Option<String>,
    ) -> Result<(), StorageError>;
    /// Newest-first page of inbound records.
    async fn list_inbound(&self, page: PageQuery) -> Result<Vec<InboundWebhook>, StorageError>;
    /// Records with `created_at` in `[start, end]` inclusive, oldest first.
    async fn inbound_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<InboundWebhook>, StorageError>;
    async fn clear_inbound(&self) -> Result<u64, StorageError>;

    async fn append_log(&self, entry: NewLogEntry) -> Result<(), StorageError>;
    /// Newest-first page of log entries matching the query's filters.
    async fn list_logs(&self, query: LogQuery) -> Result<Vec<DeliveryLogEntry>, StorageError>;
    async fn clear_logs(&self) -> Result<u64, StorageError>;
}

/// In-memory storage for tests and single-process deployments.
///
/// One mutex guards all three tables, which makes the clear-then-set
/// primary sequence atomic without further ceremony.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    endpoints: Vec<Endpoint>,
    next_endpoint_id: i64,
    inbound: Vec<InboundWebhook>,
    logs: Vec<DeliveryLogEntry>,
    next_log_id: i64,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn insert_endpoint(&self, new: NewEndpoint) -> Result<Endpoint, StorageError> {
        let mut tables = self.inner.lock().await;
        if new.is_primary {
            for endpoint in &mut tables.endpoints {
                endpoint.is_primary = false;
            }
        }
        tables.next_endpoint_id += 1;
        let now = Utc::now();
        let endpoint = Endpoint {
            id: EndpointId(tables.next_endpoint_id),
            url: new.url,
            is_primary: new.is_primary,
            headers: new.headers,
            tenant_id: new.tenant_id,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tables.endpoints.push(endpoint.clone());
        Ok(endpoint)
    }

    async fn update_endpoint(
        &self,
        id: EndpointId,
        patch: EndpointPatch,
    ) -> Result<Option<Endpoint>, StorageError> {
        let mut tables = self.inner.lock().await;
        let Some(index) = tables.endpoints.iter().position(|e| e.id == id) else {
            return Ok(None);
        };
        if patch.is_primary == Some(true) {
            for endpoint in &mut tables.endpoints {
                if endpoint.id != id {
                    endpoint.is_primary = false;
                }
            }
        }
        let endpoint = &mut tables.endpoints[index];
        if let Some(url) = patch.url {
            endpoint.url = url;
        }
        if let Some(is_primary) = patch.is_primary {
            endpoint.is_primary = is_primary;
        }
        if let Some(headers) = patch.headers {
            endpoint.headers = headers;
        }
        if let Some(is_active) = patch.is_active {
            endpoint.is_active = is_active;
        }
        if let Some(tenant_id) = patch.tenant_id {
            endpoint.tenant_id = Some(tenant_id);
        }
        endpoint.updated_at = Utc::now();
        Ok(Some(endpoint.clone()))
    }

    async fn delete_endpoint(&self, id: EndpointId) -> Result<bool, StorageError> {
        let mut tables = self.inner.lock().await;
        let before = tables.endpoints.len();
        tables.endpoints.retain(|e| e.id != id);
        Ok(tables.endpoints.len() < before)
    }

    async fn get_endpoint(&self, id: EndpointId) -> Result<Option<Endpoint>, StorageError> {
        let tables = self.inner.lock().await;
        Ok(tables.endpoints.iter().find(|e| e.id == id).cloned())
    }

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>, StorageError> {
        let tables = self.inner.lock().await;
        let mut endpoints = tables.endpoints.clone();
        endpoints.sort_by_key(|e| (!e.is_primary, e.id.0));
        Ok(endpoints)
    }

    async fn active_endpoints(&self) -> Result<Vec<Endpoint>, StorageError> {
        let mut endpoints = self.list_endpoints().await?;
        endpoints.retain(|e| e.is_active);
        Ok(endpoints)
    }

    async fn insert_inbound(&self, record: InboundWebhook) -> Result<(), StorageError> {
        let mut tables = self.inner.lock().await;
        tables.inbound.push(record);
        Ok(())
    }

    async fn get_inbound(&self, id: &WebhookId) -> Result<Option<InboundWebhook>, StorageError> {
        let tables = self.inner.lock().await;
        Ok(tables.inbound.iter().find(|w| &w.id == id).cloned())
    }

    async fn settle_inbound(
        &self,
        id: &WebhookId,
        status: ProcessingStatus,
        response_status: Option<u16>,
        response_body: Option<String>,
    ) -> Result<(), StorageError> {
        let mut tables = self.inner.lock().await;
        if let Some(record) = tables.inbound.iter_mut().find(|w| &w.id == id) {
            record.processing_status = status;
            record.response_status = response_status;
            record.response_body = response_body;
        }
        Ok(())
    }

    async fn list_inbound(&self, page: PageQuery) -> Result<Vec<InboundWebhook>, StorageError> {
        let tables = self.inner.lock().await;
        let mut records = tables.inbound.clone();
        records.sort_by_key(|w| Reverse(w.created_at));
        Ok(records.into_iter().skip(page.skip).take(page.limit).collect())
    }

    async fn inbound_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<InboundWebhook>, StorageError> {
        let tables = self.inner.lock().await;
        let mut records: Vec<InboundWebhook> = tables
            .inbound
            .iter()
            .filter(|w| w.created_at >= start && w.created_at <= end)
            .cloned()
            .collect();
        records.sort_by_key(|w| w.created_at);
        Ok(records)
    }

    async fn clear_inbound(&self) -> Result<u64, StorageError> {
        let mut tables = self.inner.lock().await;
        let cleared = tables.inbound.len() as u64;
        tables.inbound.clear();
        Ok(cleared)
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<(), StorageError> {
        let mut tables = self.inner.lock().await;
        tables.next_log_id += 1;
        let entry = DeliveryLogEntry {
            id: tables.next_log_id,
            webhook_id: entry.webhook_id,
            direction: entry.direction,
            endpoint_url: entry.endpoint_url,
            method: entry.method,
            headers: entry.headers,
            body: entry.body,
            status_code: entry.status_code,
            response_body: entry.response_body,
            response_time_ms: entry.response_time_ms,
            created_at: Utc::now(),
        };
        tables.logs.push(entry);
        Ok(())
    }

    async fn list_logs(&self, query: LogQuery) -> Result<Vec<DeliveryLogEntry>, StorageError> {
        let tables = self.inner.lock().await;
        let mut entries: Vec<DeliveryLogEntry> = tables
            .logs
            .iter()
            .filter(|entry| match &query.webhook_id {
                Some(id) => &entry.webhook_id == id,
                None => true,
            })
            .filter(|entry| match &query.endpoint_url {
                Some(url) => entry.endpoint_url.as_deref() == Some(url.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        entries.sort_by_key(|e| (Reverse(e.created_at), Reverse(e.id)));
        Ok(entries
            .into_iter()
            .skip(query.skip)
            .take(query.limit)
            .collect())
    }

    async fn clear_logs(&self) -> Result<u64, StorageError> {
        let mut tables = self.inner.lock().await;
        let cleared = tables.logs.len() as u64;
        tables.logs.clear();
        Ok(cleared)
    }
}
