use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_postgres::{Client, Row};

use crate::error::StorageError;
use crate::storage::Storage;
use crate::types::{
    DeliveryLogEntry, Direction, Endpoint, EndpointId, EndpointPatch, InboundWebhook, LogQuery,
    NewEndpoint, NewLogEntry, PageQuery, ProcessingStatus, WebhookId,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS endpoints (
    id BIGSERIAL PRIMARY KEY,
    url TEXT NOT NULL,
    is_primary BOOLEAN NOT NULL DEFAULT FALSE,
    headers TEXT,
    tenant_id TEXT,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS delivery_log (
    id BIGSERIAL PRIMARY KEY,
    webhook_id TEXT NOT NULL,
    direction TEXT NOT NULL,
    endpoint_url TEXT,
    method TEXT NOT NULL,
    headers TEXT,
    body TEXT,
    status_code INTEGER,
    response_body TEXT,
    response_time_ms BIGINT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_delivery_log_webhook_id ON delivery_log(webhook_id);
CREATE INDEX IF NOT EXISTS idx_delivery_log_created_at ON delivery_log(created_at);

CREATE TABLE IF NOT EXISTS inbound_webhooks (
    id TEXT PRIMARY KEY,
    method TEXT NOT NULL,
    headers TEXT,
    body TEXT,
    source_ip TEXT NOT NULL,
    user_agent TEXT NOT NULL,
    processing_status TEXT NOT NULL DEFAULT 'pending',
    response_status INTEGER,
    response_body TEXT,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_inbound_webhooks_created_at ON inbound_webhooks(created_at);
";

/// Durable storage on Postgres.
///
/// The client sits behind a mutex so the clear-then-set primary sequence can
/// run inside one transaction.
pub struct PostgresStorage {
    client: Mutex<Client>,
}

impl PostgresStorage {
    /// Create the schema if needed and wrap the client.
    pub async fn new(client: Client) -> Result<Self, tokio_postgres::Error> {
        client.batch_execute(SCHEMA).await?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

fn pg_err(err: tokio_postgres::Error) -> StorageError {
    StorageError::new(err.to_string())
}

fn serialize_headers(headers: &BTreeMap<String, String>) -> String {
    serde_json::to_string(headers).unwrap_or_default()
}

fn deserialize_headers(text: Option<&str>) -> BTreeMap<String, String> {
    text.and_then(|t| serde_json::from_str(t).ok())
        .unwrap_or_default()
}

fn parse_status(text: &str) -> ProcessingStatus {
    match text {
        "pending" => ProcessingStatus::Pending,
        "completed" => ProcessingStatus::Completed,
        _ => ProcessingStatus::Failed,
    }
}

fn parse_direction(text: &str) -> Direction {
    match text {
        "incoming" => Direction::Incoming,
        _ => Direction::Outgoing,
    }
}

// Column order in the row accessors matches the CREATE TABLE statements.

fn endpoint_from_row(row: &Row) -> Endpoint {
    Endpoint {
        id: EndpointId(row.get::<_, i64>(0)),
        url: row.get(1),
        is_primary: row.get(2),
        headers: deserialize_headers(row.get::<_, Option<&str>>(3)),
        tenant_id: row.get(4),
        is_active: row.get(5),
        created_at: row.get(6),
        updated_at: row.get(7),
    }
}

fn inbound_from_row(row: &Row) -> InboundWebhook {
    InboundWebhook {
        id: WebhookId(row.get(0)),
        method: row.get(1),
        headers: deserialize_headers(row.get::<_, Option<&str>>(2)),
        body: row.get(3),
        source_ip: row.get(4),
        user_agent: row.get(5),
        processing_status: parse_status(row.get(6)),
        response_status: row.get::<_, Option<i32>>(7).map(|code| code as u16),
        response_body: row.get(8),
        created_at: row.get(9),
    }
}

fn log_from_row(row: &Row) -> DeliveryLogEntry {
    DeliveryLogEntry {
        id: row.get(0),
        webhook_id: WebhookId(row.get(1)),
        direction: parse_direction(row.get(2)),
        endpoint_url: row.get(3),
        method: row.get(4),
        headers: deserialize_headers(row.get::<_, Option<&str>>(5)),
        body: row.get(6),
        status_code: row.get::<_, Option<i32>>(7).map(|code| code as u16),
        response_body: row.get(8),
        response_time_ms: row.get::<_, Option<i64>>(9).map(|ms| ms as u64),
        created_at: row.get(10),
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn insert_endpoint(&self, new: NewEndpoint) -> Result<Endpoint, StorageError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(pg_err)?;
        if new.is_primary {
            tx.execute("UPDATE endpoints SET is_primary = FALSE WHERE is_primary", &[])
                .await
                .map_err(pg_err)?;
        }
        let row = tx
            .query_one(
                "INSERT INTO endpoints (url, is_primary, headers, tenant_id)
                 VALUES ($1, $2, $3, $4)
                 RETURNING *",
                &[
                    &new.url,
                    &new.is_primary,
                    &serialize_headers(&new.headers),
                    &new.tenant_id,
                ],
            )
            .await
            .map_err(pg_err)?;
        tx.commit().await.map_err(pg_err)?;
        Ok(endpoint_from_row(&row))
    }

    async fn update_endpoint(
        &self,
        id: EndpointId,
        patch: EndpointPatch,
    ) -> Result<Option<Endpoint>, StorageError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(pg_err)?;
        if patch.is_primary == Some(true) {
            tx.execute(
                "UPDATE endpoints SET is_primary = FALSE WHERE id <> $1",
                &[&id.0],
            )
            .await
            .map_err(pg_err)?;
        }
        let headers = patch.headers.as_ref().map(serialize_headers);
        let row = tx
            .query_opt(
                "UPDATE endpoints SET
                     url = COALESCE($2, url),
                     is_primary = COALESCE($3, is_primary),
                     headers = COALESCE($4, headers),
                     is_active = COALESCE($5, is_active),
                     tenant_id = COALESCE($6, tenant_id),
                     updated_at = now()
                 WHERE id = $1
                 RETURNING *",
                &[
                    &id.0,
                    &patch.url,
                    &patch.is_primary,
                    &headers,
                    &patch.is_active,
                    &patch.tenant_id,
                ],
            )
            .await
            .map_err(pg_err)?;
        tx.commit().await.map_err(pg_err)?;
        Ok(row.map(|row| endpoint_from_row(&row)))
    }

    async fn delete_endpoint(&self, id: EndpointId) -> Result<bool, StorageError> {
        let client = self.client.lock().await;
        let deleted = client
            .execute("DELETE FROM endpoints WHERE id = $1", &[&id.0])
            .await
            .map_err(pg_err)?;
        Ok(deleted > 0)
    }

    async fn get_endpoint(&self, id: EndpointId) -> Result<Option<Endpoint>, StorageError> {
        let client = self.client.lock().await;
        let row = client
            .query_opt("SELECT * FROM endpoints WHERE id = $1", &[&id.0])
            .await
            .map_err(pg_err)?;
        Ok(row.map(|row| endpoint_from_row(&row)))
    }

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>, StorageError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT * FROM endpoints ORDER BY is_primary DESC, id ASC",
                &[],
            )
            .await
            .map_err(pg_err)?;
        Ok(rows.iter().map(endpoint_from_row).collect())
    }

    async fn active_endpoints(&self) -> Result<Vec<Endpoint>, StorageError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT * FROM endpoints WHERE is_active ORDER BY is_primary DESC, id ASC",
                &[],
            )
            .await
            .map_err(pg_err)?;
        Ok(rows.iter().map(endpoint_from_row).collect())
    }

    async fn insert_inbound(&self, record: InboundWebhook) -> Result<(), StorageError> {
        let client = self.client.lock().await;
        client
            .execute(
                "INSERT INTO inbound_webhooks
                     (id, method, headers, body, source_ip, user_agent,
                      processing_status, response_status, response_body, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &record.id.0,
                    &record.method,
                    &serialize_headers(&record.headers),
                    &record.body,
                    &record.source_ip,
                    &record.user_agent,
                    &record.processing_status.as_str(),
                    &record.response_status.map(|code| code as i32),
                    &record.response_body,
                    &record.created_at,
                ],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn get_inbound(&self, id: &WebhookId) -> Result<Option<InboundWebhook>, StorageError> {
        let client = self.client.lock().await;
        let row = client
            .query_opt("SELECT * FROM inbound_webhooks WHERE id = $1", &[&id.0])
            .await
            .map_err(pg_err)?;
        Ok(row.map(|row| inbound_from_row(&row)))
    }

    async fn settle_inbound(
        &self,
        id: &WebhookId,
        status: ProcessingStatus,
        response_status: Option<u16>,
        response_body: Option<String>,
    ) -> Result<(), StorageError> {
        let client = self.client.lock().await;
        client
            .execute(
                "UPDATE inbound_webhooks SET
                     processing_status = $2,
                     response_status = $3,
                     response_body = $4
                 WHERE id = $1",
                &[
                    &id.0,
                    &status.as_str(),
                    &response_status.map(|code| code as i32),
                    &response_body,
                ],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn list_inbound(&self, page: PageQuery) -> Result<Vec<InboundWebhook>, StorageError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT * FROM inbound_webhooks
                 ORDER BY created_at DESC
                 LIMIT $1 OFFSET $2",
                &[&(page.limit as i64), &(page.skip as i64)],
            )
            .await
            .map_err(pg_err)?;
        Ok(rows.iter().map(inbound_from_row).collect())
    }

    async fn inbound_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<InboundWebhook>, StorageError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT * FROM inbound_webhooks
                 WHERE created_at >= $1 AND created_at <= $2
                 ORDER BY created_at ASC",
                &[&start, &end],
            )
            .await
            .map_err(pg_err)?;
        Ok(rows.iter().map(inbound_from_row).collect())
    }

    async fn clear_inbound(&self) -> Result<u64, StorageError> {
        let client = self.client.lock().await;
        client
            .execute("DELETE FROM inbound_webhooks", &[])
            .await
            .map_err(pg_err)
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<(), StorageError> {
        let client = self.client.lock().await;
        client
            .execute(
                "INSERT INTO delivery_log
                     (webhook_id, direction, endpoint_url, method, headers, body,
                      status_code, response_body, response_time_ms)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                &[
                    &entry.webhook_id.0,
                    &entry.direction.as_str(),
                    &entry.endpoint_url,
                    &entry.method,
                    &serialize_headers(&entry.headers),
                    &entry.body,
                    &entry.status_code.map(|code| code as i32),
                    &entry.response_body,
                    &entry.response_time_ms.map(|ms| ms as i64),
                ],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn list_logs(&self, query: LogQuery) -> Result<Vec<DeliveryLogEntry>, StorageError> {
        let client = self.client.lock().await;
        let webhook_id = query.webhook_id.as_ref().map(|id| id.0.as_str());
        let rows = client
            .query(
                "SELECT * FROM delivery_log
                 WHERE ($1::text IS NULL OR webhook_id = $1)
                   AND ($2::text IS NULL OR endpoint_url = $2)
                 ORDER BY created_at DESC, id DESC
                 LIMIT $3 OFFSET $4",
                &[
                    &webhook_id,
                    &query.endpoint_url,
                    &(query.limit as i64),
                    &(query.skip as i64),
                ],
            )
            .await
            .map_err(pg_err)?;
        Ok(rows.iter().map(log_from_row).collect())
    }

    async fn clear_logs(&self) -> Result<u64, StorageError> {
        let client = self.client.lock().await;
        client
            .execute("DELETE FROM delivery_log", &[])
            .await
            .map_err(pg_err)
    }
}
