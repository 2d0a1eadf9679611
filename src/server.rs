use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get, patch, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::error;

use crate::error::FanoutError;
use crate::fanout::{is_stripped_header, FanoutConfig, FanoutEngine};
use crate::receiver::{CallerResponse, InboundReceiver, InboundRequest};
use crate::registry::EndpointRegistry;
use crate::replay::ReplayEngine;
use crate::storage::Storage;
use crate::types::{
    EndpointId, EndpointPatch, LogQuery, NewEndpoint, PageQuery, WebhookId, DEFAULT_PAGE_SIZE,
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path the inbound receiver is mounted on.
    pub webhook_path: String,
    /// Bearer token required on management routes. `None` leaves them open.
    pub management_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            webhook_path: "/webhook".to_string(),
            management_token: None,
        }
    }
}

/// Everything the handlers need, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    storage: Arc<dyn Storage>,
    registry: EndpointRegistry,
    receiver: InboundReceiver,
    replay: ReplayEngine,
    config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, fanout: FanoutConfig, config: ServerConfig) -> Self {
        let registry = EndpointRegistry::new(storage.clone());
        let engine = FanoutEngine::new(storage.clone(), fanout);
        let receiver = InboundReceiver::new(storage.clone(), registry.clone(), engine.clone());
        let replay = ReplayEngine::new(storage.clone(), registry.clone(), engine);
        Self {
            storage,
            registry,
            receiver,
            replay,
            config: Arc::new(config),
        }
    }
}

/// Assemble the full route table: management API behind the bearer gate,
/// plus the open health check and inbound receiver path.
pub fn router(state: AppState) -> Router {
    let mut webhook_path = state.config.webhook_path.clone();
    if !webhook_path.starts_with('/') {
        webhook_path.insert(0, '/');
    }

    let management = Router::new()
        .route("/config/endpoints", get(list_endpoints).post(create_endpoint))
        .route(
            "/config/endpoints/{id}",
            patch(update_endpoint).delete(delete_endpoint),
        )
        .route("/logs", get(get_logs).delete(clear_logs))
        .route("/webhooks", get(get_webhooks).delete(clear_webhooks))
        .route("/replay", post(replay_range))
        .route("/replay/{id}", post(replay_by_id))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_management_token,
        ));

    Router::new()
        .route("/", get(health))
        .merge(management)
        .route(&webhook_path, any(receive_webhook))
        .with_state(state)
}

/// Bind-and-serve convenience for the binary and integration tests.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

async fn require_management_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.management_token.as_deref() else {
        return next.run(request).await;
    };
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if presented == Some(expected) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid or missing management token" })),
        )
            .into_response()
    }
}

impl IntoResponse for FanoutError {
    fn into_response(self) -> Response {
        let status = match &self {
            FanoutError::Validation(_) => StatusCode::BAD_REQUEST,
            FanoutError::NotFound { .. } | FanoutError::InactiveEndpoint(_) => {
                StatusCode::NOT_FOUND
            }
            FanoutError::NoActiveEndpoints | FanoutError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "service": "webhook-fanout",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

// ---- endpoint configuration ----

async fn list_endpoints(State(state): State<AppState>) -> Result<Json<Value>, FanoutError> {
    let endpoints = state.registry.list().await?;
    Ok(Json(json!({ "endpoints": endpoints })))
}

async fn create_endpoint(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, FanoutError> {
    let new: NewEndpoint = parse_body(&body)?;
    let endpoint = state.registry.create(new).await?;
    Ok((StatusCode::CREATED, Json(json!({ "endpoint": endpoint }))).into_response())
}

async fn update_endpoint(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<Value>, FanoutError> {
    let patch: EndpointPatch = parse_body(&body)?;
    let endpoint = state.registry.update(EndpointId(id), patch).await?;
    Ok(Json(json!({ "endpoint": endpoint })))
}

async fn delete_endpoint(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, FanoutError> {
    state.registry.delete(EndpointId(id)).await?;
    Ok(Json(json!({ "deleted": true })))
}

// ---- delivery log ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogsParams {
    limit: Option<usize>,
    skip: Option<usize>,
    webhook_id: Option<String>,
    /// Exact match on the stored endpoint URL copy.
    endpoint: Option<String>,
    /// Resolved through the registry to that endpoint's current URL.
    endpoint_id: Option<i64>,
}

async fn get_logs(
    State(state): State<AppState>,
    Query(params): Query<LogsParams>,
) -> Result<Json<Value>, FanoutError> {
    let mut query = LogQuery {
        limit: params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        skip: params.skip.unwrap_or(0),
        webhook_id: params.webhook_id.map(WebhookId),
        endpoint_url: params.endpoint,
    };
    if let Some(endpoint_id) = params.endpoint_id {
        let endpoint = state
            .registry
            .get(EndpointId(endpoint_id))
            .await?
            .ok_or_else(|| FanoutError::endpoint_not_found(EndpointId(endpoint_id)))?;
        query.endpoint_url = Some(endpoint.url);
    }
    let logs = state.storage.list_logs(query).await?;
    Ok(Json(json!({ "logs": logs })))
}

async fn clear_logs(State(state): State<AppState>) -> Result<Json<Value>, FanoutError> {
    let cleared = state.storage.clear_logs().await?;
    Ok(Json(json!({ "cleared": cleared })))
}

// ---- inbound webhook records ----

#[derive(Debug, Deserialize)]
struct PageParams {
    limit: Option<usize>,
    skip: Option<usize>,
}

async fn get_webhooks(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Value>, FanoutError> {
    let page = PageQuery {
        limit: params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        skip: params.skip.unwrap_or(0),
    };
    let webhooks = state.storage.list_inbound(page).await?;
    Ok(Json(json!({ "webhooks": webhooks })))
}

async fn clear_webhooks(State(state): State<AppState>) -> Result<Json<Value>, FanoutError> {
    let cleared = state.storage.clear_inbound().await?;
    Ok(Json(json!({ "cleared": cleared })))
}

// ---- replay ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayByIdRequest {
    endpoint_id: Option<i64>,
}

async fn replay_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, FanoutError> {
    let request: ReplayByIdRequest = if body.is_empty() {
        ReplayByIdRequest::default()
    } else {
        parse_body(&body)?
    };
    let outcome = state
        .replay
        .replay_by_id(&WebhookId(id), request.endpoint_id.map(EndpointId))
        .await?;
    Ok(Json(json!({ "outcome": outcome })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayRangeRequest {
    start_date: Option<String>,
    end_date: Option<String>,
    endpoint_id: Option<i64>,
}

async fn replay_range(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, FanoutError> {
    let request: ReplayRangeRequest = parse_body(&body)?;
    let (Some(start), Some(end)) = (&request.start_date, &request.end_date) else {
        return Err(FanoutError::Validation(
            "startDate and endDate are required".to_string(),
        ));
    };
    let start = parse_date("startDate", start)?;
    let end = parse_date("endDate", end)?;
    let outcomes = state
        .replay
        .replay_by_range(start, end, request.endpoint_id.map(EndpointId))
        .await?;
    Ok(Json(json!({
        "message": format!("Replayed {} webhooks", outcomes.len()),
        "replayed": outcomes.len(),
        "results": outcomes,
    })))
}

// ---- inbound receiver ----

async fn receive_webhook(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_map: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    let source_ip = header_map
        .get("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = header_map
        .get("user-agent")
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());
    let body = if body.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&body).into_owned())
    };

    let request = InboundRequest {
        method: method.as_str().to_string(),
        headers: header_map,
        body,
        source_ip,
        user_agent,
    };
    match state.receiver.receive(request).await {
        Ok(caller) => caller_response(caller),
        Err(err) => err.into_response(),
    }
}

/// Build the HTTP response mirrored back to the original sender. The
/// hop-by-hop set and `content-length` are recomputed for this hop.
fn caller_response(caller: CallerResponse) -> Response {
    let status = StatusCode::from_u16(caller.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Body::from(caller.body));
    *response.status_mut() = status;
    for (name, value) in &caller.headers {
        if is_stripped_header(name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            continue;
        };
        response.headers_mut().insert(name, value);
    }
    response
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, FanoutError> {
    serde_json::from_slice(body)
        .map_err(|err| FanoutError::Validation(format!("invalid JSON body: {err}")))
}

fn parse_date(field: &str, value: &str) -> Result<DateTime<Utc>, FanoutError> {
    DateTime::parse_from_rfc3339(value)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|_| FanoutError::Validation(format!("{field} must be an RFC 3339 timestamp")))
}
