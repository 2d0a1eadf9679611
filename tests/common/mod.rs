#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use webhook_fanout::{
    AppState, EndpointRegistry, FanoutConfig, FanoutEngine, InMemoryStorage, InboundReceiver,
    InboundRequest, InboundWebhook, NewEndpoint, ProcessingStatus, ReplayEngine, ServerConfig,
    Storage, WebhookId,
};

/// The full component stack over fresh in-memory storage.
pub struct TestApp {
    pub storage: Arc<InMemoryStorage>,
    pub registry: EndpointRegistry,
    pub engine: FanoutEngine,
    pub receiver: InboundReceiver,
    pub replay: ReplayEngine,
}

pub fn test_app() -> TestApp {
    let storage = Arc::new(InMemoryStorage::new());
    let dyn_storage: Arc<dyn Storage> = storage.clone();
    let registry = EndpointRegistry::new(dyn_storage.clone());
    let engine = FanoutEngine::new(
        dyn_storage.clone(),
        FanoutConfig {
            request_timeout: Duration::from_secs(5),
        },
    );
    let receiver = InboundReceiver::new(dyn_storage.clone(), registry.clone(), engine.clone());
    let replay = ReplayEngine::new(dyn_storage, registry.clone(), engine.clone());
    TestApp {
        storage,
        registry,
        engine,
        receiver,
        replay,
    }
}

/// Spawn the whole HTTP service on a loopback port.
pub async fn spawn_service(token: Option<&str>) -> (String, Arc<InMemoryStorage>) {
    let storage = Arc::new(InMemoryStorage::new());
    let state = AppState::new(
        storage.clone(),
        FanoutConfig {
            request_timeout: Duration::from_secs(5),
        },
        ServerConfig {
            webhook_path: "/webhook".to_string(),
            management_token: token.map(str::to_string),
        },
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        webhook_fanout::serve(listener, state).await.unwrap();
    });
    (format!("http://{addr}"), storage)
}

/// One request captured by a test destination.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

pub type Recorded = Arc<Mutex<Vec<RecordedRequest>>>;

#[derive(Clone)]
struct DestinationState {
    status: u16,
    body: &'static str,
    recorded: Recorded,
}

/// Spawn a loopback destination that answers every request with the given
/// status and body, recording what it received.
pub async fn spawn_receiver(status: u16, body: &'static str) -> (String, Recorded) {
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let state = DestinationState {
        status,
        body,
        recorded: recorded.clone(),
    };
    let app = Router::new().fallback(record_request).with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), recorded)
}

async fn record_request(
    State(state): State<DestinationState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    state.recorded.lock().await.push(RecordedRequest {
        method: method.as_str().to_string(),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    });
    (
        StatusCode::from_u16(state.status).unwrap(),
        [("x-relay-test", "1")],
        state.body.to_string(),
    )
}

/// URL pointing at a port nothing listens on.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/hook")
}

pub fn new_endpoint(url: &str, is_primary: bool) -> NewEndpoint {
    NewEndpoint {
        url: url.to_string(),
        is_primary,
        ..Default::default()
    }
}

pub fn btree(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

pub fn inbound(method: &str, body: Option<&str>) -> InboundRequest {
    InboundRequest {
        method: method.to_string(),
        headers: btree(&[
            ("content-type", "application/json"),
            ("user-agent", "test-agent"),
        ]),
        body: body.map(str::to_string),
        source_ip: "203.0.113.7".to_string(),
        user_agent: "test-agent".to_string(),
    }
}

/// A settled inbound record with a chosen timestamp, for range tests.
pub fn inbound_record(created_at: DateTime<Utc>, body: &str) -> InboundWebhook {
    InboundWebhook {
        id: WebhookId::new(),
        method: "POST".to_string(),
        headers: btree(&[("content-type", "application/json")]),
        body: Some(body.to_string()),
        source_ip: "203.0.113.7".to_string(),
        user_agent: "test-agent".to_string(),
        processing_status: ProcessingStatus::Completed,
        response_status: Some(200),
        response_body: Some("ok".to_string()),
        created_at,
    }
}
