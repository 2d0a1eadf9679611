//! A webhook fan-out relay.
//!
//! This crate receives inbound HTTP webhooks, persists them, and relays
//! each one to every configured destination endpoint, optionally mirroring
//! the designated **primary** endpoint's response back to the original
//! sender. Previously received webhooks can be replayed — individually or
//! by time range — against the current endpoint configuration.
//!
//! ## Guarantees
//! - Per-endpoint isolation: one endpoint's failure or slow response never
//!   prevents delivery attempts to the others
//! - One outgoing audit record per delivery attempt, success or failure
//! - The inbound record exists before any fan-out is attempted
//! - All deliveries complete before the sender gets a response
//!
//! ## Non-Guarantees
//! - Guaranteed delivery or retries
//! - Exactly-once semantics
//! - Signature verification of inbound payloads
//!
//! Storage is pluggable: an in-memory backend for tests and single-process
//! deployments, and a Postgres backend behind the `postgres` feature.

mod error;
mod fanout;
mod receiver;
mod registry;
mod replay;
mod server;
mod storage;
mod types;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use error::{FanoutError, StorageError};
pub use fanout::{merge_headers, resolve_outcome, FanoutConfig, FanoutEngine};
pub use receiver::{CallerResponse, InboundReceiver, InboundRequest};
pub use registry::EndpointRegistry;
pub use replay::ReplayEngine;
pub use server::{router, serve, AppState, ServerConfig};
pub use storage::{InMemoryStorage, Storage};
pub use types::{
    DeliveryLogEntry, DeliveryResult, Direction, Endpoint, EndpointId, EndpointPatch,
    InboundWebhook, LogQuery, NewEndpoint, NewLogEntry, PageQuery, ProcessingStatus,
    ReplayOutcome, WebhookId, DEFAULT_PAGE_SIZE,
};

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresStorage;
