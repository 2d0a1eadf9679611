use std::fmt;

use crate::types::{EndpointId, WebhookId};

/// Errors surfaced by the registry, receiver, and replay engine.
///
/// Transport-level delivery failures are *not* errors: the fan-out engine
/// folds them into per-endpoint `DeliveryResult`s and log rows. Only
/// conditions that prevent an operation from starting at all appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutError {
    /// A required field is missing or malformed.
    /// Surfaced as 400; never retried.
    Validation(String),

    /// An endpoint or webhook id does not resolve to a record.
    NotFound { kind: &'static str, id: String },

    /// A replay targeted an endpoint that exists but is inactive.
    InactiveEndpoint(EndpointId),

    /// An inbound webhook arrived with no active endpoints configured.
    /// Silently dropping it would be worse than surfacing the
    /// misconfiguration.
    NoActiveEndpoints,

    /// The persistence layer refused an operation the core cannot
    /// proceed without.
    Storage(StorageError),
}

impl FanoutError {
    pub fn endpoint_not_found(id: EndpointId) -> Self {
        FanoutError::NotFound {
            kind: "endpoint",
            id: id.to_string(),
        }
    }

    pub fn webhook_not_found(id: &WebhookId) -> Self {
        FanoutError::NotFound {
            kind: "webhook",
            id: id.to_string(),
        }
    }
}

impl fmt::Display for FanoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanoutError::Validation(message) =>
                write!(f, "{message}"),
            FanoutError::NotFound { kind, id } =>
                write!(f, "{kind} not found: {id}"),
            FanoutError::InactiveEndpoint(id) =>
                write!(f, "endpoint is not active: {id}"),
            FanoutError::NoActiveEndpoints =>
                write!(f, "no active endpoints configured"),
            FanoutError::Storage(err) =>
                write!(f, "storage failure: {err}"),
        }
    }
}

impl std::error::Error for FanoutError {}

impl From<StorageError> for FanoutError {
    fn from(err: StorageError) -> Self {
        FanoutError::Storage(err)
    }
}

/// Failure reported by a storage backend.
///
/// Carries the backend's own message; callers decide whether the write was
/// best-effort (log entries) or load-bearing (registry rows, inbound
/// records).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageError(pub String);

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for StorageError {}
