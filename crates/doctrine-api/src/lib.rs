//! Doctrine API
//!
//! Thin axum adapter over [`doctrine_core::Enforcer`]. It exposes the two core
//! interfaces (enforce a candidate, format a record for a sink) plus the
//! administrative surface: schema descriptions, the violation log, health and
//! Prometheus metrics.
//!
//! ## Routes
//!
//! - `POST /v1/enforce` - enforce a candidate (strict violation → 422)
//! - `POST /v1/format` - enforce, then project to the requested sinks and
//!   wrap for the requested write targets
//! - `POST /v1/normalize` - map a stored sink row back to a base record
//! - `GET /v1/schemas` / `GET /v1/schemas/:kind` - contract descriptions
//! - `GET /v1/violations`, `GET /v1/violations/summary`, `DELETE /v1/violations`
//! - `GET /health`, `GET /metrics`

pub mod middleware;
pub mod routes;

pub use routes::{create_router, ApiError, AppState};

use doctrine_core::{Envelope, FieldSpec, SchemaKind, Sink, SinkProjection, WriteTarget};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the operation was successful
    pub success: bool,
    /// Response data (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error information (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Request metadata for tracing
    pub metadata: ResponseMetadata,
}

impl<T> ApiResponse<T> {
    /// Create a successful response
    pub fn success(data: T, request_id: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: ResponseMetadata::new(request_id),
        }
    }

    /// Create an error response
    pub fn error(error: ErrorInfo, request_id: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(error),
            metadata: ResponseMetadata::new(request_id),
        }
    }
}

/// Error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Response metadata for tracing and debugging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub request_id: String,
    /// Timestamp of response generation (RFC 3339)
    pub timestamp: String,
    pub version: String,
}

impl ResponseMetadata {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn default_operation() -> String {
    "api".to_string()
}

/// Body of `POST /v1/enforce`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforceRequest {
    /// Candidate record, any JSON
    pub candidate: serde_json::Value,
    #[serde(default)]
    pub kind: SchemaKind,
    /// Producing tool
    pub tool: String,
    #[serde(default = "default_operation")]
    pub operation: String,
}

/// Result of an enforcement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforceResult {
    /// `validated`, `repaired` or `bypassed`
    pub outcome: String,
    /// Validated or repaired record; the untouched candidate when bypassed
    pub record: serde_json::Value,
}

/// Body of `POST /v1/format`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatRequest {
    pub candidate: serde_json::Value,
    #[serde(default)]
    pub kind: SchemaKind,
    pub tool: String,
    #[serde(default = "default_operation")]
    pub operation: String,
    /// Target sinks; every sink when empty
    #[serde(default)]
    pub sinks: Vec<Sink>,
    /// Store locations to build write envelopes for
    #[serde(default)]
    pub envelopes: Vec<WriteTarget>,
}

/// Result of `POST /v1/format`
#[derive(Debug, Clone, Serialize)]
pub struct FormatResult {
    pub outcome: String,
    pub projections: Vec<SinkProjection>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub envelopes: Vec<Envelope>,
}

/// Body of `POST /v1/normalize`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeRequest {
    /// Stored sink row
    pub row: serde_json::Value,
}

/// Result of `POST /v1/normalize`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeResult {
    /// Layout the row was detected as
    pub sink: Sink,
    pub record: serde_json::Value,
}

/// Contract description returned by `GET /v1/schemas/:kind`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub kind: SchemaKind,
    pub fields: Vec<FieldSpec>,
}

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub enforcement_enabled: bool,
    pub strict_mode: bool,
    pub violations: usize,
}

/// Bind `addr` and serve the router until the process is stopped
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Doctrine API listening");
    axum::serve(listener, create_router(state)).await
}
