//! Route definitions and handlers

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use doctrine_core::{
    detect_sink, normalize, DoctrineConfig, DoctrineError, Enforcement, Enforcer, MetricsRegistry,
    SchemaKind, Sink, ViolationReason, ViolationRecord, ViolationSummary,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::request_logging_middleware;
use crate::{
    ApiResponse, EnforceRequest, EnforceResult, ErrorInfo, FormatRequest, FormatResult, HealthResponse,
    NormalizeRequest, NormalizeResult, SchemaDescription,
};

/// State shared across all routes
#[derive(Clone)]
pub struct AppState {
    pub enforcer: Arc<Enforcer>,
    pub metrics: MetricsRegistry,
    /// Start time for uptime calculation
    pub start_time: Instant,
}

impl AppState {
    /// Build an enforcer from `config`, wired to a fresh metrics registry
    pub fn new(config: DoctrineConfig) -> Self {
        let metrics = MetricsRegistry::default();
        let enforcer = Enforcer::builder()
            .config(config)
            .metrics(metrics.metrics().clone())
            .build();
        Self::with_enforcer(Arc::new(enforcer), metrics)
    }

    pub fn with_enforcer(enforcer: Arc<Enforcer>, metrics: MetricsRegistry) -> Self {
        Self {
            enforcer,
            metrics,
            start_time: Instant::now(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(DoctrineConfig::default())
    }
}

/// API error types
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// Strict-mode rejection
    ContractViolation {
        tool: String,
        operation: String,
        reason: ViolationReason,
    },
    /// A record that cannot be projected or normalized
    Unprocessable(String),
    InternalError(String),
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::ContractViolation { .. } => "CONTRACT_VIOLATION",
            ApiError::Unprocessable(_) => "UNPROCESSABLE",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ContractViolation { .. } | ApiError::Unprocessable(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DoctrineError> for ApiError {
    fn from(err: DoctrineError) -> Self {
        match err {
            DoctrineError::ContractViolation {
                tool,
                operation,
                reason,
            } => ApiError::ContractViolation {
                tool,
                operation,
                reason,
            },
            other @ (DoctrineError::MissingToolName | DoctrineError::InvalidIdentifier(_)) => {
                ApiError::BadRequest(other.to_string())
            }
            other @ DoctrineError::SinkMismatch { .. } => ApiError::Unprocessable(other.to_string()),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_info = match &self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Unprocessable(msg)
            | ApiError::InternalError(msg) => ErrorInfo::new(self.error_code(), msg),
            // The failing value is left out; it may be a secret
            ApiError::ContractViolation {
                tool,
                operation,
                reason,
            } => ErrorInfo::new(self.error_code(), reason.to_string()).with_details(json!({
                "tool": tool,
                "operation": operation,
                "field": reason.field(),
                "rule": reason.rule(),
            })),
        };

        let response = ApiResponse::<()>::error(error_info, uuid::Uuid::new_v4().to_string());
        (status, Json(response)).into_response()
    }
}

/// Create the router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Core interfaces
        .route("/v1/enforce", post(enforce))
        .route("/v1/format", post(format_record))
        .route("/v1/normalize", post(normalize_row))
        // Contracts
        .route("/v1/schemas", get(list_schemas))
        .route("/v1/schemas/:kind", get(describe_schema))
        // Violation log
        .route("/v1/violations", get(list_violations).delete(clear_violations))
        .route("/v1/violations/summary", get(violation_summary))
        // Health and metrics
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// POST /v1/enforce
pub async fn enforce(
    State(state): State<AppState>,
    Json(request): Json<EnforceRequest>,
) -> Result<Json<ApiResponse<EnforceResult>>, ApiError> {
    let outcome = state.enforcer.enforce(
        request.candidate,
        &request.kind,
        &request.tool,
        &request.operation,
    )?;

    let result = EnforceResult {
        outcome: outcome.outcome().to_string(),
        record: outcome.into_value(),
    };
    Ok(Json(ApiResponse::success(result, request_id())))
}

/// POST /v1/format
pub async fn format_record(
    State(state): State<AppState>,
    Json(request): Json<FormatRequest>,
) -> Result<Json<ApiResponse<FormatResult>>, ApiError> {
    let enforcer = &state.enforcer;
    for target in &request.envelopes {
        target.validate()?;
    }
    let outcome = enforcer.enforce(
        request.candidate,
        &request.kind,
        &request.tool,
        &request.operation,
    )?;
    let label = outcome.outcome().to_string();

    let record = match outcome {
        Enforcement::Validated(record) | Enforcement::Repaired(record) => record,
        Enforcement::Bypassed(value) => enforcer
            .validator()
            .validate(&value, &request.kind)
            .map_err(|reason| {
                ApiError::Unprocessable(format!("bypassed candidate is not well-formed: {}", reason))
            })?,
    };

    let sinks = if request.sinks.is_empty() {
        Sink::ALL.to_vec()
    } else {
        request.sinks
    };
    let projections = sinks
        .into_iter()
        .map(|sink| enforcer.format(&record, sink))
        .collect::<Result<Vec<_>, _>>()?;
    let envelopes = request
        .envelopes
        .iter()
        .map(|target| enforcer.envelope(&record, target))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ApiResponse::success(
        FormatResult {
            outcome: label,
            projections,
            envelopes,
        },
        request_id(),
    )))
}

/// POST /v1/normalize
pub async fn normalize_row(
    Json(request): Json<NormalizeRequest>,
) -> Result<Json<ApiResponse<NormalizeResult>>, ApiError> {
    let sink = request
        .row
        .as_object()
        .map(detect_sink)
        .ok_or_else(|| ApiError::BadRequest("row must be a JSON object".to_string()))?;
    let record = normalize(&request.row).map_err(|reason| ApiError::Unprocessable(reason.to_string()))?;

    Ok(Json(ApiResponse::success(
        NormalizeResult {
            sink,
            record: record.to_value(),
        },
        request_id(),
    )))
}

/// GET /v1/schemas
pub async fn list_schemas(State(state): State<AppState>) -> Json<ApiResponse<Vec<SchemaKind>>> {
    Json(ApiResponse::success(state.enforcer.contracts().kinds(), request_id()))
}

/// GET /v1/schemas/:kind
pub async fn describe_schema(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<ApiResponse<SchemaDescription>>, ApiError> {
    let kind = SchemaKind::new(kind);
    let fields = state
        .enforcer
        .contracts()
        .describe(&kind)
        .ok_or_else(|| ApiError::NotFound(format!("Schema '{}' not found", kind)))?
        .to_vec();

    Ok(Json(ApiResponse::success(SchemaDescription { kind, fields }, request_id())))
}

/// GET /v1/violations
pub async fn list_violations(State(state): State<AppState>) -> Json<ApiResponse<Vec<ViolationRecord>>> {
    Json(ApiResponse::success(state.enforcer.list_violations(), request_id()))
}

/// GET /v1/violations/summary
pub async fn violation_summary(State(state): State<AppState>) -> Json<ApiResponse<ViolationSummary>> {
    Json(ApiResponse::success(state.enforcer.violation_summary(), request_id()))
}

/// DELETE /v1/violations
pub async fn clear_violations(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let removed = state.enforcer.clear_violations();
    Json(ApiResponse::success(json!({ "removed": removed }), request_id()))
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let enforcer = &state.enforcer;
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        enforcement_enabled: enforcer.is_enabled(),
        strict_mode: enforcer.is_strict(),
        violations: enforcer.violations().len(),
    })
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let body = state
        .metrics
        .encode_text()
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        let violation: ApiError = DoctrineError::ContractViolation {
            tool: "t".to_string(),
            operation: "o".to_string(),
            reason: ViolationReason::MissingField {
                field: "source_id".to_string(),
            },
        }
        .into();
        assert_eq!(violation.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(violation.error_code(), "CONTRACT_VIOLATION");

        let missing: ApiError = DoctrineError::MissingToolName.into();
        assert_eq!(missing.status_code(), StatusCode::BAD_REQUEST);

        let internal: ApiError = DoctrineError::NotInitialized.into();
        assert_eq!(internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_state_shares_metrics() {
        let state = AppState::default();
        let _ = state
            .enforcer
            .enforce(json!({}), &SchemaKind::BASE, "tool", "op");
        let text = state.metrics.encode_text().unwrap();
        assert!(text.contains("doctrine_violations_total"));
    }
}
