//! Integration tests for the doctrine HTTP surface

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use doctrine_api::{create_router, AppState};
use doctrine_core::DoctrineConfig;
use serde_json::{json, Value};
use tower::ServiceExt;

fn create_test_router() -> Router {
    create_router(AppState::default())
}

fn candidate() -> Value {
    json!({
        "source_id": "neon-sync",
        "process_id": "nightly-import",
        "validated": true,
        "execution_signature": "3f2a9c1e0b7d4a6f8e5c2b1a0d9f8e7c",
        "timestamp_last_touched": "2024-05-01T12:30:00Z",
        "data_payload": { "rows": 12 }
    })
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_enforce_validated() {
    let router = create_test_router();
    let (status, body) = send(
        &router,
        Method::POST,
        "/v1/enforce",
        Some(json!({ "candidate": candidate(), "tool": "neon-sync", "operation": "insert" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["outcome"], json!("validated"));
    assert_eq!(body["data"]["record"]["source_id"], json!("neon-sync"));
}

#[tokio::test]
async fn test_enforce_strict_violation_is_422() {
    let router = create_test_router();
    let mut bad = candidate();
    bad["source_id"] = json!("");

    let (status, body) = send(
        &router,
        Method::POST,
        "/v1/enforce",
        Some(json!({ "candidate": bad, "tool": "neon-sync" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("CONTRACT_VIOLATION"));
    assert_eq!(body["error"]["details"]["field"], json!("source_id"));
    assert_eq!(body["error"]["details"]["operation"], json!("api"));
}

#[tokio::test]
async fn test_enforce_lenient_repairs() {
    let state = AppState::new(DoctrineConfig::builder().strict(false).build().unwrap());
    let router = create_router(state);

    let (status, body) = send(
        &router,
        Method::POST,
        "/v1/enforce",
        Some(json!({ "candidate": { "rows": 1 }, "tool": "imo-creator" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], json!("repaired"));
    assert_eq!(body["data"]["record"]["validated"], json!(false));
    assert_eq!(body["data"]["record"]["data_payload"], json!({ "rows": 1 }));
}

#[tokio::test]
async fn test_enforce_empty_tool_is_400() {
    let router = create_test_router();
    let (status, _) = send(
        &router,
        Method::POST,
        "/v1/enforce",
        Some(json!({ "candidate": candidate(), "tool": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_format_selected_sinks() {
    let router = create_test_router();
    let (status, body) = send(
        &router,
        Method::POST,
        "/v1/format",
        Some(json!({
            "candidate": candidate(),
            "tool": "neon-sync",
            "sinks": ["relational", "columnar"]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let projections = body["data"]["projections"].as_array().unwrap();
    assert_eq!(projections.len(), 2);
    assert_eq!(projections[0]["sink"], json!("relational"));
    assert_eq!(projections[0]["fields"]["task_id"], json!("nightly-import"));
    assert_eq!(projections[1]["fields"]["analytics_approved"], json!(true));
}

#[tokio::test]
async fn test_format_with_envelopes() {
    let state = AppState::new(DoctrineConfig::builder().document_ttl_seconds(90).build().unwrap());
    let router = create_router(state);
    let (status, body) = send(
        &router,
        Method::POST,
        "/v1/format",
        Some(json!({
            "candidate": candidate(),
            "tool": "neon-sync",
            "sinks": ["document"],
            "envelopes": [
                { "sink": "document", "collection": "working_memory" },
                { "sink": "relational", "table": "shq_records" },
                { "sink": "columnar", "dataset": "analytics", "table": "records" }
            ]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let envelopes = body["data"]["envelopes"].as_array().unwrap();
    assert_eq!(envelopes.len(), 3);
    assert_eq!(envelopes[0]["sink"], json!("document"));
    assert_eq!(envelopes[0]["document"]["ttl"], json!(90));
    assert_eq!(envelopes[1]["sink"], json!("relational"));
    assert!(envelopes[1]["sql"].as_str().unwrap().starts_with("INSERT INTO shq_records"));
    assert_eq!(envelopes[2]["sink"], json!("columnar"));
    assert_eq!(envelopes[2]["rows"][0]["json"]["task_id"], json!("nightly-import"));
}

#[tokio::test]
async fn test_format_rejects_bad_envelope_target() {
    let router = create_test_router();
    let (status, body) = send(
        &router,
        Method::POST,
        "/v1/format",
        Some(json!({
            "candidate": candidate(),
            "tool": "neon-sync",
            "envelopes": [{ "sink": "relational", "table": "records; DROP TABLE x" }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("BAD_REQUEST"));
}

#[tokio::test]
async fn test_enforce_kind_is_case_insensitive() {
    let router = create_test_router();
    let mut task = candidate();
    task["data_payload"] = json!({ "title": "Import" });
    let (status, body) = send(
        &router,
        Method::POST,
        "/v1/enforce",
        Some(json!({ "candidate": task, "tool": "neon-sync", "kind": "Task" })),
    )
    .await;

    // Resolved to the task contract, so the failure is inside the payload
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]["details"]["field"]
        .as_str()
        .unwrap()
        .starts_with("data_payload."));
}

#[tokio::test]
async fn test_normalize() {
    let router = create_test_router();
    let row = json!({
        "source_id": "neon-sync",
        "task_id": "nightly-import",
        "approved": false,
        "migrated_to": null,
        "process_signature": "3f2a9c1e0b7d4a6f8e5c2b1a0d9f8e7c",
        "event_timestamp": "2024-05-01T12:30:00Z",
        "data_payload": { "rows": 12 }
    });

    let (status, body) = send(&router, Method::POST, "/v1/normalize", Some(json!({ "row": row }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["sink"], json!("relational"));
    assert_eq!(body["data"]["record"]["process_id"], json!("nightly-import"));

    let (status, _) = send(
        &router,
        Method::POST,
        "/v1/normalize",
        Some(json!({ "row": { "task_id": "t", "approved": true } })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_describe_schema() {
    let router = create_test_router();
    let (status, body) = send(&router, Method::GET, "/v1/schemas/task", None).await;
    assert_eq!(status, StatusCode::OK);
    let fields = body["data"]["fields"].as_array().unwrap();
    assert!(fields.iter().any(|f| f["name"] == json!("command_id")));

    let (status, body) = send(&router, Method::GET, "/v1/schemas/invoice", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!("NOT_FOUND"));
}

#[tokio::test]
async fn test_violations_listed_in_order_and_cleared() {
    let router = create_test_router();
    for tool in ["first", "second", "third"] {
        let (status, _) = send(
            &router,
            Method::POST,
            "/v1/enforce",
            Some(json!({ "candidate": {}, "tool": tool })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    let (_, body) = send(&router, Method::GET, "/v1/violations", None).await;
    let tools: Vec<_> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["tool"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(tools, vec!["first", "second", "third"]);

    let (_, body) = send(&router, Method::GET, "/v1/violations/summary", None).await;
    assert_eq!(body["data"]["total"], json!(3));

    let (status, body) = send(&router, Method::DELETE, "/v1/violations", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removed"], json!(3));

    let (_, body) = send(&router, Method::GET, "/v1/violations", None).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_health_and_metrics() {
    let router = create_test_router();
    let (status, body) = send(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["strict_mode"], json!(true));

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("doctrine_"));
}
