//! Router tests: caller errors are rejected before the (lazy, never-connected) pool is used.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use partnerbase::{app, connect_lazy, parse_schema, resolve, AppState, Registry, Settings};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn state() -> AppState {
    let settings = Settings {
        database_url: "postgres://localhost:1/partnerbase_unreachable".into(),
        ..Settings::default()
    };
    let schema = resolve(&parse_schema(include_str!("fixtures/schema.json")).unwrap()).unwrap();
    let pool = connect_lazy(&settings).unwrap();
    AppState::new(pool, Registry::new(Arc::new(schema)), settings)
}

async fn send(req: Request<Body>) -> (StatusCode, Value) {
    let resp = app(state()).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn get(uri: &str) -> (StatusCode, Value) {
    send(Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn send_json(method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(req).await
}

fn code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn health_needs_no_database() {
    let (status, body) = get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn unknown_entity_is_not_found() {
    let (status, body) = get("/widgets").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(code(&body), "not_found");
}

#[tokio::test]
async fn unknown_operator_is_rejected() {
    let (status, body) = get("/partners?name__regex=acme").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(code(&body), "invalid_filter");
    assert!(body["error"]["message"].as_str().unwrap().contains("regex"));
}

#[tokio::test]
async fn bad_relationship_path_names_the_path() {
    let (status, body) = get("/partners?owner___company___name=acme").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("owner___company"));
}

#[tokio::test]
async fn malformed_date_filter_is_rejected() {
    let (status, body) = get("/users?birthday__gte=31-12-1990").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(code(&body), "invalid_date_format");
}

#[tokio::test]
async fn unknown_sort_field_and_include_are_rejected() {
    let (status, _) = get("/partners?sort=-nope").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get("/partners?include=name").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get("/partners?page=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn page_window_beyond_bigint_is_a_bad_request() {
    let (status, body) = get("/partners?page=9223372036854775807&per_page=10").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(code(&body), "bad_request");
}

#[tokio::test]
async fn empty_patch_is_no_update_data() {
    let (status, body) = send_json("PATCH", "/partners/p-1", "{}").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(code(&body), "no_update_data");
}

#[tokio::test]
async fn create_payload_must_be_a_typed_object() {
    let (status, body) = send_json("POST", "/partners", "[1, 2]").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(code(&body), "bad_request");

    let (status, _) = send_json("POST", "/partners", r#"{"name": "Acme", "rating": "high"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
