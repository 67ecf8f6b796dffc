//! End-to-end tests driving the router with in-memory requests.

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use server_faker::error::ProxyError;
use server_faker::proxy::{Dispatch, OutboundRequest, UpstreamResponse};
use server_faker::{ConfigError, FakerConfig, FakerServer, SpecError};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Records outbound requests and answers with a fixed response.
#[derive(Default)]
struct RecordingDispatcher {
    requests: Mutex<Vec<OutboundRequest>>,
}

impl RecordingDispatcher {
    fn recorded(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatch for RecordingDispatcher {
    async fn dispatch(&self, request: OutboundRequest) -> Result<UpstreamResponse, ProxyError> {
        self.requests.lock().unwrap().push(request);
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-upstream", HeaderValue::from_static("1"));
        Ok(UpstreamResponse {
            status: StatusCode::ACCEPTED,
            headers,
            body: Bytes::from_static(br#"{"upstream":true}"#),
        })
    }
}

fn router_from(json: &str, dispatcher: Arc<RecordingDispatcher>) -> Router {
    let config = FakerConfig::from_json(json).unwrap();
    let server = FakerServer::from_config(&config, Path::new("."), dispatcher).unwrap();
    Arc::new(server).router()
}

async fn send(router: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, HeaderMap, Bytes) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

fn json_body(bytes: &Bytes) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn static_body_is_served_verbatim() {
    let router = router_from(
        r#"{"endpoints": [{"url": "/test", "method": "GET",
            "response": {"status": 200, "type": "static", "format": "json", "static": {"test": "value"}}}]}"#,
        Arc::default(),
    );

    let (status, headers, body) = send(&router, Method::GET, "/test", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(br#"{"test":"value"}"#));
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
}

#[tokio::test]
async fn dynamic_array_of_static_values() {
    let router = router_from(
        r#"{"endpoints": [{"url": "/test", "method": "GET",
            "response": {"type": "dynamic", "format": "json", "object": [
                {"key": "array", "array": {"min": 1, "max": 1, "element": [{"static": {"value": "value"}}]}}
            ]}}]}"#,
        Arc::default(),
    );

    let (status, _, body) = send(&router, Method::GET, "/test", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!({"array": ["value"]}));
}

#[tokio::test]
async fn dynamic_object_of_static_children() {
    let router = router_from(
        r#"{"endpoints": [{"url": "/test", "method": "GET",
            "response": {"status": 201, "type": "dynamic", "format": "json", "object": [
                {"key": "name", "static": {"value": "name"}},
                {"key": "value", "static": {"value": "value"}}
            ]}}]}"#,
        Arc::default(),
    );

    let (status, _, body) = send(&router, Method::GET, "/test", "").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json_body(&body), json!({"name": "name", "value": "value"}));
}

#[test]
fn empty_key_fails_compilation() {
    let config = FakerConfig::from_json(
        r#"{"endpoints": [{"url": "/test", "method": "GET",
            "response": {"type": "dynamic", "format": "json", "object": [
                {"key": "name", "static": {"value": "name"}},
                {"static": {"value": "value"}}
            ]}}]}"#,
    )
    .unwrap();

    let result = FakerServer::from_config(&config, Path::new("."), Arc::new(RecordingDispatcher::default()));
    match result {
        Err(ConfigError::Compile(errors)) => {
            assert_eq!(errors.len(), 1);
            let SpecError::Endpoint { source, .. } = &errors[0] else {
                panic!("expected endpoint context, got {:?}", errors[0]);
            };
            assert!(matches!(**source, SpecError::EmptyKey { .. }));
            assert!(errors[0].to_string().contains("empty"));
        }
        Err(other) => panic!("expected compile failure, got {other}"),
        Ok(_) => panic!("expected compile failure"),
    }
}

#[tokio::test]
async fn mapped_values_from_body_query_and_url() {
    let router = router_from(
        r#"{"endpoints": [{"url": "/orders/:order/items", "method": "POST",
            "response": {"type": "dynamic", "format": "json", "object": [
                {"key": "order", "mapped": {"from": "url", "param": "order", "as": "number"}},
                {"key": "second", "mapped": {"from": "query", "param": "id", "index": 1}},
                {"key": "customer", "mapped": {"from": "body", "path": "$.customer.name"}},
                {"key": "total", "mapped": {"from": "body", "path": "$.total", "as": "text"}},
                {"key": "codes", "array": {"min": 2, "max": 2, "element": [
                    {"random": {"type": "string-numeric", "min": 4, "max": 4}}
                ]}}
            ]}}]}"#,
        Arc::default(),
    );

    let (status, _, body) = send(
        &router,
        Method::POST,
        "/orders/12/items?id=a&id=b",
        r#"{"customer": {"name": "Ann"}, "total": 9.5}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let body = json_body(&body);
    assert_eq!(body["order"], json!(12));
    assert_eq!(body["second"], json!("b"));
    assert_eq!(body["customer"], json!("Ann"));
    assert_eq!(body["total"], json!("9.5"));
    let codes = body["codes"].as_array().unwrap();
    assert_eq!(codes.len(), 2);
    assert!(codes
        .iter()
        .all(|c| c.as_str().unwrap().len() == 4 && c.as_str().unwrap().bytes().all(|b| b.is_ascii_digit())));
}

#[tokio::test]
async fn extraction_failures_use_error_shape() {
    let router = router_from(
        r#"{"endpoints": [{"url": "/search", "method": "POST",
            "response": {"type": "dynamic", "format": "json", "object": [
                {"key": "q", "mapped": {"from": "body", "path": "$.query"}}
            ]}}]}"#,
        Arc::default(),
    );

    let (status, _, body) = send(&router, Method::POST, "/search", "not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = json_body(&body);
    assert_eq!(body["title"], "Provided value for param is empty");
    assert_eq!(body["url"], "/search");
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);

    let (status, _, body) = send(&router, Method::POST, "/search", r#"{"other": 1}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json_body(&body)["errors"][0]["details"]
        .as_str()
        .unwrap()
        .contains("$.query"));
}

#[tokio::test]
async fn unmatched_route_is_not_found() {
    let router = router_from(
        r#"{"endpoints": [{"url": "/only", "method": "GET",
            "response": {"type": "static", "format": "json", "static": 1}}]}"#,
        Arc::default(),
    );

    let (status, _, body) = send(&router, Method::GET, "/missing", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["url"], "/missing");

    let (status, _, _) = send(&router, Method::DELETE, "/only", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dynamic_proxy_templates_outbound_request() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let router = router_from(
        r#"{"endpoints": [{"url": "/users/:id", "method": "POST", "proxy": {
            "url": "http://upstream.local/accounts/:account/profile",
            "method": "PUT",
            "type": "dynamic",
            "headers": {"X-Api-Key": "secret"},
            "url_params": [{"key": "account", "mapped": {"from": "url", "param": "id"}}],
            "query_params": [
                {"key": "source", "static": {"value": "faker"}},
                {"key": "tag", "array": {"min": 2, "max": 2, "element": [{"static": {"value": 7}}]}}
            ],
            "object": [
                {"key": "name", "mapped": {"from": "body", "path": "$.name"}},
                {"key": "kind", "static": {"value": "user"}}
            ]}}]}"#,
        dispatcher.clone(),
    );

    let (status, headers, body) = send(&router, Method::POST, "/users/15", r#"{"name": "Ann"}"#).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(headers.get("x-upstream").unwrap(), "1");
    assert_eq!(json_body(&body), json!({"upstream": true}));

    let recorded = dispatcher.recorded();
    assert_eq!(recorded.len(), 1);
    let request = &recorded[0];
    assert_eq!(request.method, Method::PUT);
    assert_eq!(
        request.url.as_str(),
        "http://upstream.local/accounts/15/profile?source=faker&tag=7&tag=7"
    );
    assert_eq!(request.headers.get("x-api-key").unwrap(), "secret");
    let payload: Value = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
    assert_eq!(payload, json!({"name": "Ann", "kind": "user"}));
}

#[tokio::test]
async fn proxy_payload_failure_is_not_dispatched() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let router = router_from(
        r#"{"endpoints": [{"url": "/p", "method": "POST", "proxy": {
            "url": "http://upstream.local/p", "method": "POST", "type": "dynamic",
            "object": [{"key": "id", "mapped": {"from": "body", "path": "$.id"}}]}}]}"#,
        dispatcher.clone(),
    );

    let (status, _, body) = send(&router, Method::POST, "/p", "{}").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["title"], "Payload generation failed");
    assert!(dispatcher.recorded().is_empty());
}

#[tokio::test]
async fn static_proxy_forwards_inbound_body() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let router = router_from(
        r#"{"endpoints": [{"url": "/forward/*", "method": "POST", "proxy": {
            "url": "http://upstream.local/target?fixed=1", "method": "PATCH", "type": "static"}}]}"#,
        dispatcher.clone(),
    );

    let (status, _, _) = send(&router, Method::POST, "/forward/a/b", r#"{"raw": true}"#).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let recorded = dispatcher.recorded();
    assert_eq!(recorded[0].method, Method::PATCH);
    assert_eq!(recorded[0].url.as_str(), "http://upstream.local/target?fixed=1");
    assert_eq!(recorded[0].body.as_deref(), Some(br#"{"raw": true}"#.as_slice()));
    assert_eq!(recorded[0].headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
}

#[test]
fn endpoint_file_loads_relative_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("users.json"), r#"[{"id": 1}]"#).unwrap();
    let config_path = dir.path().join("endpoints.yaml");
    std::fs::write(
        &config_path,
        "endpoints:\n  - url: /users\n    method: GET\n    response:\n      type: static\n      format: json\n      file: users.json\n",
    )
    .unwrap();

    let server = FakerServer::from_file(&config_path, Arc::new(RecordingDispatcher::default())).unwrap();
    assert_eq!(server.endpoints().len(), 1);
}
