//! End-to-end requests against the router with the in-memory engine.

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use entity_rest::{app, load_from_str, resolve, AppState, MemoryStore};
use serde_json::{json, Value};
use tower::ServiceExt;

const SCHEMA: &str = r#"{
    "namespaces": [ { "id": "hr", "name": "hr" } ],
    "entities": [
        { "name": "Person", "namespace_id": "hr", "table": "person", "attributes": [
            { "name": "Id", "type": "integer", "nullable": false },
            { "name": "Name", "type": "text", "nullable": false },
            { "name": "Age", "type": "integer" },
            { "name": "Photo", "type": "blob" },
            { "name": "PhotoFileName", "type": "text" }
        ] }
    ]
}"#;

const BOUNDARY: &str = "entity-rest-test-boundary";

fn router_with_limit(json_body_limit: usize) -> Router {
    let registry = resolve(&load_from_str(SCHEMA).unwrap()).unwrap();
    app(AppState::new(registry, MemoryStore::new()), json_body_limit)
}

fn router() -> Router {
    router_with_limit(1024 * 1024)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, header::HeaderMap, Bytes) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, headers, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Bytes) {
    let (status, _, body) = send(app, Request::get(uri).body(Body::empty()).unwrap()).await;
    (status, body)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, _, body) = send(app, req).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn delete(app: &Router, uri: &str) -> StatusCode {
    let req = Request::delete(uri).body(Body::empty()).unwrap();
    send(app, req).await.0
}

fn multipart(field: &str, content: &[u8]) -> Body {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"upload.bin\"\r\n",
            field
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    Body::from(body)
}

async fn upload(app: &Router, uri: &str, field: &str, content: &[u8]) -> (StatusCode, Value) {
    let req = Request::post(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(multipart(field, content))
        .unwrap();
    let (status, _, body) = send(app, req).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

/// Ada 36, Bob 17, Cy 25, Di without an age; ids 1..=4.
async fn seeded() -> Router {
    let app = router();
    for body in [
        json!({"Name": "Ada", "Age": 36, "PhotoFileName": "ada.png"}),
        json!({"Name": "Bob", "Age": 17}),
        json!({"Name": "Cy", "Age": "25"}),
        json!({"Name": "Di", "Age": null}),
    ] {
        let (status, _) = send_json(&app, Method::POST, "/Person", body).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    app
}

fn names(body: &Value) -> Vec<&str> {
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["Name"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn health_and_version() {
    let app = router();
    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    let (status, body) = get_json(&app, "/version").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "entity-rest");
}

#[tokio::test]
async fn create_assigns_identity_and_ignores_supplied_id() {
    let app = seeded().await;
    let (status, body) = send_json(&app, Method::POST, "/Person", json!({"Id": 99, "Name": "Eve"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["Id"], 5);
    assert_eq!(body["data"]["Name"], "Eve");
    assert!(body["data"]["Age"].is_null());
    assert!(body["data"]["Photo"].is_null());

    let (status, body) = get_json(&app, "/Person(5)").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["Name"], "Eve");
}

#[tokio::test]
async fn list_filters_orders_pages_and_counts() {
    let app = seeded().await;

    let (status, body) = get_json(&app, "/Person?$filter=Age%20ge%2018&$orderby=Age%20desc&$count=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body), vec!["Ada", "Cy"]);
    assert_eq!(body["count"], 2);

    let (_, body) = get_json(&app, "/Person?$top=2&$skip=1").await;
    assert_eq!(names(&body), vec!["Bob", "Cy"]);
    assert!(body.get("count").is_none());

    let (_, body) = get_json(&app, "/Person?$orderby=Age").await;
    assert_eq!(names(&body), vec!["Bob", "Cy", "Ada", "Di"]);

    let (status, text) = get(&app, "/Person/$count?$filter=Age%20lt%2030").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&text[..], b"2");

    let (_, text) = get(&app, "/Person/$count").await;
    assert_eq!(&text[..], b"4");
}

#[tokio::test]
async fn request_errors_map_to_status_and_code() {
    let app = seeded().await;

    let (status, body) = get_json(&app, "/Animal").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_entity");

    let (status, body) = get_json(&app, "/Person?$filter=Age%20ge").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "malformed_filter");

    let (status, body) = get_json(&app, "/Person?$filter=Age%20eq%20'old'").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "type_mismatch");

    let (status, body) = get_json(&app, "/Person?$orderby=Age%20sideways").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "malformed_order");

    let (status, body) = get_json(&app, "/Person?$orderby=Nickname").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "unresolvable_attribute");

    let (status, body) = get_json(&app, "/Person?$skip=-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = get_json(&app, "/Person(42)").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, body) = send_json(&app, Method::POST, "/Person", json!({"Name": "x", "Age": "old"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "type_mismatch");

    let (status, body) = send_json(&app, Method::POST, "/Person", json!({"Age": 3})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (_, text) = get(&app, "/Person/$count").await;
    assert_eq!(&text[..], b"4");
}

#[tokio::test]
async fn unknown_keywords_are_malformed_requests() {
    let app = seeded().await;
    for uri in ["/$metadata", "/Person/$links", "/Person(1)/Name/$raw", "/Person?$expand=Photo"] {
        let (status, body) = get_json(&app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["error"]["code"], "malformed_request", "{}", uri);
    }
    let (_, body) = get_json(&app, "/Person/$links").await;
    assert_eq!(body["error"]["message"], "malformed request: Unknown keyword $links.");
}

#[tokio::test]
async fn count_rejects_paging_and_ordering_keys() {
    let app = seeded().await;
    for uri in [
        "/Person/$count?$top=1",
        "/Person/$count?$skip=1",
        "/Person/$count?$orderby=Age",
        "/Person/$count?$filter=Age%20lt%2030&$expand=Photo",
    ] {
        let (status, body) = get_json(&app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["error"]["code"], "malformed_request", "{}", uri);
    }
    let (_, body) = get_json(&app, "/Person/$count?$top=1").await;
    assert_eq!(body["error"]["message"], "malformed request: Unknown keyword $top.");

    let (status, text) = get(&app, "/Person/$count?tag=x").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&text[..], b"4");
}

#[tokio::test]
async fn collection_writes_are_unsupported() {
    let app = seeded().await;
    let (status, body) = send_json(&app, Method::PUT, "/Person", json!({"Name": "x"})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "unsupported");
    assert_eq!(delete(&app, "/Person").await, StatusCode::FORBIDDEN);
    let (status, _) = send_json(&app, Method::PUT, "/Person(1)/Name", json!("Ann")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn update_replaces_and_delete_removes() {
    let app = seeded().await;
    let (status, body) = send_json(&app, Method::PUT, "/Person(2)", json!({"Id": 7, "Name": "Robert", "Age": 18})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["Id"], 2);
    assert_eq!(body["data"]["Name"], "Robert");
    assert_eq!(body["data"]["Age"], 18);

    let (status, _) = send_json(&app, Method::PUT, "/Person(99)", json!({"Name": "ghost"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(delete(&app, "/Person(3)").await, StatusCode::NO_CONTENT);
    assert_eq!(delete(&app, "/Person(3)").await, StatusCode::NOT_FOUND);
    let (status, _) = get(&app, "/Person(3)").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, text) = get(&app, "/Person/$count").await;
    assert_eq!(&text[..], b"3");
}

#[tokio::test]
async fn single_properties_and_clone() {
    let app = seeded().await;
    let (status, body) = get_json(&app, "/Person(1)/Name").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"value": "Ada"}));

    let (status, text) = get(&app, "/Person(1)/Age/$value").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&text[..], b"36");
    let (_, text) = get(&app, "/Person(4)/Age/$value").await;
    assert!(text.is_empty());

    let (status, body) = get_json(&app, "/Person(1)/Nickname").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "unresolvable_attribute");

    let (status, body) = get_json(&app, "/Person(1)/Clone").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["Id"].is_null());
    assert_eq!(body["data"]["Name"], "Ada");
    assert_eq!(body["data"]["Age"], 36);
    let (status, _) = get_json(&app, "/Person(9)/Clone").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, text) = get(&app, "/Person/$count").await;
    assert_eq!(&text[..], b"4");
}

#[tokio::test]
async fn upload_then_download_round_trips() {
    let app = seeded().await;
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 253) as u8).collect();

    let (status, _, body) = send(&app, Request::get("/Person(1)/Photo/Download").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());

    let (status, body) = upload(&app, "/Person(1)/Photo/Upload", "file", &payload).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["length"], payload.len());

    let (status, headers, body) =
        send(&app, Request::get("/Person(1)/Photo/Download").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(headers[header::CONTENT_DISPOSITION], "attachment; filename=\"ada.png\"");
    assert_eq!(&body[..], &payload[..]);

    let (_, body) = get_json(&app, "/Person(1)").await;
    assert_eq!(body["data"]["Photo"]["length"], payload.len());

    // Saving the record again keeps the stored content.
    let (status, _) = send_json(&app, Method::PUT, "/Person(1)", json!({"Name": "Ada L", "Age": 37})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, headers, body) =
        send(&app, Request::get("/Person(1)/Photo/Download").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_DISPOSITION], "attachment");
    assert_eq!(&body[..], &payload[..]);
}

#[tokio::test]
async fn upload_rejections() {
    let app = seeded().await;

    let (status, body) = upload(&app, "/Person(1)/Photo/Upload", "attachment", b"abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = upload(&app, "/Person(1)/Name/Upload", "file", b"abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = upload(&app, "/Person(42)/Photo/Upload", "file", b"abc").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _, _) = send(&app, Request::get("/Person(1)/Photo/Download").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn oversized_json_bodies_are_refused() {
    let app = router_with_limit(64);
    let body = json!({"Name": "x".repeat(200)}).to_string();
    let req = Request::post("/Person")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
