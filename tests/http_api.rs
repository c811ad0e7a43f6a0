mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use meteo_kb::api;
use meteo_kb::app_state::{KnowledgeState, WeatherState};
use meteo_kb::config::{CorsOrigins, ServerConfig, WeatherConfig};
use meteo_kb::open_meteo::{ForecastApi, ForecastRequest, ForecastResponse};
use meteo_kb::weather_api;
use meteo_kb::weather_service::WeatherService;
use serde_json::{json, Value};
use tower::ServiceExt;
use url::Url;

use common::{harness, kb_config};

const BOUNDARY: &str = "meteo-kb-boundary";
const LONG_TEXT: &str = "Rust ownership rules and the borrow checker keep memory safe. \
                         Lifetimes describe how long references stay valid.";

fn kb_router(dir: &std::path::Path) -> Router {
    let h = harness(dir);
    api::create_router(KnowledgeState::new(kb_config(dir), h.kb))
}

fn multipart_request(field: &str, filename: &str, content: &str) -> Request<Body> {
    let body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         {content}\r\n\
         --{BOUNDARY}--\r\n"
    );
    Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

// --- Base de conocimiento ---

#[tokio::test]
async fn multipart_upload_stores_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let app = kb_router(dir.path());

    let (status, body) = send(&app, multipart_request("file", "notas.txt", LONG_TEXT)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "File processed successfully", "filename": "notas.txt" }));
    assert!(dir.path().join("notas.txt").is_file());

    let (status, docs) = send(&app, get("/documents")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(docs[0]["filename"], "notas.txt");
}

#[tokio::test]
async fn upload_without_file_field_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = kb_router(dir.path());

    let (status, body) = send(&app, multipart_request("attachment", "notas.txt", LONG_TEXT)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "detail": "No file provided" }));
    assert!(!dir.path().join("notas.txt").exists());
}

#[tokio::test]
async fn upload_that_is_not_multipart_gets_json_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = kb_router(dir.path());

    let (status, body) = send(&app, json_request(Method::POST, "/upload", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn deleting_missing_document_returns_detail_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = kb_router(dir.path());

    let request = Request::builder()
        .method(Method::DELETE)
        .uri("/document/nada.pdf")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "detail": "File not found" }));
}

#[tokio::test]
async fn delete_with_encoded_separator_does_not_touch_other_file() {
    let dir = tempfile::tempdir().unwrap();
    let app = kb_router(dir.path());
    send(&app, multipart_request("file", "b.txt", LONG_TEXT)).await;

    let request = Request::builder()
        .method(Method::DELETE)
        .uri("/document/a%2Fb.txt")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(dir.path().join("b.txt").is_file());
}

#[tokio::test]
async fn settings_reject_overlap_not_smaller_than_size() {
    let dir = tempfile::tempdir().unwrap();
    let app = kb_router(dir.path());

    let bad = json!({ "chunkSize": 100, "chunkOverlap": 100 });
    let (status, body) = send(&app, json_request(Method::POST, "/settings", bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("chunkOverlap"));

    let (_, current) = send(&app, get("/settings")).await;
    assert_eq!(current, json!({ "chunkSize": 1000, "chunkOverlap": 200 }));

    let (status, body) = send(&app, json_request(Method::POST, "/settings", json!({ "chunkSize": 10 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn new_settings_only_affect_later_uploads() {
    let dir = tempfile::tempdir().unwrap();
    let app = kb_router(dir.path());

    send(&app, multipart_request("file", "antes.txt", LONG_TEXT)).await;
    let small = json!({ "chunkSize": 40, "chunkOverlap": 0 });
    let (status, _) = send(&app, json_request(Method::POST, "/settings", small.clone())).await;
    assert_eq!(status, StatusCode::OK);
    send(&app, multipart_request("file", "despues.txt", LONG_TEXT)).await;

    let (_, before) = send(&app, get("/chunks?filename=antes.txt")).await;
    let (_, after) = send(&app, get("/chunks?filename=despues.txt")).await;
    assert_eq!(before.as_array().unwrap().len(), 1);
    assert!(after.as_array().unwrap().len() > 1);
    assert_eq!(send(&app, get("/settings")).await.1, small);
}

#[tokio::test]
async fn search_without_query_gets_json_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = kb_router(dir.path());

    let (status, body) = send(&app, get("/search?limit=3")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

// --- Proxy meteorológico ---

/// Open-Meteo inalcanzable: las rutas probadas aquí no deben llamarlo.
struct OfflineApi;

#[async_trait]
impl ForecastApi for OfflineApi {
    async fn forecast(&self, _request: &ForecastRequest) -> Result<ForecastResponse> {
        Err(anyhow!("sin conexión"))
    }
}

fn weather_router() -> Router {
    let config = WeatherConfig {
        server: ServerConfig {
            server_addr: "127.0.0.1:0".to_string(),
            http_timeout: Duration::from_secs(5),
            cors_origins: CorsOrigins::Any,
        },
        forecast_url: Url::parse("http://127.0.0.1:9/v1/forecast").unwrap(),
        timezone: "Asia/Singapore".to_string(),
        past_days: 5,
        forecast_days: 3,
    };
    let weather = WeatherService::from_config(Arc::new(OfflineApi), &config);
    weather_api::create_router(WeatherState { config, weather })
}

#[tokio::test]
async fn malformed_dms_names_the_expected_format() {
    let app = weather_router();
    let example = r#"35°52'59.9"N 76°30'48.4"E"#;

    for uri in [
        "/api/v1/weather/current/dms?coordinates=35.5N%2076E",
        "/api/v1/weather/current/dms",
    ] {
        let (status, body) = send(&app, get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(body["detail"].as_str().unwrap().contains(example), "{uri}");
    }
}

#[tokio::test]
async fn missing_coordinates_get_json_error() {
    let app = weather_router();

    let (status, body) = send(&app, get("/api/v1/weather/current?lat=1.3")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn upstream_failure_is_a_500_with_detail() {
    let app = weather_router();

    let (status, body) = send(&app, get("/api/v1/weather/daily?lat=1.3&lon=103.8")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "detail": "sin conexión" }));
}
