use std::future::Future;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use scan_console::backend::{ScanBackend, ScanRequest, StartResponse};
use scan_console::engine::Console;
use scan_console::error::ConsoleError;
use scan_console::history::{History, MemoryBackend};
use scan_console::server::{self, AppState};
use scan_console::stats::DashboardSnapshot;

struct FixedBackend;

impl ScanBackend for FixedBackend {
    fn start_scan(
        &self,
        request: &ScanRequest,
    ) -> impl Future<Output = Result<StartResponse, ConsoleError>> + Send {
        let reply = if request.target == "busy.example" {
            StartResponse {
                status: "busy".into(),
                scan_id: None,
            }
        } else {
            StartResponse {
                status: "started".into(),
                scan_id: Some("s1".into()),
            }
        };
        async move { Ok(reply) }
    }

    fn dashboard_stats(&self) -> impl Future<Output = Result<DashboardSnapshot, ConsoleError>> + Send {
        async { Ok(DashboardSnapshot::default()) }
    }

    fn report_url(&self, scan_id: &str) -> String {
        format!("http://backend/api/scan/{scan_id}/report?format=html")
    }
}

fn app(ui: &tempfile::TempDir) -> Router {
    let console = Console::new(History::new(MemoryBackend::new()));
    server::router(AppState::new(console, FixedBackend), ui.path())
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn idle_status_and_no_results() {
    let ui = tempfile::tempdir().unwrap();
    let app = app(&ui);

    let (status, body) = call(&app, Method::GET, "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    assert_eq!(body["active"], Value::Null);

    let (status, _) = call(&app, Method::GET, "/api/results", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn blank_target_is_rejected() {
    let ui = tempfile::tempdir().unwrap();
    let app = app(&ui);
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/scan",
        Some(json!({"type": "port_scan", "target": "  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let (_, history) = call(&app, Method::GET, "/api/history", None).await;
    assert_eq!(history, json!([]));
}

#[tokio::test]
async fn scan_lifecycle_over_http() {
    let ui = tempfile::tempdir().unwrap();
    let app = app(&ui);

    let (status, session) = call(
        &app,
        Method::POST,
        "/api/scan",
        Some(json!({"type": "port_scan", "target": "10.0.0.1", "ports": "1-1024"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(session["id"], "s1");
    assert_eq!(session["status"], "running");

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/events",
        Some(json!({"event": "scan_progress", "data": {"scan_id": "s1", "progress": "60", "current_task": "probing"}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, body) = call(&app, Method::GET, "/api/status", None).await;
    assert_eq!(body["state"], "running");
    assert_eq!(body["active"]["progress"], 60);
    assert_eq!(body["active"]["current_task"], "probing");

    call(
        &app,
        Method::POST,
        "/api/events",
        Some(json!({"event": "scan_complete", "data": {
            "scan_id": "s1",
            "results": {"ports": {"22": {"status": "open", "service": "ssh"}}}
        }})),
    )
    .await;

    let (status, view) = call(&app, Method::GET, "/api/results", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["kind"], "ports");
    assert_eq!(view["rows"][0]["port"], 22);

    let (_, history) = call(&app, Method::GET, "/api/history", None).await;
    assert_eq!(history[0]["status"], "completed");

    let (_, stats) = call(&app, Method::GET, "/api/stats", None).await;
    assert_eq!(stats["local"]["open_ports"], 1);

    let (_, feed) = call(&app, Method::GET, "/api/activity", None).await;
    assert_eq!(feed[0]["kind"], "success");
}

#[tokio::test]
async fn declined_start_is_bad_gateway() {
    let ui = tempfile::tempdir().unwrap();
    let app = app(&ui);
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/scan",
        Some(json!({"type": "network_scan", "target": "busy.example"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "transport");
}

#[tokio::test]
async fn unknown_session_is_not_found_and_uncached() {
    let ui = tempfile::tempdir().unwrap();
    let app = app(&ui);
    let resp = app
        .clone()
        .oneshot(Request::get("/api/scan/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");
}

#[tokio::test]
async fn malformed_frame_is_a_bad_request() {
    let ui = tempfile::tempdir().unwrap();
    let app = app(&ui);
    let (status, _) = call(
        &app,
        Method::POST,
        "/api/events",
        Some(json!({"event": "scan_complete", "data": {"report_path": "x"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/events",
        Some(json!({"event": "heartbeat"})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn static_ui_is_served_as_fallback() {
    let ui = tempfile::tempdir().unwrap();
    std::fs::write(ui.path().join("index.html"), "<h1>console</h1>").unwrap();
    let app = app(&ui);
    let resp = app
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"<h1>console</h1>");
}
