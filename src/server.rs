use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Path as UrlPath, State},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    backend::{ScanBackend, ScanRequest},
    channel,
    engine::{Activity, Console},
    error::ConsoleError,
    events::Event,
    render::ResultView,
    types::{HistoryEntry, ScanSession, ScanStatus},
};

pub struct AppState<B> {
    inner: Arc<RwLock<Console>>, // one writer at a time: every transition runs to completion
    backend: Arc<B>,
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            backend: self.backend.clone(),
        }
    }
}

impl<B: ScanBackend + 'static> AppState<B> {
    pub fn new(console: Console, backend: B) -> Self {
        Self {
            inner: Arc::new(RwLock::new(console)),
            backend: Arc::new(backend),
        }
    }

    /// Apply one event under the write lock, logging what it returns.
    pub async fn apply(&self, event: Event) {
        let mut console = self.inner.write().await;
        match console.handle(event) {
            Ok(()) | Err(ConsoleError::BackendReported { .. }) => {}
            Err(e) => warn!(kind = e.kind(), error = %e, "event not applied cleanly"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusBody {
    pub state: String, // "idle" | "running" | "completed" | "error"
    pub connected: bool,
    pub active: Option<ScanSession>,
}

#[derive(Debug, Serialize)]
pub struct SessionBody {
    pub session: ScanSession,
    pub view: ResultView,
}

#[derive(Debug, Deserialize)]
pub struct FrameBody {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Build the HTTP surface: JSON API under `/api`, static UI everywhere else.
pub fn router<B: ScanBackend + 'static>(state: AppState<B>, ui_dir: &Path) -> Router {
    let api = Router::new()
        .route("/status", get(get_status::<B>))
        .route("/scan", post(post_scan::<B>))
        .route("/scan/{id}", get(get_session::<B>))
        .route("/results", get(get_results::<B>))
        .route("/history", get(get_history::<B>))
        .route("/stats", get(get_stats::<B>))
        .route("/activity", get(get_activity::<B>))
        .route("/events", post(post_event::<B>))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state);

    let static_svc = ServeDir::new(ui_dir).append_index_html_on_directories(true);

    Router::new()
        .nest("/api", api)
        .fallback_service(static_svc)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server<B: ScanBackend + 'static>(
    bind: &str,
    ui_dir: &Path,
    state: AppState<B>,
) -> Result<()> {
    let app = router(state, ui_dir);
    info!(%bind, "serving console");
    axum::serve(tokio::net::TcpListener::bind(bind).await?, app).await?;
    Ok(())
}

/// Start the tasks that feed the reducer from outside HTTP: the event channel
/// (when `events_addr` is set) and the periodic dashboard pull (when
/// `refresh` is non-zero). All of them stop when `cancel` fires.
pub fn spawn_background<B: ScanBackend + 'static>(
    state: AppState<B>,
    events_addr: Option<String>,
    refresh: Duration,
    cancel: CancellationToken,
) {
    let (tx, mut rx) = mpsc::channel::<Event>(256);

    if let Some(addr) = events_addr {
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match channel::connect_tcp(&addr).await {
                Ok(ch) => channel::forward(ch, tx, cancel).await,
                Err(e) => {
                    let _ = tx
                        .send(Event::ConnectError {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        });
    }

    if !refresh.is_zero() {
        let backend = state.backend.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                match backend.dashboard_stats().await {
                    Ok(snapshot) => {
                        if tx.send(Event::DashboardRefreshed(snapshot)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, "dashboard refresh failed"),
                }
            }
        });
    }
    drop(tx);

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            state.apply(event).await;
        }
    });
}

async fn get_status<B: ScanBackend + 'static>(State(app): State<AppState<B>>) -> impl IntoResponse {
    let c = app.inner.read().await;
    let active = c.active().cloned();
    let state = match active.as_ref().map(|s| s.status) {
        None => "idle",
        Some(ScanStatus::Running) => "running",
        Some(ScanStatus::Completed) => "completed",
        Some(ScanStatus::Error) => "error",
    };
    let out = StatusBody {
        state: state.into(),
        connected: c.is_connected(),
        active,
    };
    (StatusCode::OK, Json(out))
}

async fn post_scan<B: ScanBackend + 'static>(
    State(app): State<AppState<B>>,
    Json(req): Json<ScanRequest>,
) -> Result<impl IntoResponse, ConsoleError> {
    let request = app.inner.read().await.prepare_start(req)?;

    // The lock is not held while the backend is busy.
    let event = match app.backend.start_scan(&request).await {
        Ok(response) => Event::ScanStarted { request, response },
        Err(e) => Event::StartFailed {
            request,
            message: e.to_string(),
        },
    };
    let id = event.scan_id().map(str::to_string);

    let mut c = app.inner.write().await;
    match c.handle(event) {
        Ok(()) | Err(ConsoleError::StorageDegraded(_)) => {}
        Err(e) => return Err(e),
    }
    let session = id
        .and_then(|id| c.sessions().get(&id).cloned())
        .ok_or_else(|| ConsoleError::Transport("backend did not start the scan".into()))?;
    Ok((StatusCode::ACCEPTED, Json(session)))
}

async fn get_session<B: ScanBackend + 'static>(
    State(app): State<AppState<B>>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<SessionBody>, ConsoleError> {
    let mut c = app.inner.write().await;
    match c.handle(Event::LoadSession { id: id.clone() }) {
        Ok(()) | Err(ConsoleError::StorageDegraded(_)) => {}
        Err(e) => return Err(e),
    }
    let session = c
        .active()
        .cloned()
        .ok_or_else(|| ConsoleError::NotFound(id))?;
    let view = crate::render::render(session.scan_type, session.results.as_ref());
    Ok(Json(SessionBody { session, view }))
}

async fn get_results<B: ScanBackend + 'static>(State(app): State<AppState<B>>) -> impl IntoResponse {
    let c = app.inner.read().await;
    if let Some(view) = c.active_view() {
        (StatusCode::OK, Json(view)).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn get_history<B: ScanBackend + 'static>(
    State(app): State<AppState<B>>,
) -> Json<Vec<HistoryEntry>> {
    Json(app.inner.read().await.history().to_vec())
}

async fn get_stats<B: ScanBackend + 'static>(State(app): State<AppState<B>>) -> impl IntoResponse {
    Json(app.inner.read().await.dashboard())
}

async fn get_activity<B: ScanBackend + 'static>(
    State(app): State<AppState<B>>,
) -> Json<Vec<Activity>> {
    Json(app.inner.read().await.activity().cloned().collect())
}

async fn post_event<B: ScanBackend + 'static>(
    State(app): State<AppState<B>>,
    Json(frame): Json<FrameBody>,
) -> Result<StatusCode, ConsoleError> {
    let decoded = channel::decode_named(&frame.event, frame.data)
        .map_err(|e| ConsoleError::Validation(e.to_string()))?;
    let Some(event) = decoded else {
        return Ok(StatusCode::NO_CONTENT);
    };
    app.apply(event).await;
    Ok(StatusCode::ACCEPTED)
}
