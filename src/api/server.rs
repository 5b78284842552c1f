//! HTTP server implementation for the API

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderName, Method, StatusCode},
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use super::error::ApiError;
use super::handlers;
use super::models::{ApiResponse, CancelOutcome, ChatReply, ChatRequest, SessionCreated, SessionView};
use crate::config::Config;
use crate::error::Result as AssistantResult;
use crate::llm::{create_service, GenerativeService};
use crate::processing::AnalysisPipeline;
use crate::state::SessionStore;
use crate::video::VideoStager;

const INDEX_HTML: &str = include_str!("index.html");
const API_KEY_HEADER: &str = "x-api-key";

/// Builds a remote service for a user-supplied credential
pub type ServiceConnector = Arc<dyn Fn(&str) -> AssistantResult<Arc<dyn GenerativeService>> + Send + Sync>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub config: Arc<Config>,
    pub pipeline: Arc<AnalysisPipeline>,
    pub stager: Arc<VideoStager>,
    pub connector: ServiceConnector,
}

impl AppState {
    pub fn new(config: Config, pipeline: AnalysisPipeline) -> Self {
        let gemini = config.gemini.clone();
        let connector: ServiceConnector = Arc::new(move |api_key: &str| {
            create_service(&gemini, api_key).map(|service| -> Arc<dyn GenerativeService> { Arc::from(service) })
        });

        Self {
            sessions: SessionStore::new(),
            stager: Arc::new(VideoStager::new(config.video.clone())),
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            connector,
        }
    }

    /// Swap the remote service factory, e.g. for a scripted one
    pub fn with_connector(mut self, connector: ServiceConnector) -> Self {
        self.connector = connector;
        self
    }
}

/// Build the application with routes
pub fn build_router(state: AppState) -> Router {
    // Configure CORS to allow browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(API_KEY_HEADER)]);

    let max_upload = state.config.server.max_upload_bytes;

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/health", get(health_handler))
        .route("/api/sessions", post(create_session_handler))
        .route(
            "/api/sessions/:id",
            get(get_session_handler).delete(end_session_handler),
        )
        .route("/api/sessions/:id/analyze", post(analyze_handler))
        .route("/api/sessions/:id/cancel", post(cancel_handler))
        .route("/api/sessions/:id/chat", post(chat_handler))
        .route("/", get(serve_ui))
        .route("/assets/*path", get(serve_static))
        .layer(DefaultBodyLimit::max(max_upload))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Configure and start the HTTP server
pub async fn start_http_server(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let ttl = Duration::from_secs(state.config.server.session_ttl_secs);

    let sweeper = spawn_session_sweeper(state.sessions.clone(), ttl);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🌐 Shorts Assistant listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("👋 Server stopped");
    Ok(())
}

/// Periodically drop sessions nobody has touched within `ttl`
fn spawn_session_sweeper(sessions: SessionStore, ttl: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval((ttl / 4).max(Duration::from_secs(30)));
        loop {
            ticker.tick().await;
            sessions.evict_idle(ttl).await;
        }
    })
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("🛑 Shutdown requested");
    }
}

fn api_key_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(API_KEY_HEADER).and_then(|value| value.to_str().ok())
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(handlers::health_check(&state).await))
}

async fn create_session_handler(State(state): State<AppState>) -> Json<ApiResponse<SessionCreated>> {
    Json(ApiResponse::success(handlers::create_session(&state).await))
}

async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<SessionView>>, ApiError> {
    Ok(Json(ApiResponse::success(handlers::get_session(&state, &id).await?)))
}

async fn end_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    handlers::end_session(&state, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn analyze_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<ApiResponse<SessionView>>, ApiError> {
    let view = handlers::analyze_video(&state, &id, api_key_header(&headers), multipart).await?;
    Ok(Json(ApiResponse::success(view)))
}

async fn cancel_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CancelOutcome>>, ApiError> {
    Ok(Json(ApiResponse::success(handlers::cancel_analysis(&state, &id).await?)))
}

async fn chat_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ApiResponse<ChatReply>>, ApiError> {
    let reply = handlers::chat(&state, &id, api_key_header(&headers), request).await?;
    Ok(Json(ApiResponse::success(reply)))
}

/// Serve the main UI page
async fn serve_ui(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(dir) = &state.config.server.ui_dir {
        if let Ok(content) = tokio::fs::read_to_string(dir.join("index.html")).await {
            return Html(content);
        }
    }
    Html(INDEX_HTML.to_string())
}

/// Serve static files from the configured UI directory
async fn serve_static(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    let Some(dir) = &state.config.server.ui_dir else {
        return not_found_response().into_response();
    };
    if path.split('/').any(|segment| segment == "..") {
        return not_found_response().into_response();
    }

    match tokio::fs::read(dir.join(&path)).await {
        Ok(content) => {
            let content_type = match path.rsplit('.').next() {
                Some("html") => "text/html",
                Some("css") => "text/css",
                Some("js") => "application/javascript",
                Some("json") => "application/json",
                Some("png") => "image/png",
                Some("svg") => "image/svg+xml",
                _ => "application/octet-stream",
            };
            (StatusCode::OK, [("content-type", content_type)], content).into_response()
        }
        Err(_) => not_found_response().into_response(),
    }
}

/// 404 response for files
fn not_found_response() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, [("content-type", "text/plain")], "Not Found")
}
