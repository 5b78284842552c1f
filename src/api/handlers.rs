//! API request handlers

use axum::extract::multipart::Field;
use axum::extract::Multipart;
use futures::TryStreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use tracing::info;
use uuid::Uuid;

use super::error::ApiError;
use super::models::{CancelOutcome, ChatReply, ChatRequest, SessionCreated, SessionView};
use super::server::AppState;
use crate::error::AssistantError;
use crate::processing::require_api_key;
use crate::state::SessionHandle;
use crate::video::StagedVideo;

/// Handle health check requests
pub async fn health_check(state: &AppState) -> Value {
    let stats = state.sessions.get_statistics().await;
    serde_json::json!({
        "status": "healthy",
        "service": "shorts-assistant",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.config.gemini.model,
        "sessions": stats,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })
}

/// Pick the credential: explicit request value first, then the configured fallback
pub fn resolve_api_key(state: &AppState, header: Option<&str>, field: Option<&str>) -> Result<String, ApiError> {
    let candidate = header
        .filter(|key| !key.trim().is_empty())
        .or(field.filter(|key| !key.trim().is_empty()))
        .or(state.config.gemini.api_key.as_deref());
    Ok(require_api_key(candidate)?.to_string())
}

async fn find_session(state: &AppState, id: &Uuid) -> Result<Arc<SessionHandle>, ApiError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session not found: {}", id)))
}

pub async fn create_session(state: &AppState) -> SessionCreated {
    let handle = state.sessions.create().await;
    SessionCreated {
        session_id: handle.id,
    }
}

pub async fn get_session(state: &AppState, id: &Uuid) -> Result<SessionView, ApiError> {
    let handle = find_session(state, id).await?;
    let busy = handle.is_busy();
    let session = handle.lock().await;
    Ok(SessionView::new(handle.id, &session, busy))
}

pub async fn end_session(state: &AppState, id: &Uuid) -> Result<(), ApiError> {
    if state.sessions.remove(id).await {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("Session not found: {}", id)))
    }
}

async fn stage_field(state: &AppState, field: Field<'_>) -> Result<StagedVideo, ApiError> {
    let file_name = field.file_name().unwrap_or("upload.mp4").to_string();
    let content_type = field.content_type().map(str::to_string);

    let stream = field.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let reader = StreamReader::new(stream);
    tokio::pin!(reader);

    Ok(state
        .stager
        .stage_reader(&file_name, content_type.as_deref(), &mut reader)
        .await?)
}

/// Upload/analyze flow for one session.
///
/// An `api_key` form field only counts when it precedes the `video` part;
/// without a credential by then the upload is rejected before it is read.
pub async fn analyze_video(
    state: &AppState,
    id: &Uuid,
    header_key: Option<&str>,
    mut multipart: Multipart,
) -> Result<SessionView, ApiError> {
    let handle = find_session(state, id).await?;
    let job = handle
        .begin_job()
        .ok_or_else(|| ApiError::Conflict("An analysis is already running for this session".to_string()))?;

    let mut staged = None;
    let mut field_key = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("video") => {
                resolve_api_key(state, header_key, field_key.as_deref())?;
                staged = Some(stage_field(state, field).await?);
            }
            Some("api_key") => field_key = Some(field.text().await?),
            _ => {}
        }
    }

    let api_key = resolve_api_key(state, header_key, field_key.as_deref())?;
    let video = staged.ok_or(AssistantError::MissingVideo)?;

    let service = (state.connector)(&api_key)?;
    let analysis = state.pipeline.analyze(service.as_ref(), video, job.token()).await?;

    let mut session = handle.lock().await;
    session.record_analysis(&analysis);
    info!("📝 Session {} analyzed {}", handle.id, analysis.remote_file.name);

    drop(job);
    Ok(SessionView::new(handle.id, &session, false))
}

pub async fn cancel_analysis(state: &AppState, id: &Uuid) -> Result<CancelOutcome, ApiError> {
    let handle = find_session(state, id).await?;
    let cancelled = handle.cancel_job();
    if cancelled {
        info!("🛑 Session {} cancelled its analysis", handle.id);
    }
    Ok(CancelOutcome { cancelled })
}

/// Chat flow for one session
pub async fn chat(
    state: &AppState,
    id: &Uuid,
    header_key: Option<&str>,
    request: ChatRequest,
) -> Result<ChatReply, ApiError> {
    let handle = find_session(state, id).await?;
    let mut session = handle.lock().await;

    if !session.has_analysis() {
        return Err(AssistantError::NoAnalysis.into());
    }
    let api_key = resolve_api_key(state, header_key, request.api_key.as_deref())?;
    let service = (state.connector)(&api_key)?;

    let reply = state
        .pipeline
        .chat(service.as_ref(), &mut session, &request.message)
        .await?;

    Ok(ChatReply {
        reply,
        chat_history: session.chat_history.clone(),
    })
}
