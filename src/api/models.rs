//! API data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::llm::ChatTurn;
use crate::state::SessionState;
use crate::suggestion::Suggestion;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        }
    }

    pub fn error(message: String, kind: Option<ErrorKind>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            kind,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreated {
    pub session_id: Uuid,
}

/// Everything the page needs to re-render a session
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub analysis_result: Option<String>,
    pub suggestion: Option<Suggestion>,
    pub title_within_limit: Option<bool>,
    pub chat_history: Vec<ChatTurn>,
    pub uploaded_file: Option<String>,
    pub busy: bool,
    pub last_active: DateTime<Utc>,
}

impl SessionView {
    pub fn new(session_id: Uuid, state: &SessionState, busy: bool) -> Self {
        let suggestion = state
            .analysis_result
            .as_deref()
            .map(Suggestion::parse)
            .filter(|s| !s.is_empty());
        Self {
            session_id,
            analysis_result: state.analysis_result.clone(),
            title_within_limit: suggestion.as_ref().and_then(Suggestion::title_within_limit),
            suggestion,
            chat_history: state.chat_history.clone(),
            uploaded_file: state.uploaded_file.clone(),
            busy,
            last_active: state.last_active,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    pub chat_history: Vec<ChatTurn>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub cancelled: bool,
}
