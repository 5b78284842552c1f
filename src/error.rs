//! Error types for the upload/analyze and chat flows

use std::time::Duration;

/// Result type for assistant operations
pub type Result<T> = std::result::Result<T, AssistantError>;

/// How a failure should be presented to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Something the user has to supply first (key, video, a prior analysis)
    Precondition,
    /// The remote service accepted the video but could not process it
    RemoteProcessing,
    /// Network, auth, quota or protocol failure talking to the remote service
    RemoteCall,
    /// The user aborted the action
    Cancelled,
    /// Local I/O or configuration trouble
    Internal,
}

/// Error types for assistant operations
#[derive(thiserror::Error, Debug)]
pub enum AssistantError {
    #[error("Gemini API key is required")]
    MissingApiKey,

    #[error("No video was provided")]
    MissingVideo,

    #[error("Unsupported video format: {0}")]
    UnsupportedFormat(String),

    #[error("No analysis yet: analyze a video before chatting")]
    NoAnalysis,

    #[error("Chat message is empty")]
    EmptyMessage,

    #[error("Video processing failed for {0}")]
    ProcessingFailed(String),

    #[error("Timed out after {waited:?} waiting for {file} to finish processing")]
    ProcessingTimeout { file: String, waited: Duration },

    #[error("Cancelled")]
    Cancelled,

    #[error("Gemini API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Response blocked by the model: {0}")]
    Blocked(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AssistantError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AssistantError::MissingApiKey
            | AssistantError::MissingVideo
            | AssistantError::UnsupportedFormat(_)
            | AssistantError::NoAnalysis
            | AssistantError::EmptyMessage => ErrorKind::Precondition,
            AssistantError::ProcessingFailed(_) | AssistantError::ProcessingTimeout { .. } => {
                ErrorKind::RemoteProcessing
            }
            AssistantError::Api { .. }
            | AssistantError::EmptyResponse
            | AssistantError::Blocked(_)
            | AssistantError::Http(_)
            | AssistantError::Json(_) => ErrorKind::RemoteCall,
            AssistantError::Cancelled => ErrorKind::Cancelled,
            AssistantError::Io(_) | AssistantError::Configuration(_) => ErrorKind::Internal,
        }
    }
}
