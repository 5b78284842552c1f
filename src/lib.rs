/// YouTube Shorts Assistant - Rust Implementation
///
/// Uploads a short-form video to Gemini, waits for remote processing, asks for
/// title/description/tag suggestions and keeps a follow-up chat per session.

pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod processing;
pub mod state;
pub mod suggestion;
pub mod video;

#[cfg(feature = "api")]
pub mod api;

// Re-export main types for easy access
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{AssistantError, ErrorKind, Result};
pub use crate::llm::{create_service, ChatRole, ChatTurn, FileState, GenerativeService, RemoteFile};
pub use crate::processing::{AnalysisPipeline, VideoAnalysis, ANALYSIS_PROMPT, SEED_REQUEST};
pub use crate::state::{SessionHandle, SessionState, SessionStore};
pub use crate::suggestion::Suggestion;
pub use crate::video::{StagedVideo, VideoStager};
