pub mod mock;
pub mod providers;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::GeminiConfig;
use crate::error::{AssistantError, Result};

/// Originator of a chat turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Model => "model",
        }
    }
}

/// One message of the conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Model,
            content: content.into(),
        }
    }
}

/// Processing state of an uploaded file, as reported by the remote service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    #[default]
    StateUnspecified,
    Processing,
    Active,
    Failed,
}

/// Handle to a video held by the remote service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Resource name, e.g. `files/abc123`
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub state: FileState,
}

impl RemoteFile {
    pub fn is_processing(&self) -> bool {
        self.state == FileState::Processing
    }

    pub fn is_failed(&self) -> bool {
        self.state == FileState::Failed
    }
}

/// Model output
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub tokens_used: Option<u32>,
}

/// Remote generative-AI service consumed by the flows
#[async_trait]
pub trait GenerativeService: Send + Sync {
    async fn upload_file(&self, path: &Path, mime_type: &str, display_name: &str) -> Result<RemoteFile>;
    async fn get_file(&self, name: &str) -> Result<RemoteFile>;
    async fn generate_content(&self, file: &RemoteFile, prompt: &str) -> Result<GenerationResponse>;
    /// Send `message` in a conversation whose earlier turns are `history`.
    /// `history` never contains `message` itself; implementations append it.
    async fn chat(&self, history: &[ChatTurn], message: &str) -> Result<GenerationResponse>;
}

/// Create a Gemini-backed service for the given credential
pub fn create_service(config: &GeminiConfig, api_key: &str) -> Result<Box<dyn GenerativeService>> {
    if api_key.trim().is_empty() {
        return Err(AssistantError::MissingApiKey);
    }
    Ok(Box::new(providers::GeminiProvider::new(config.clone(), api_key.to_string())?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_state_wire_names() {
        let file: RemoteFile = serde_json::from_str(
            r#"{"name":"files/abc","mimeType":"video/mp4","uri":"https://x/files/abc","state":"PROCESSING"}"#,
        )
        .unwrap();
        assert!(file.is_processing());
        assert_eq!(file.mime_type, "video/mp4");

        let file: RemoteFile = serde_json::from_str(r#"{"name":"files/abc"}"#).unwrap();
        assert_eq!(file.state, FileState::StateUnspecified);
    }

    #[test]
    fn test_chat_role_serialization() {
        let turn = ChatTurn::model("hi");
        assert_eq!(
            serde_json::to_value(&turn).unwrap(),
            serde_json::json!({"role": "model", "content": "hi"})
        );
    }

    #[test]
    fn test_create_service_requires_key() {
        let err = create_service(&GeminiConfig::default(), "  ").err().unwrap();
        assert!(matches!(err, AssistantError::MissingApiKey));
        assert!(create_service(&GeminiConfig::default(), "test-key").is_ok());
    }
}
