use super::{ChatRole, ChatTurn, GenerationResponse, GenerativeService, RemoteFile};
use crate::config::GeminiConfig;
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// Gemini provider implementation
pub struct GeminiProvider {
    config: GeminiConfig,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_data: Option<GeminiFileData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<GeminiPromptFeedback>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    total_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiFileEnvelope {
    file: RemoteFile,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn generation_config(&self) -> Option<GeminiGenerationConfig> {
        if self.config.max_output_tokens.is_none() && self.config.temperature.is_none() {
            return None;
        }
        Some(GeminiGenerationConfig {
            max_output_tokens: self.config.max_output_tokens,
            temperature: self.config.temperature,
        })
    }

    async fn generate(&self, contents: Vec<GeminiContent>) -> Result<GenerationResponse> {
        let request = GeminiRequest {
            contents,
            generation_config: self.generation_config(),
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            self.config.model
        );

        debug!("Sending request to Gemini API ({} contents)", request.contents.len());

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let gemini_response: GeminiResponse = check_status(response).await?.json().await?;
        extract_response(gemini_response)
    }
}

#[async_trait]
impl GenerativeService for GeminiProvider {
    async fn upload_file(&self, path: &Path, mime_type: &str, display_name: &str) -> Result<RemoteFile> {
        let size = tokio::fs::metadata(path).await?.len();
        let start_url = format!("{}/files", self.config.upload_base.trim_end_matches('/'));

        debug!("Starting resumable upload of {} bytes", size);

        let response = self
            .client
            .post(&start_url)
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;

        let response = check_status(response).await?;
        let upload_url = response
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| AssistantError::Api {
                status: response.status().as_u16(),
                body: "upload session did not return an upload URL".to_string(),
            })?;

        let file = tokio::fs::File::open(path).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let response = self
            .client
            .post(&upload_url)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(body)
            .send()
            .await?;

        let envelope: GeminiFileEnvelope = check_status(response).await?.json().await?;
        info!("☁️  Uploaded {} as {}", display_name, envelope.file.name);
        Ok(envelope.file)
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile> {
        let url = format!("{}/{}", self.config.api_base.trim_end_matches('/'), name);

        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    async fn generate_content(&self, file: &RemoteFile, prompt: &str) -> Result<GenerationResponse> {
        self.generate(vec![video_prompt_content(file, prompt)]).await
    }

    async fn chat(&self, history: &[ChatTurn], message: &str) -> Result<GenerationResponse> {
        self.generate(chat_contents(history, message)).await
    }
}

/// Turn a non-success response into an API error carrying the body verbatim
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(AssistantError::Api {
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(response)
}

fn video_prompt_content(file: &RemoteFile, prompt: &str) -> GeminiContent {
    GeminiContent {
        role: Some(ChatRole::User.as_str().to_string()),
        parts: vec![
            GeminiPart {
                text: None,
                file_data: Some(GeminiFileData {
                    mime_type: file.mime_type.clone(),
                    file_uri: file.uri.clone(),
                }),
            },
            GeminiPart {
                text: Some(prompt.to_string()),
                file_data: None,
            },
        ],
    }
}

fn text_content(role: ChatRole, text: &str) -> GeminiContent {
    GeminiContent {
        role: Some(role.as_str().to_string()),
        parts: vec![GeminiPart {
            text: Some(text.to_string()),
            file_data: None,
        }],
    }
}

fn chat_contents(history: &[ChatTurn], message: &str) -> Vec<GeminiContent> {
    history
        .iter()
        .map(|turn| text_content(turn.role, &turn.content))
        .chain(std::iter::once(text_content(ChatRole::User, message)))
        .collect()
}

fn extract_response(response: GeminiResponse) -> Result<GenerationResponse> {
    let tokens_used = response.usage_metadata.and_then(|u| u.total_token_count);

    let Some(candidate) = response.candidates.into_iter().next() else {
        return match response.prompt_feedback.and_then(|f| f.block_reason) {
            Some(reason) => Err(AssistantError::Blocked(reason)),
            None => Err(AssistantError::EmptyResponse),
        };
    };

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.is_empty() {
        return match candidate.finish_reason {
            Some(reason) if reason != "STOP" => Err(AssistantError::Blocked(reason)),
            _ => Err(AssistantError::EmptyResponse),
        };
    }

    Ok(GenerationResponse { text, tokens_used })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FileState;

    fn sample_file() -> RemoteFile {
        RemoteFile {
            name: "files/abc123".to_string(),
            display_name: Some("clip.mp4".to_string()),
            mime_type: "video/mp4".to_string(),
            uri: "https://generativelanguage.googleapis.com/v1beta/files/abc123".to_string(),
            state: FileState::Active,
        }
    }

    #[test]
    fn test_video_request_shape() {
        let request = GeminiRequest {
            contents: vec![video_prompt_content(&sample_file(), "analyze")],
            generation_config: None,
        };
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][0]["parts"][0]["fileData"]["mimeType"], "video/mp4");
        assert_eq!(
            value["contents"][0]["parts"][0]["fileData"]["fileUri"],
            "https://generativelanguage.googleapis.com/v1beta/files/abc123"
        );
        assert_eq!(value["contents"][0]["parts"][1]["text"], "analyze");
        assert!(value.get("generationConfig").is_none());
    }

    #[test]
    fn test_chat_contents_replay_history_then_message() {
        let history = vec![ChatTurn::user("seed"), ChatTurn::model("【タイトル】Test")];
        let contents = chat_contents(&history, "shorten the title");

        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0].role.as_deref(), Some("user"));
        assert_eq!(contents[1].role.as_deref(), Some("model"));
        assert_eq!(contents[1].parts[0].text.as_deref(), Some("【タイトル】Test"));
        assert_eq!(contents[2].parts[0].text.as_deref(), Some("shorten the title"));
    }

    #[test]
    fn test_extract_joins_text_parts() {
        let response: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "【タイトル】"}, {"text": "Test"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"totalTokenCount": 42}
        }))
        .unwrap();

        let extracted = extract_response(response).unwrap();
        assert_eq!(extracted.text, "【タイトル】Test");
        assert_eq!(extracted.tokens_used, Some(42));
    }

    #[test]
    fn test_extract_reports_block_reason() {
        let response: GeminiResponse = serde_json::from_value(serde_json::json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        assert!(matches!(extract_response(response), Err(AssistantError::Blocked(r)) if r == "SAFETY"));

        let response: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"finishReason": "STOP"}]
        }))
        .unwrap();
        assert!(matches!(extract_response(response), Err(AssistantError::EmptyResponse)));
    }

    #[test]
    fn test_file_envelope_parsing() {
        let envelope: GeminiFileEnvelope = serde_json::from_value(serde_json::json!({
            "file": {
                "name": "files/abc123",
                "displayName": "clip.mp4",
                "mimeType": "video/mp4",
                "sizeBytes": "1024",
                "uri": "https://generativelanguage.googleapis.com/v1beta/files/abc123",
                "state": "PROCESSING"
            }
        }))
        .unwrap();
        assert_eq!(envelope.file.name, "files/abc123");
        assert!(envelope.file.is_processing());
    }
}
