use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ChatConfig, Config, PollingConfig};
use crate::error::{AssistantError, Result};
use crate::llm::{GenerativeService, RemoteFile};
use crate::state::SessionState;
use crate::video::StagedVideo;

/// Synthetic user turn that opens every transcript
pub const SEED_REQUEST: &str = "この動画の分析と提案をお願いします。";

/// Built-in instruction sent alongside the uploaded video
pub const ANALYSIS_PROMPT: &str = "\
あなたはプロのYouTubeコンサルタントです。
アップロードされた動画はYouTubeショート用です。
動画の内容を視覚的・聴覚的に深く分析し、バズるための以下の要素を出力してください。

出力フォーマット:
【タイトル】 (キャッチーで30文字以内)
【説明欄】 (ハッシュタグを含めたSEOに強い説明文)
【タグ】 (カンマ区切りで10個程度)

分析の根拠も少し添えてください。";

/// Outcome of a successful upload/analyze run
#[derive(Debug, Clone)]
pub struct VideoAnalysis {
    pub remote_file: RemoteFile,
    /// Model output, verbatim
    pub text: String,
    pub tokens_used: Option<u32>,
}

impl VideoAnalysis {
    /// One-line size report, e.g. `120 characters (350 tokens)`
    pub fn summary(&self) -> String {
        let chars = self.text.chars().count();
        match self.tokens_used {
            Some(tokens) => format!("{} characters ({} tokens)", chars, tokens),
            None => format!("{} characters", chars),
        }
    }
}

/// Reject a missing or blank credential before any network call
pub fn require_api_key(api_key: Option<&str>) -> Result<&str> {
    match api_key.map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(AssistantError::MissingApiKey),
    }
}

/// Drives the upload/analyze flow and the follow-up chat
#[derive(Debug, Clone)]
pub struct AnalysisPipeline {
    polling: PollingConfig,
    chat: ChatConfig,
    prompt: String,
}

impl AnalysisPipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            polling: config.polling.clone(),
            chat: config.chat.clone(),
            prompt: ANALYSIS_PROMPT.to_string(),
        }
    }

    /// Like `new`, but honors a configured prompt file
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pipeline = Self::new(config);
        match config.prompts.load_analysis_prompt().await? {
            Some(prompt) => {
                info!("📝 Using analysis prompt override");
                Ok(pipeline.with_prompt(prompt))
            }
            None => Ok(pipeline),
        }
    }

    pub fn with_prompt(mut self, prompt: String) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Upload, wait for processing, and ask the model for suggestions.
    ///
    /// The staged file is removed as soon as the upload finishes, and on every
    /// early return through its drop guard.
    pub async fn analyze(
        &self,
        service: &dyn GenerativeService,
        video: StagedVideo,
        cancel: &CancellationToken,
    ) -> Result<VideoAnalysis> {
        info!("🚀 Uploading {} ({} bytes)", video.display_name(), video.size());

        let uploaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AssistantError::Cancelled),
            result = service.upload_file(video.path(), video.mime_type(), video.display_name()) => result?,
        };
        video.cleanup();

        let file = self.wait_until_processed(service, uploaded, cancel).await?;
        if file.is_failed() {
            warn!("❌ Remote processing failed for {}", file.name);
            return Err(AssistantError::ProcessingFailed(file.name));
        }

        info!("🤖 {} is ready, requesting suggestions", file.name);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AssistantError::Cancelled),
            result = service.generate_content(&file, &self.prompt) => result?,
        };

        let analysis = VideoAnalysis {
            remote_file: file,
            text: response.text,
            tokens_used: response.tokens_used,
        };
        info!("✅ Analysis received: {}", analysis.summary());
        Ok(analysis)
    }

    /// Run `analyze` and record the result; the session is untouched on failure
    pub async fn analyze_into(
        &self,
        service: &dyn GenerativeService,
        session: &mut SessionState,
        video: StagedVideo,
        cancel: &CancellationToken,
    ) -> Result<VideoAnalysis> {
        let analysis = self.analyze(service, video, cancel).await?;
        session.record_analysis(&analysis);
        Ok(analysis)
    }

    /// Poll until the file leaves PROCESSING, honoring timeout and cancellation
    pub async fn wait_until_processed(
        &self,
        service: &dyn GenerativeService,
        mut file: RemoteFile,
        cancel: &CancellationToken,
    ) -> Result<RemoteFile> {
        let started = Instant::now();

        while file.is_processing() {
            if let Some(limit) = self.polling.timeout() {
                if started.elapsed() >= limit {
                    return Err(AssistantError::ProcessingTimeout {
                        file: file.name,
                        waited: started.elapsed(),
                    });
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AssistantError::Cancelled),
                _ = tokio::time::sleep(self.polling.interval()) => {}
            }

            file = service.get_file(&file.name).await?;
            debug!("⏳ {} is {:?} after {:.1}s", file.name, file.state, started.elapsed().as_secs_f64());
        }

        Ok(file)
    }

    /// Send one chat message with the transcript as context.
    ///
    /// The user turn is kept even when the remote call fails.
    pub async fn chat(
        &self,
        service: &dyn GenerativeService,
        session: &mut SessionState,
        message: &str,
    ) -> Result<String> {
        if message.trim().is_empty() {
            return Err(AssistantError::EmptyMessage);
        }
        if !session.has_analysis() {
            return Err(AssistantError::NoAnalysis);
        }

        let context = session.replay_context(self.chat.max_context_turns);
        session.push_user_turn(message);

        debug!("💬 Replaying {} turns", context.len());
        let response = service.chat(&context, message).await?;

        session.push_model_turn(&response.text);
        Ok(response.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::llm::mock::MockGenerativeService;
    use crate::llm::{ChatTurn, FileState};
    use crate::video::VideoStager;
    use std::time::Duration;
    use tempfile::TempDir;

    const MP4_HEADER: &[u8] = b"\x00\x00\x00\x18ftypmp42\x00\x00\x00\x00mp42isom";

    fn config(dir: &TempDir) -> Config {
        ConfigBuilder::new()
            .with_poll_interval(Duration::from_millis(1))
            .with_temp_dir(dir.path().to_path_buf())
            .build()
    }

    async fn staged(config: &Config) -> StagedVideo {
        VideoStager::new(config.video.clone())
            .stage_bytes("clip.mp4", Some("video/mp4"), MP4_HEADER)
            .await
            .unwrap()
    }

    #[test]
    fn test_analysis_summary_reports_tokens() {
        let analysis = VideoAnalysis {
            remote_file: RemoteFile {
                name: "files/abc".to_string(),
                display_name: None,
                mime_type: "video/mp4".to_string(),
                uri: "mock://files/abc".to_string(),
                state: FileState::Active,
            },
            text: "【タイトル】猫".to_string(),
            tokens_used: Some(350),
        };
        assert_eq!(analysis.summary(), "7 characters (350 tokens)");
    }

    #[test]
    fn test_require_api_key() {
        assert_eq!(require_api_key(Some(" key ")).unwrap(), "key");
        assert!(matches!(require_api_key(Some("   ")), Err(AssistantError::MissingApiKey)));
        assert!(matches!(require_api_key(None), Err(AssistantError::MissingApiKey)));
    }

    #[tokio::test]
    async fn test_analysis_seeds_history() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let service = MockGenerativeService::new().with_analysis("【タイトル】Test");
        let pipeline = AnalysisPipeline::new(&config);
        let mut session = SessionState::new();

        pipeline
            .analyze_into(&service, &mut session, staged(&config).await, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.analysis_result.as_deref(), Some("【タイトル】Test"));
        assert_eq!(
            session.chat_history,
            vec![ChatTurn::user(SEED_REQUEST), ChatTurn::model("【タイトル】Test")]
        );
        assert_eq!(service.calls().polls, 1);
        assert_eq!(service.calls().generations, 1);
    }

    #[tokio::test]
    async fn test_failed_processing_leaves_session_untouched() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let service = MockGenerativeService::new()
            .with_poll_states(vec![FileState::Processing, FileState::Failed]);
        let pipeline = AnalysisPipeline::new(&config);
        let mut session = SessionState::new();

        let err = pipeline
            .analyze_into(&service, &mut session, staged(&config).await, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::ProcessingFailed(_)));
        assert!(session.analysis_result.is_none());
        assert!(session.chat_history.is_empty());
        assert!(session.uploaded_file.is_none());
        assert_eq!(service.calls().polls, 2);
        assert_eq!(service.calls().generations, 0);
    }

    #[tokio::test]
    async fn test_staged_file_removed_on_every_path() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let pipeline = AnalysisPipeline::new(&config);

        let service = MockGenerativeService::new().with_upload_error("quota exceeded");
        let err = pipeline
            .analyze(&service, staged(&config).await, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::Api { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let service = MockGenerativeService::new();
        pipeline
            .analyze(&service, staged(&config).await, &CancellationToken::new())
            .await
            .unwrap();
        let (path, existed) = service.uploaded_paths()[0].clone();
        assert!(existed);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_generation_failure_leaves_session_untouched() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let service = MockGenerativeService::new().with_analysis_error("model overloaded");
        let pipeline = AnalysisPipeline::new(&config);
        let mut session = SessionState::new();

        let err = pipeline
            .analyze_into(&service, &mut session, staged(&config).await, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::RemoteCall);
        assert_eq!(service.calls().polls, 1);
        assert_eq!(service.calls().generations, 1);
        assert!(session.analysis_result.is_none());
        assert!(session.uploaded_file.is_none());
        assert!(session.chat_history.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_active_upload_skips_polling() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let service = MockGenerativeService::new()
            .with_upload_state(FileState::Active)
            .with_analysis("ready");
        let pipeline = AnalysisPipeline::new(&config);

        let analysis = pipeline
            .analyze(&service, staged(&config).await, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(analysis.text, "ready");
        assert_eq!(analysis.summary(), "5 characters");
        assert_eq!(service.calls().polls, 0);
        assert_eq!(service.calls().generations, 1);
    }

    #[tokio::test]
    async fn test_cancel_while_polling() {
        let dir = TempDir::new().unwrap();
        let config = ConfigBuilder::new()
            .with_poll_interval(Duration::from_secs(60))
            .with_temp_dir(dir.path().to_path_buf())
            .build();
        let service = MockGenerativeService::new().with_poll_states(vec![FileState::Processing]);
        let pipeline = AnalysisPipeline::new(&config);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let mut session = SessionState::new();
        let err = pipeline
            .analyze_into(&service, &mut session, staged(&config).await, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::Cancelled));
        assert!(!session.has_analysis());
    }

    #[tokio::test]
    async fn test_poll_timeout() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.polling.timeout_seconds = 1;
        config.polling.interval_ms = 300;
        let service = MockGenerativeService::new().with_poll_states(vec![FileState::Processing]);

        let err = AnalysisPipeline::new(&config)
            .analyze(&service, staged(&config).await, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::ProcessingTimeout { .. }));
        assert!(service.calls().polls >= 3);
    }

    #[tokio::test]
    async fn test_chat_requires_analysis() {
        let dir = TempDir::new().unwrap();
        let pipeline = AnalysisPipeline::new(&config(&dir));
        let service = MockGenerativeService::new();
        let mut session = SessionState::new();

        let err = pipeline.chat(&service, &mut session, "hi").await.unwrap_err();
        assert!(matches!(err, AssistantError::NoAnalysis));
        assert!(session.chat_history.is_empty());
        assert_eq!(service.calls().chats, 0);
    }

    #[tokio::test]
    async fn test_chat_failure_keeps_user_turn() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let pipeline = AnalysisPipeline::new(&config);
        let service = MockGenerativeService::new().with_reply_error("rate limited");
        let mut session = SessionState::new();
        pipeline
            .analyze_into(&service, &mut session, staged(&config).await, &CancellationToken::new())
            .await
            .unwrap();

        assert!(pipeline.chat(&service, &mut session, "shorten the title").await.is_err());
        assert_eq!(session.chat_history.len(), 3);
        assert_eq!(session.chat_history[2], ChatTurn::user("shorten the title"));

        let reply = pipeline.chat(&service, &mut session, "shorten the title").await.unwrap();
        assert_eq!(session.chat_history.len(), 5);
        assert_eq!(session.chat_history[4], ChatTurn::model(reply));
        // the retry replays the orphaned user turn
        assert_eq!(service.chat_histories()[1].len(), 3);
    }

    #[tokio::test]
    async fn test_prompt_override_from_file() {
        let dir = TempDir::new().unwrap();
        let prompt_path = dir.path().join("prompt.txt");
        tokio::fs::write(&prompt_path, "  Suggest an English title.\n").await.unwrap();

        let mut config = config(&dir);
        config.prompts.analysis_file = Some(prompt_path);

        let pipeline = AnalysisPipeline::from_config(&config).await.unwrap();
        assert_eq!(pipeline.prompt(), "Suggest an English title.");
        assert_eq!(AnalysisPipeline::new(&config).prompt(), ANALYSIS_PROMPT);
    }
}
