use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the Shorts Assistant
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Gemini API settings
    pub gemini: GeminiConfig,

    /// Remote processing wait settings
    pub polling: PollingConfig,

    /// Accepted upload format and staging
    pub video: VideoConfig,

    /// Follow-up chat settings
    pub chat: ChatConfig,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Prompt overrides
    pub prompts: PromptConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// Base URL for model and file metadata calls
    pub api_base: String,

    /// Base URL for media uploads
    pub upload_base: String,

    /// Model used for both analysis and chat
    pub model: String,

    /// Fallback API key when the user supplies none
    pub api_key: Option<String>,

    /// Request timeout in seconds (uploads included)
    pub timeout_seconds: u64,

    /// Temperature for generation
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between processing-state checks
    pub interval_ms: u64,

    /// Give up waiting after this many seconds (0 = wait forever)
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Accepted file extensions (lowercase)
    pub allowed_extensions: Vec<String>,

    /// MIME type sent to the remote service
    pub mime_type: String,

    /// Check for an ISO base media `ftyp` box before uploading
    pub verify_container: bool,

    /// Directory for staged uploads (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChatConfig {
    /// Replay at most this many turns after the two seed turns (unset = full transcript)
    pub max_context_turns: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Upper bound for request bodies, i.e. uploaded videos
    pub max_upload_bytes: usize,

    /// Idle sessions are dropped after this many seconds
    pub session_ttl_secs: u64,

    /// Optional directory with a custom index.html and assets
    pub ui_dir: Option<PathBuf>,
}

/// Configuration for LLM prompts
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromptConfig {
    /// Replaces the built-in analysis prompt when set
    pub analysis_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            upload_base: "https://generativelanguage.googleapis.com/upload/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key: None,
            timeout_seconds: 600,
            temperature: None,
            max_output_tokens: None,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            timeout_seconds: 900, // 15 minutes
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: vec!["mp4".to_string()],
            mime_type: "video/mp4".to_string(),
            verify_container: true,
            temp_dir: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_upload_bytes: 2 * 1024 * 1024 * 1024, // remote per-file limit
            session_ttl_secs: 3600,
            ui_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl PromptConfig {
    /// Load the analysis prompt override, if one is configured
    pub async fn load_analysis_prompt(&self) -> Result<Option<String>> {
        let Some(path) = &self.analysis_file else {
            return Ok(None);
        };
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) => Err(anyhow!("Failed to load prompt from {}: {}", path.display(), e)),
        }
    }
}

impl Config {
    /// Load configuration from the first readable config file, then apply env overrides
    pub fn load() -> Result<Self> {
        let mut config_paths = vec![
            PathBuf::from("shorts-assistant.toml"),
            PathBuf::from("config/shorts-assistant.toml"),
        ];
        if let Ok(home) = std::env::var("HOME") {
            config_paths.push(PathBuf::from(home).join(".config/shorts-assistant/config.toml"));
        }

        let mut config = None;
        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(parsed) => {
                        tracing::info!("📄 Loaded configuration from: {}", path.display());
                        config = Some(parsed);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    }
                }
            }
        }

        let mut config: Config = config.unwrap_or_default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read config {}: {}", path.display(), e))?;
        let mut config: Config = toml::from_str(&config_str)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override settings with environment variables
    pub fn apply_env(&mut self) {
        if let Ok(api_key) = std::env::var("GEMINI_API_KEY") {
            if !api_key.trim().is_empty() {
                self.gemini.api_key = Some(api_key);
            }
        }

        if let Ok(model) = std::env::var("SHORTS_ASSISTANT_MODEL") {
            self.gemini.model = model;
        }

        if let Ok(port) = std::env::var("SHORTS_ASSISTANT_PORT") {
            self.server.port = port.parse().unwrap_or(self.server.port);
        }

        if let Ok(interval) = std::env::var("SHORTS_ASSISTANT_POLL_INTERVAL_MS") {
            self.polling.interval_ms = interval.parse().unwrap_or(self.polling.interval_ms);
        }

        if let Ok(log_level) = std::env::var("SHORTS_ASSISTANT_LOG_LEVEL") {
            self.logging.log_level = log_level;
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.polling.interval_ms == 0 {
            return Err(anyhow!("polling.interval_ms must be greater than 0"));
        }

        if self.video.allowed_extensions.is_empty() {
            return Err(anyhow!("video.allowed_extensions must not be empty"));
        }

        if self.gemini.model.trim().is_empty() {
            return Err(anyhow!("gemini.model must not be empty"));
        }

        for base in [&self.gemini.api_base, &self.gemini.upload_base] {
            url::Url::parse(base).map_err(|e| anyhow!("Invalid Gemini base URL {}: {}", base, e))?;
        }

        if self.server.max_upload_bytes == 0 {
            return Err(anyhow!("server.max_upload_bytes must be greater than 0"));
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Shorts Assistant Configuration:\n\
            - Model: {}\n\
            - API key configured: {}\n\
            - Poll interval: {}ms (timeout {}s)\n\
            - Accepted formats: {}\n\
            - Chat context: {}\n\
            - Server: {}:{}",
            self.gemini.model,
            self.gemini.api_key.is_some(),
            self.polling.interval_ms,
            self.polling.timeout_seconds,
            self.video.allowed_extensions.join(", "),
            self.chat
                .max_context_turns
                .map(|n| format!("last {} turns", n))
                .unwrap_or_else(|| "full transcript".to_string()),
            self.server.host,
            self.server.port,
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.config.gemini.model = model;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.polling.interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.polling.timeout_seconds = timeout.as_secs();
        self
    }

    pub fn with_max_context_turns(mut self, turns: usize) -> Self {
        self.config.chat.max_context_turns = Some(turns);
        self
    }

    pub fn with_temp_dir(mut self, dir: PathBuf) -> Self {
        self.config.video.temp_dir = Some(dir);
        self
    }

    pub fn verify_container(mut self, verify: bool) -> Self {
        self.config.video.verify_container = verify;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
