use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::VideoConfig;
use crate::error::{AssistantError, Result};

/// Validates uploads and stages them as scoped temporary files
#[derive(Debug, Clone)]
pub struct VideoStager {
    config: VideoConfig,
}

/// A video copied to a temporary file; the file is removed when this is dropped
#[derive(Debug)]
pub struct StagedVideo {
    file: NamedTempFile,
    display_name: String,
    mime_type: String,
    size: u64,
}

impl StagedVideo {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Remove the temporary file now, logging instead of failing
    pub fn cleanup(self) {
        let path = self.file.path().to_path_buf();
        match self.file.close() {
            Ok(()) => debug!("🧹 Removed staged video {}", path.display()),
            Err(e) => warn!("Failed to remove staged video {}: {}", path.display(), e),
        }
    }
}

impl VideoStager {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }

    /// Check the declared name and content type against the accepted format
    pub fn validate(&self, file_name: &str, content_type: Option<&str>) -> Result<()> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        let extension_ok = extension
            .as_ref()
            .map_or(false, |ext| self.config.allowed_extensions.contains(ext));
        let content_type_ok = content_type
            .map(|ct| ct.split(';').next().unwrap_or("").trim())
            .map_or(false, |ct| ct.eq_ignore_ascii_case(&self.config.mime_type));

        if extension_ok || (extension.is_none() && content_type_ok) {
            Ok(())
        } else {
            Err(AssistantError::UnsupportedFormat(file_name.to_string()))
        }
    }

    /// Copy `reader` into a fresh temporary file
    pub async fn stage_reader<R>(&self, display_name: &str, content_type: Option<&str>, reader: &mut R) -> Result<StagedVideo>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.validate(display_name, content_type)?;

        let extension = self.config.allowed_extensions.first().map(String::as_str).unwrap_or("mp4");
        let suffix = format!(".{}", extension);
        let mut builder = tempfile::Builder::new();
        builder.prefix("shorts-").suffix(&suffix);
        let temp = match &self.config.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        let mut out = tokio::fs::File::from_std(temp.reopen()?);
        let size = tokio::io::copy(reader, &mut out).await?;
        out.flush().await?;
        drop(out);

        if size == 0 {
            return Err(AssistantError::MissingVideo);
        }

        if self.config.verify_container && !has_ftyp_box(temp.path()).await? {
            return Err(AssistantError::UnsupportedFormat(format!(
                "{} is not an MP4 container",
                display_name
            )));
        }

        info!("📹 Staged {} ({:.1} MB) at {}", display_name, size as f64 / 1_000_000.0, temp.path().display());

        Ok(StagedVideo {
            file: temp,
            display_name: display_name.to_string(),
            mime_type: self.config.mime_type.clone(),
            size,
        })
    }

    /// Stage raw bytes, e.g. an upload already held in memory
    pub async fn stage_bytes(&self, display_name: &str, content_type: Option<&str>, bytes: &[u8]) -> Result<StagedVideo> {
        let mut reader = bytes;
        self.stage_reader(display_name, content_type, &mut reader).await
    }

    /// Stage a local file
    pub async fn stage_path(&self, path: &Path) -> Result<StagedVideo> {
        let display_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "video.mp4".to_string());
        let mut file = tokio::fs::File::open(path).await?;
        self.stage_reader(&display_name, None, &mut file).await
    }
}

/// ISO base media files carry an `ftyp` box type at offset 4
async fn has_ftyp_box(path: &Path) -> Result<bool> {
    let mut header = [0u8; 8];
    let mut file = tokio::fs::File::open(path).await?;
    match file.read_exact(&mut header).await {
        Ok(_) => Ok(&header[4..8] == b"ftyp"),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}
