//! Scripted in-memory service for exercising the flows without network access

use super::{ChatTurn, FileState, GenerationResponse, GenerativeService, RemoteFile};
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Counters for the calls a mock has received
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub uploads: usize,
    pub polls: usize,
    pub generations: usize,
    pub chats: usize,
}

/// Mock generative service driven by scripted states and replies
pub struct MockGenerativeService {
    upload_state: FileState,
    upload_error: Option<String>,
    poll_states: Mutex<VecDeque<FileState>>,
    analysis: Mutex<VecDeque<std::result::Result<String, String>>>,
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    calls: Mutex<MockCalls>,
    uploaded: Mutex<Vec<(PathBuf, bool)>>,
    chat_histories: Mutex<Vec<Vec<ChatTurn>>>,
}

impl MockGenerativeService {
    /// Upload reports PROCESSING, the first poll reports ACTIVE
    pub fn new() -> Self {
        Self {
            upload_state: FileState::Processing,
            upload_error: None,
            poll_states: Mutex::new(VecDeque::from([FileState::Active])),
            analysis: Mutex::new(VecDeque::new()),
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(MockCalls::default()),
            uploaded: Mutex::new(Vec::new()),
            chat_histories: Mutex::new(Vec::new()),
        }
    }

    pub fn with_upload_state(mut self, state: FileState) -> Self {
        self.upload_state = state;
        self
    }

    /// States returned by successive polls; the last one repeats
    pub fn with_poll_states(self, states: Vec<FileState>) -> Self {
        *self.poll_states.lock().unwrap() = states.into();
        self
    }

    pub fn with_upload_error(mut self, message: &str) -> Self {
        self.upload_error = Some(message.to_string());
        self
    }

    pub fn with_analysis(self, text: &str) -> Self {
        self.analysis.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn with_analysis_error(self, message: &str) -> Self {
        self.analysis.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn with_reply(self, text: &str) -> Self {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn with_reply_error(self, message: &str) -> Self {
        self.replies.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> MockCalls {
        self.calls.lock().unwrap().clone()
    }

    /// Paths handed to `upload_file`, with whether the file existed at that moment
    pub fn uploaded_paths(&self) -> Vec<(PathBuf, bool)> {
        self.uploaded.lock().unwrap().clone()
    }

    /// History passed to each `chat` call
    pub fn chat_histories(&self) -> Vec<Vec<ChatTurn>> {
        self.chat_histories.lock().unwrap().clone()
    }

    fn scripted(
        queue: &Mutex<VecDeque<std::result::Result<String, String>>>,
        fallback: String,
    ) -> Result<GenerationResponse> {
        match queue.lock().unwrap().pop_front().unwrap_or(Ok(fallback)) {
            Ok(text) => Ok(GenerationResponse {
                text,
                tokens_used: None,
            }),
            Err(body) => Err(AssistantError::Api { status: 500, body }),
        }
    }

    fn file(state: FileState) -> RemoteFile {
        RemoteFile {
            name: "files/mock-video".to_string(),
            display_name: Some("mock.mp4".to_string()),
            mime_type: "video/mp4".to_string(),
            uri: "mock://files/mock-video".to_string(),
            state,
        }
    }
}

impl Default for MockGenerativeService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerativeService for MockGenerativeService {
    async fn upload_file(&self, path: &Path, _mime_type: &str, _display_name: &str) -> Result<RemoteFile> {
        self.calls.lock().unwrap().uploads += 1;
        self.uploaded
            .lock()
            .unwrap()
            .push((path.to_path_buf(), path.exists()));
        if let Some(body) = &self.upload_error {
            return Err(AssistantError::Api {
                status: 400,
                body: body.clone(),
            });
        }
        Ok(Self::file(self.upload_state))
    }

    async fn get_file(&self, _name: &str) -> Result<RemoteFile> {
        self.calls.lock().unwrap().polls += 1;
        let mut states = self.poll_states.lock().unwrap();
        let state = if states.len() > 1 {
            states.pop_front().unwrap_or(FileState::Active)
        } else {
            states.front().copied().unwrap_or(FileState::Active)
        };
        Ok(Self::file(state))
    }

    async fn generate_content(&self, _file: &RemoteFile, _prompt: &str) -> Result<GenerationResponse> {
        self.calls.lock().unwrap().generations += 1;
        Self::scripted(&self.analysis, "Mock analysis".to_string())
    }

    async fn chat(&self, history: &[ChatTurn], _message: &str) -> Result<GenerationResponse> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.chats += 1;
            calls.chats
        };
        self.chat_histories.lock().unwrap().push(history.to_vec());
        Self::scripted(&self.replies, format!("Mock reply {}", n))
    }
}
