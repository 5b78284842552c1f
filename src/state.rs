use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::llm::{ChatRole, ChatTurn};
use crate::processing::{VideoAnalysis, SEED_REQUEST};

/// Everything one user session remembers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Raw text of the last successful analysis
    pub analysis_result: Option<String>,

    /// Seed request, seed analysis, then user/model pairs in order
    pub chat_history: Vec<ChatTurn>,

    /// Remote name of the last video that finished processing
    pub uploaded_file: Option<String>,

    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl SessionState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            analysis_result: None,
            chat_history: Vec::new(),
            uploaded_file: None,
            created_at: now,
            last_active: now,
        }
    }

    pub fn has_analysis(&self) -> bool {
        self.analysis_result.is_some()
    }

    /// Store a finished analysis and reset the transcript to the two seed turns
    pub fn record_analysis(&mut self, analysis: &VideoAnalysis) {
        self.analysis_result = Some(analysis.text.clone());
        self.uploaded_file = Some(analysis.remote_file.name.clone());
        self.chat_history = vec![
            ChatTurn::user(SEED_REQUEST),
            ChatTurn::model(analysis.text.clone()),
        ];
        self.touch();
    }

    pub fn push_user_turn(&mut self, content: &str) {
        self.chat_history.push(ChatTurn::user(content));
        self.touch();
    }

    pub fn push_model_turn(&mut self, content: &str) {
        self.chat_history.push(ChatTurn::model(content));
        self.touch();
    }

    /// Turns replayed before the next message: the seed pair plus at most
    /// `max_turns` of the most recent ones (everything when `None`).
    /// The kept tail always opens on a user turn so roles keep alternating.
    pub fn replay_context(&self, max_turns: Option<usize>) -> Vec<ChatTurn> {
        let seed_len = self.chat_history.len().min(2);
        match max_turns {
            Some(n) if self.chat_history.len() > seed_len + n => {
                let mut tail_start = self.chat_history.len() - n;
                while tail_start < self.chat_history.len() && self.chat_history[tail_start].role != ChatRole::User {
                    tail_start += 1;
                }
                self.chat_history[..seed_len]
                    .iter()
                    .chain(self.chat_history[tail_start..].iter())
                    .cloned()
                    .collect()
            }
            _ => self.chat_history.clone(),
        }
    }

    fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// A session plus the bookkeeping needed to serve it concurrently
#[derive(Debug)]
pub struct SessionHandle {
    pub id: Uuid,
    state: tokio::sync::Mutex<SessionState>,
    job: Mutex<Option<CancellationToken>>,
    last_seen: Mutex<Instant>,
}

/// Marks an analysis as in flight; clears the slot when dropped
pub struct JobGuard<'a> {
    handle: &'a SessionHandle,
    token: CancellationToken,
}

impl JobGuard<'_> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        let mut job = self.handle.job.lock().unwrap_or_else(PoisonError::into_inner);
        *job = None;
    }
}

impl SessionHandle {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            state: tokio::sync::Mutex::new(SessionState::new()),
            job: Mutex::new(None),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Lock the session state; actions of one session run one at a time
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.touch();
        self.state.lock().await
    }

    /// Claim the analysis slot, or `None` if an analysis is already running
    pub fn begin_job(&self) -> Option<JobGuard<'_>> {
        self.touch();
        let mut job = self.job.lock().unwrap_or_else(PoisonError::into_inner);
        if job.is_some() {
            return None;
        }
        let token = CancellationToken::new();
        *job = Some(token.clone());
        Some(JobGuard { handle: self, token })
    }

    /// Cancel the running analysis; returns whether there was one
    pub fn cancel_job(&self) -> bool {
        let job = self.job.lock().unwrap_or_else(PoisonError::into_inner);
        match job.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.job.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen.lock().unwrap_or_else(PoisonError::into_inner).elapsed()
    }
}

/// In-memory registry of live sessions
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Arc<SessionHandle>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle::new(Uuid::new_v4()));
        self.sessions.write().await.insert(handle.id, handle.clone());
        info!("🆕 Session {} started", handle.id);
        handle
    }

    pub async fn get(&self, id: &Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// End a session, cancelling anything it still has in flight
    pub async fn remove(&self, id: &Uuid) -> bool {
        match self.sessions.write().await.remove(id) {
            Some(handle) => {
                handle.cancel_job();
                info!("👋 Session {} ended", id);
                true
            }
            None => false,
        }
    }

    /// Drop sessions idle for longer than `ttl`
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, handle| {
            let keep = handle.idle_for() < ttl;
            if !keep {
                handle.cancel_job();
                debug!("⌛ Session {} expired", id);
            }
            keep
        });
        let removed = before - sessions.len();
        if removed > 0 {
            info!("🧹 Evicted {} idle sessions", removed);
        }
        removed
    }

    pub async fn get_statistics(&self) -> SessionStoreStats {
        let sessions = self.sessions.read().await;
        SessionStoreStats {
            total_sessions: sessions.len(),
            busy_sessions: sessions.values().filter(|h| h.is_busy()).count(),
        }
    }
}

/// Session store statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStoreStats {
    pub total_sessions: usize,
    pub busy_sessions: usize,
}
