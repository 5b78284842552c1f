//! API module for the Shorts Assistant
//!
//! Serves the single-page UI and the JSON endpoints behind it.

use anyhow::Result;
use tracing::info;

pub mod error;
pub mod handlers;
pub mod models;
pub mod server;

pub use server::{build_router, AppState, ServiceConnector};

/// API server owning the shared application state
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Start the API server
    pub async fn start(self) -> Result<()> {
        info!(
            "🚀 Starting API server on {}:{}",
            self.state.config.server.host, self.state.config.server.port
        );
        server::start_http_server(self.state).await
    }
}
