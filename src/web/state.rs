use std::time::Duration;

use crate::config::AppConfig;
use crate::pipeline::history::SessionRegistry;
use crate::pipeline::Assistant;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub assistant: Assistant,
    pub sessions: SessionRegistry,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, assistant: Assistant) -> Self {
        let session_idle_secs = config.assistant.session_idle_secs;
        Self {
            config,
            assistant,
            sessions: SessionRegistry::new(Duration::from_secs(session_idle_secs)),
            startup_time: chrono::Utc::now(),
        }
    }
}
