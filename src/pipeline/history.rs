use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::db::executor::QueryResult;

const PREVIEW_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    pub columns: Vec<String>,
    pub row_count: usize,
    pub preview: Vec<Map<String, Value>>,
}

impl ResultSummary {
    pub fn of(result: &QueryResult) -> Self {
        let mut preview = result.records();
        preview.truncate(PREVIEW_ROWS);
        Self {
            columns: result.columns.clone(),
            row_count: result.row_count(),
            preview,
        }
    }
}

/// One answered question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub question: String,
    pub sql: String,
    pub summary: ResultSummary,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(question: impl Into<String>, sql: impl Into<String>, result: &QueryResult) -> Self {
        Self {
            question: question.into(),
            sql: sql.into(),
            summary: ResultSummary::of(result),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only record of one session's successful runs, oldest first.
#[derive(Debug, Default)]
pub struct SessionHistory {
    entries: Vec<HistoryEntry>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub fn all(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// The latest `n` entries, most recent first.
    pub fn recent(&self, n: usize) -> Vec<HistoryEntry> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type SharedHistory = Arc<Mutex<SessionHistory>>;

pub struct Session {
    pub id: String,
    pub history: SharedHistory,
    pub created: bool,
}

struct Slot {
    history: SharedHistory,
    last_access: Instant,
}

/// Session id to history store. A session is only stored once it has
/// history, and is dropped after `idle_timeout` without use.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Slot>>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    fn sweep(&self, sessions: &mut HashMap<String, Slot>) {
        let before = sessions.len();
        sessions.retain(|_, slot| slot.last_access.elapsed() < self.idle_timeout);
        if sessions.len() < before {
            debug!("Expired {} idle session(s)", before - sessions.len());
        }
    }

    /// History of a live session. Never creates one.
    pub async fn lookup(&self, id: Option<&str>) -> Option<SharedHistory> {
        let id = id?;
        let mut sessions = self.sessions.write().await;
        self.sweep(&mut sessions);
        let slot = sessions.get_mut(id)?;
        slot.last_access = Instant::now();
        Some(Arc::clone(&slot.history))
    }

    /// Store for a run. Unknown or missing ids get a fresh, not yet
    /// registered session; see [`SessionRegistry::keep`].
    pub async fn open(&self, id: Option<&str>) -> Session {
        if let Some(history) = self.lookup(id).await {
            return Session {
                id: id.unwrap_or_default().to_string(),
                history,
                created: false,
            };
        }

        let id = Uuid::new_v4().to_string();
        debug!("Opening session {}", id);
        Session {
            id,
            history: SharedHistory::default(),
            created: true,
        }
    }

    /// Registers `session` if its history has entries. Returns whether the
    /// session is stored afterwards.
    pub async fn keep(&self, session: &Session) -> bool {
        if session.history.lock().await.is_empty() {
            return self.sessions.read().await.contains_key(&session.id);
        }
        let mut sessions = self.sessions.write().await;
        self.sweep(&mut sessions);
        let slot = sessions.entry(session.id.clone()).or_insert_with(|| Slot {
            history: Arc::clone(&session.history),
            last_access: Instant::now(),
        });
        slot.last_access = Instant::now();
        true
    }

    /// Drops the session and its history.
    pub async fn end(&self, id: &str) {
        if self.sessions.write().await.remove(id).is_some() {
            debug!("Ended session {}", id);
        }
    }

    pub async fn count(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        self.sweep(&mut sessions);
        sessions.len()
    }
}
