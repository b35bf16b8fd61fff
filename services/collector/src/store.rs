use crate::config::StoreConfig;
use crate::file_store::FileStore;
use crate::pg_store::PgStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::sync::Arc;
use tracing::{info, warn};

/// Default cap on `get_events` results
pub const DEFAULT_EVENT_LIMIT: usize = 500;

/// Enrolled face sample
///
/// Labels are free text and not unique; multiple records may share a label
/// (multiple samples per identity).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FaceRecord {
    /// Identifier, monotonic per backend instance
    pub id: i64,
    /// Human-assigned identity label
    pub label: String,
    /// Classification feature vector, opaque to the store
    pub descriptor: Vec<f32>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

/// Classification event, append-only
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventRecord {
    /// Identifier, monotonic per backend instance
    pub id: i64,
    /// Identity label ("unknown" allowed), null when absent
    pub face_label: Option<String>,
    /// Emotion label from the fixed classification set
    pub emotion: Option<String>,
    /// Classification confidence, 0-100
    pub confidence: f64,
    /// Signed score contribution
    pub delta: i32,
    /// Session tag used as a query filter
    pub session_id: Option<i64>,
    /// Event timestamp; the source of truth for ordering
    pub timestamp: DateTime<Utc>,
}

/// Logical grouping tag for events
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionRecord {
    pub id: i64,
    pub name: Option<String>,
    /// Opaque caller-supplied metadata
    #[serde(default)]
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Student history, keyed by email with upsert semantics
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentRecord {
    pub email: String,
    pub name: Option<String>,
    /// Opaque history object (past scores, study hours, ...)
    #[serde(default)]
    pub history: serde_json::Value,
}

/// Fields for a new event; absent fields take defaults at insert time
#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    pub face_label: Option<String>,
    pub emotion: Option<String>,
    pub confidence: f64,
    pub delta: i32,
    pub session_id: Option<i64>,
    /// Defaults to the current time when omitted
    pub timestamp: Option<DateTime<Utc>>,
}

/// Query parameters for event listing
///
/// Provided filters are combined with logical AND and match exactly.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub face_label: Option<String>,
    pub session_id: Option<i64>,
    /// Maximum number of results
    pub limit: usize,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            face_label: None,
            session_id: None,
            limit: DEFAULT_EVENT_LIMIT,
        }
    }
}

/// Uniform persistence surface over both storage backends
///
/// Callers hold `Arc<dyn TelemetryStore>` and never learn which backend is
/// live. Read operations degrade to empty results on storage failure so the
/// ingestion surface stays available for writes. `clear_all` on the managed
/// backend deletes each collection independently; a crash mid-clear can
/// leave collections in mixed states.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// All enrolled faces, newest-first. Never errors.
    async fn get_faces(&self) -> Vec<FaceRecord>;

    /// Append a face sample; returns the new identifier.
    async fn add_face(&self, label: String, descriptor: Vec<f32>) -> Result<i64>;

    /// Append an event; returns the new identifier.
    async fn insert_event(&self, event: NewEvent) -> Result<i64>;

    /// Events newest-first (timestamp descending, id descending tiebreak),
    /// filtered and truncated per the query. Never errors.
    async fn get_events(&self, query: EventQuery) -> Vec<EventRecord>;

    /// Create a session tag; returns the new identifier.
    async fn add_session(&self, name: Option<String>, meta: serde_json::Value) -> Result<i64>;

    /// All sessions, newest-first. Never errors.
    async fn get_sessions(&self) -> Vec<SessionRecord>;

    /// Student history by email, `None` when absent or unreadable.
    async fn get_student(&self, email: &str) -> Option<StudentRecord>;

    /// Upsert a student history record.
    async fn put_student(
        &self,
        email: String,
        name: Option<String>,
        history: serde_json::Value,
    ) -> Result<()>;

    /// Destructively reset all four collections.
    async fn clear_all(&self) -> Result<()>;
}

/// Select and initialize the storage backend
///
/// Evaluated exactly once at process start; there is no runtime switching.
/// Any credential or connection problem logs a warning and falls back to the
/// local file backend - backend selection is never fatal.
pub async fn connect(config: &StoreConfig) -> Arc<dyn TelemetryStore> {
    if let Some(url) = resolve_database_url(config) {
        match PgStore::connect(config, &url).await {
            Ok(store) => {
                info!(backend = "postgres", "Telemetry store backend selected");
                return Arc::new(store);
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "PostgreSQL backend unavailable, falling back to local file store"
                );
            }
        }
    }

    info!(
        backend = "file",
        path = %config.data_file.display(),
        "Telemetry store backend selected"
    );
    Arc::new(FileStore::new(&config.data_file))
}

/// Resolve the database credential: inline URL wins over a credential file.
fn resolve_database_url(config: &StoreConfig) -> Option<String> {
    if let Some(url) = &config.database_url {
        let url = url.trim();
        if !url.is_empty() {
            return Some(url.to_string());
        }
    }

    if let Some(path) = &config.database_url_file {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let url = contents.trim();
                if !url.is_empty() {
                    return Some(url.to_string());
                }
                warn!(path = %path, "Database credential file is empty, ignoring");
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to read database credential file");
            }
        }
    }

    None
}
