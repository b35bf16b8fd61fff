use crate::store::{
    EventQuery, EventRecord, FaceRecord, NewEvent, SessionRecord, StudentRecord, TelemetryStore,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Backend-local identifier counters
///
/// These never regress or repeat within one backend instance. Students carry
/// no counter; they are keyed by email.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Counters {
    faces: i64,
    events: i64,
    sessions: i64,
}

/// The whole persisted document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    #[serde(rename = "_counters", default)]
    counters: Counters,
    #[serde(default)]
    faces: Vec<FaceRecord>,
    #[serde(default)]
    events: Vec<EventRecord>,
    #[serde(default)]
    students: Vec<StudentRecord>,
    #[serde(default)]
    sessions: Vec<SessionRecord>,
}

/// Local JSON file backend
///
/// Every write reads, modifies, and rewrites the whole document; the file is
/// replaced in a single rename so it is never left partially written. A
/// missing or unparsable file is treated as the default empty document.
/// Operations are serialized behind one async mutex; concurrent writers from
/// other processes are out of scope.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Create a file store backed by the given path. The file is created on
    /// first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Read the document, recreating the default shape when the file is
    /// absent or unparsable.
    fn load(&self) -> Document {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Data file not readable, using default document");
                return Document::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Data file unparsable, recreating default document"
                );
                Document::default()
            }
        }
    }

    /// Write the complete serialized document in one atomic replacement.
    fn persist(&self, doc: &Document) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory {}", parent.display()))?;

        // Temp file in the same directory so the rename stays on one
        // filesystem.
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create temporary data file")?;
        serde_json::to_writer_pretty(&mut tmp, doc).context("Failed to serialize data file")?;
        tmp.flush().context("Failed to flush temporary data file")?;
        tmp.persist(&self.path).map_err(|e| {
            anyhow::anyhow!("Failed to replace data file {}: {}", self.path.display(), e)
        })?;

        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for FileStore {
    async fn get_faces(&self) -> Vec<FaceRecord> {
        let _guard = self.lock.lock().await;
        let mut faces = self.load().faces;
        faces.reverse();
        faces
    }

    async fn add_face(&self, label: String, descriptor: Vec<f32>) -> Result<i64> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load();

        let id = doc.counters.faces + 1;
        doc.counters.faces = id;
        doc.faces.push(FaceRecord {
            id,
            label,
            descriptor,
            created_at: Utc::now(),
        });

        self.persist(&doc)?;
        Ok(id)
    }

    async fn insert_event(&self, event: NewEvent) -> Result<i64> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load();

        let id = doc.counters.events + 1;
        doc.counters.events = id;
        doc.events.push(EventRecord {
            id,
            face_label: event.face_label,
            emotion: event.emotion,
            confidence: event.confidence,
            delta: event.delta,
            session_id: event.session_id,
            timestamp: event.timestamp.unwrap_or_else(Utc::now),
        });

        self.persist(&doc)?;
        Ok(id)
    }

    async fn get_events(&self, query: EventQuery) -> Vec<EventRecord> {
        let _guard = self.lock.lock().await;
        let doc = self.load();

        let mut events: Vec<EventRecord> = doc
            .events
            .into_iter()
            .filter(|e| {
                query
                    .face_label
                    .as_deref()
                    .map_or(true, |label| e.face_label.as_deref() == Some(label))
            })
            .filter(|e| {
                query
                    .session_id
                    .map_or(true, |session| e.session_id == Some(session))
            })
            .collect();

        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        events.truncate(query.limit);
        events
    }

    async fn add_session(&self, name: Option<String>, meta: serde_json::Value) -> Result<i64> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load();

        let id = doc.counters.sessions + 1;
        doc.counters.sessions = id;
        doc.sessions.push(SessionRecord {
            id,
            name,
            meta,
            created_at: Utc::now(),
        });

        self.persist(&doc)?;
        Ok(id)
    }

    async fn get_sessions(&self) -> Vec<SessionRecord> {
        let _guard = self.lock.lock().await;
        let mut sessions = self.load().sessions;
        sessions.reverse();
        sessions
    }

    async fn get_student(&self, email: &str) -> Option<StudentRecord> {
        let _guard = self.lock.lock().await;
        self.load().students.into_iter().find(|s| s.email == email)
    }

    async fn put_student(
        &self,
        email: String,
        name: Option<String>,
        history: serde_json::Value,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load();

        let record = StudentRecord {
            email,
            name,
            history,
        };
        match doc.students.iter_mut().find(|s| s.email == record.email) {
            Some(existing) => *existing = record,
            None => doc.students.push(record),
        }

        self.persist(&doc)
    }

    async fn clear_all(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        // One atomic overwrite with the default document; counters restart.
        self.persist(&Document::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> FileStore {
        FileStore::new(dir.path().join("telemetry.json"))
    }

    fn event(face_label: Option<&str>, session_id: Option<i64>) -> NewEvent {
        NewEvent {
            face_label: face_label.map(str::to_string),
            emotion: Some("happy".to_string()),
            confidence: 90.0,
            delta: 2,
            session_id,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_identifiers_strictly_increase() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        let f1 = store.add_face("Me".into(), vec![0.1; 128]).await.unwrap();
        let f2 = store.add_face("Me".into(), vec![0.2; 128]).await.unwrap();
        let e1 = store.insert_event(event(None, None)).await.unwrap();
        let e2 = store.insert_event(event(None, None)).await.unwrap();
        let s1 = store.add_session(None, serde_json::Value::Null).await.unwrap();

        assert!(f2 > f1);
        assert!(e2 > e1);
        assert_eq!((f1, e1, s1), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_counters_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("telemetry.json");

        let store = FileStore::new(&path);
        store.insert_event(event(None, None)).await.unwrap();
        store.insert_event(event(None, None)).await.unwrap();

        let reopened = FileStore::new(&path);
        let id = reopened.insert_event(event(None, None)).await.unwrap();
        assert_eq!(id, 3);
        assert_eq!(reopened.get_events(EventQuery::default()).await.len(), 3);
    }

    #[tokio::test]
    async fn test_event_filters_are_exact_and_anded() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.insert_event(event(Some("Alice"), Some(1))).await.unwrap();
        store.insert_event(event(Some("alice"), Some(1))).await.unwrap();
        store.insert_event(event(Some("Alice"), Some(2))).await.unwrap();
        store.insert_event(event(None, Some(1))).await.unwrap();

        let by_label = store
            .get_events(EventQuery {
                face_label: Some("Alice".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(by_label.len(), 2);
        assert!(by_label.iter().all(|e| e.face_label.as_deref() == Some("Alice")));

        let both = store
            .get_events(EventQuery {
                face_label: Some("Alice".into()),
                session_id: Some(1),
                ..Default::default()
            })
            .await;
        assert_eq!(both.len(), 1);
    }

    #[tokio::test]
    async fn test_events_newest_first_by_timestamp() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        let now = Utc::now();
        let mut old = event(None, None);
        old.timestamp = Some(now - Duration::minutes(10));
        let mut recent = event(None, None);
        recent.timestamp = Some(now);

        // Insert the older event second; ordering follows timestamps, not
        // arrival order.
        store.insert_event(recent).await.unwrap();
        store.insert_event(old).await.unwrap();

        let events = store.get_events(EventQuery::default()).await;
        assert_eq!(events.len(), 2);
        assert!(events[0].timestamp > events[1].timestamp);
    }

    #[tokio::test]
    async fn test_event_limit_is_applied() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        for _ in 0..5 {
            store.insert_event(event(None, None)).await.unwrap();
        }

        let events = store
            .get_events(EventQuery {
                limit: 3,
                ..Default::default()
            })
            .await;
        assert_eq!(events.len(), 3);
        // Newest survive the truncation.
        assert_eq!(events[0].id, 5);
    }

    #[tokio::test]
    async fn test_duplicate_labels_are_kept() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.add_face("Me".into(), vec![0.1; 128]).await.unwrap();
        store.add_face("Me".into(), vec![0.9; 128]).await.unwrap();

        let faces = store.get_faces().await;
        assert_eq!(faces.len(), 2);
        assert!(faces.iter().all(|f| f.label == "Me"));
    }

    #[tokio::test]
    async fn test_student_history_upserts() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store
            .put_student(
                "kim@example.edu".into(),
                Some("Kim".into()),
                serde_json::json!({"scores": [70]}),
            )
            .await
            .unwrap();
        store
            .put_student(
                "kim@example.edu".into(),
                Some("Kim".into()),
                serde_json::json!({"scores": [70, 85]}),
            )
            .await
            .unwrap();

        let record = store.get_student("kim@example.edu").await.unwrap();
        assert_eq!(record.history["scores"].as_array().unwrap().len(), 2);
        assert_eq!(store.load().students.len(), 1);
        assert!(store.get_student("other@example.edu").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_all_empties_every_collection() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.add_face("Me".into(), vec![0.1; 128]).await.unwrap();
        store.insert_event(event(Some("Me"), None)).await.unwrap();
        store.add_session(Some("morning".into()), serde_json::Value::Null).await.unwrap();
        store
            .put_student("kim@example.edu".into(), None, serde_json::Value::Null)
            .await
            .unwrap();

        store.clear_all().await.unwrap();

        assert!(store.get_faces().await.is_empty());
        assert!(store.get_events(EventQuery::default()).await.is_empty());
        assert!(store.get_sessions().await.is_empty());
        assert!(store.get_student("kim@example.edu").await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_recreates_default_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("telemetry.json");
        std::fs::write(&path, "not valid json {{{").unwrap();

        let store = FileStore::new(&path);
        assert!(store.get_faces().await.is_empty());

        // Writes start over from the default shape.
        let id = store.add_face("Me".into(), vec![0.1; 128]).await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(store.get_faces().await.len(), 1);
    }
}
