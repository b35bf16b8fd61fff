use crate::config::StoreConfig;
use crate::store::{
    EventQuery, EventRecord, FaceRecord, NewEvent, SessionRecord, StudentRecord, TelemetryStore,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Batch size for paginated deletion in `clear_all`
const CLEAR_BATCH_SIZE: i64 = 500;

/// Managed PostgreSQL backend
///
/// Identifiers are backend-generated (`BIGSERIAL`); this backend carries no
/// local counters, so ids are not comparable across backends.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to PostgreSQL and optionally run migrations.
    pub async fn connect(config: &StoreConfig, url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        let store = Self { pool };
        if config.run_migrations {
            store.run_migrations().await?;
        }

        Ok(store)
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Delete one table's rows in bounded batches. Best-effort: a failure
    /// stops this table only.
    async fn clear_table(&self, table: &str) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {table} WHERE ctid IN (SELECT ctid FROM {table} LIMIT {CLEAR_BATCH_SIZE})"
        );

        let mut deleted = 0u64;
        loop {
            let result = sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to clear table {table}"))?;

            if result.rows_affected() == 0 {
                break;
            }
            deleted += result.rows_affected();
        }

        debug!(table = table, deleted = deleted, "Table cleared");
        Ok(deleted)
    }
}

/// Build the filtered event listing query. Filters are ANDed exact matches;
/// results order newest-first by timestamp with id as tiebreak.
fn build_events_sql(query: &EventQuery) -> String {
    let mut sql = String::from(
        "SELECT id, face_label, emotion, confidence, delta, session_id, timestamp \
         FROM events WHERE 1=1",
    );

    let mut param_count = 0;

    if query.face_label.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND face_label = ${param_count}"));
    }

    if query.session_id.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND session_id = ${param_count}"));
    }

    sql.push_str(" ORDER BY timestamp DESC, id DESC");

    param_count += 1;
    sql.push_str(&format!(" LIMIT ${param_count}"));

    sql
}

#[async_trait]
impl TelemetryStore for PgStore {
    async fn get_faces(&self) -> Vec<FaceRecord> {
        let result = sqlx::query_as::<_, FaceRecord>(
            "SELECT id, label, descriptor, created_at FROM faces \
             ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await;

        match result {
            Ok(faces) => faces,
            Err(e) => {
                warn!(error = %e, "Face read failed, returning empty list");
                metrics::counter!("collector.store.read_errors").increment(1);
                Vec::new()
            }
        }
    }

    #[instrument(skip(self, descriptor), fields(label = %label))]
    async fn add_face(&self, label: String, descriptor: Vec<f32>) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO faces (label, descriptor, created_at) \
             VALUES ($1, $2, NOW()) RETURNING id",
        )
        .bind(&label)
        .bind(&descriptor)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert face record")?;

        Ok(id)
    }

    async fn insert_event(&self, event: NewEvent) -> Result<i64> {
        let timestamp = event.timestamp.unwrap_or_else(Utc::now);

        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO events (face_label, emotion, confidence, delta, session_id, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(&event.face_label)
        .bind(&event.emotion)
        .bind(event.confidence)
        .bind(event.delta)
        .bind(event.session_id)
        .bind(timestamp)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert event record")?;

        Ok(id)
    }

    async fn get_events(&self, query: EventQuery) -> Vec<EventRecord> {
        let sql = build_events_sql(&query);

        let mut query_builder = sqlx::query_as::<_, EventRecord>(&sql);
        if let Some(ref face_label) = query.face_label {
            query_builder = query_builder.bind(face_label);
        }
        if let Some(session_id) = query.session_id {
            query_builder = query_builder.bind(session_id);
        }
        query_builder = query_builder.bind(query.limit as i64);

        match query_builder.fetch_all(&self.pool).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Event read failed, returning empty list");
                metrics::counter!("collector.store.read_errors").increment(1);
                Vec::new()
            }
        }
    }

    async fn add_session(&self, name: Option<String>, meta: serde_json::Value) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO sessions (name, meta, created_at) \
             VALUES ($1, $2, NOW()) RETURNING id",
        )
        .bind(&name)
        .bind(&meta)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert session record")?;

        Ok(id)
    }

    async fn get_sessions(&self) -> Vec<SessionRecord> {
        let result = sqlx::query_as::<_, SessionRecord>(
            "SELECT id, name, meta, created_at FROM sessions \
             ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await;

        match result {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "Session read failed, returning empty list");
                metrics::counter!("collector.store.read_errors").increment(1);
                Vec::new()
            }
        }
    }

    async fn get_student(&self, email: &str) -> Option<StudentRecord> {
        let result = sqlx::query_as::<_, StudentRecord>(
            "SELECT email, name, history FROM students WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(student) => student,
            Err(e) => {
                warn!(error = %e, "Student read failed, returning not found");
                metrics::counter!("collector.store.read_errors").increment(1);
                None
            }
        }
    }

    async fn put_student(
        &self,
        email: String,
        name: Option<String>,
        history: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO students (email, name, history) VALUES ($1, $2, $3) \
             ON CONFLICT (email) DO UPDATE SET name = EXCLUDED.name, history = EXCLUDED.history",
        )
        .bind(&email)
        .bind(&name)
        .bind(&history)
        .execute(&self.pool)
        .await
        .context("Failed to upsert student record")?;

        Ok(())
    }

    /// Paginated batch deletion, one collection at a time. Not transactional
    /// across collections: a crash mid-clear leaves some collections wiped
    /// and others not.
    #[instrument(skip(self))]
    async fn clear_all(&self) -> Result<()> {
        let mut first_error = None;

        for table in ["events", "faces", "students", "sessions"] {
            if let Err(e) = self.clear_table(table).await {
                warn!(table = table, error = %e, "Failed to clear collection");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("All collections cleared");
                Ok(())
            }
        }
    }
}
