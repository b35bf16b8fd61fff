use crate::config::ApiConfig;
use crate::store::{
    EventQuery, EventRecord, FaceRecord, NewEvent, SessionRecord, StudentRecord, TelemetryStore,
};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, instrument};

/// Hard cap on event listing responses
pub const API_EVENT_LIMIT: usize = 1000;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TelemetryStore>,
}

/// Enroll face request body. Both fields are required.
#[derive(Debug, Deserialize)]
pub struct EnrollFaceRequest {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub descriptor: Option<Vec<f32>>,
}

/// Post event request body. Every field is optional; absent fields are
/// defaulted so the event producer is never blocked by validation.
#[derive(Debug, Default, Deserialize)]
pub struct PostEventRequest {
    #[serde(default)]
    pub face_label: Option<String>,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub delta: Option<i32>,
    #[serde(default)]
    pub session_id: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Query parameters for event listing
#[derive(Debug, Default, Deserialize)]
pub struct EventListQuery {
    pub face_label: Option<String>,
    pub session_id: Option<i64>,
}

/// Create session request body
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// Student history upsert body
#[derive(Debug, Default, Deserialize)]
pub struct PutHistoryRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub history: serde_json::Value,
}

/// Generic ok response
#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Session creation response
#[derive(Debug, Serialize)]
pub struct SessionCreatedResponse {
    pub ok: bool,
    pub id: i64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn store_error(operation: &str, e: anyhow::Error) -> ApiError {
    error!(error = %e, operation = operation, "Storage write failed");
    metrics::counter!("collector.store.write_errors").increment(1);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("Failed to {operation}"),
            code: "STORE_ERROR".to_string(),
        }),
    )
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/faces", get(list_faces).post(enroll_face))
        .route("/events", get(list_events).post(post_event))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/students/:email/history", get(get_student_history).post(put_student_history))
        .route("/_admin/clear", post(admin_clear))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint; no dependencies, never fails.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "timestamp": Utc::now()
    }))
}

/// List enrolled faces, newest-first
async fn list_faces(State(state): State<AppState>) -> Json<Vec<FaceRecord>> {
    Json(state.store.get_faces().await)
}

/// Enroll a face sample. Label and descriptor are both required; nothing is
/// written when either is missing.
#[instrument(skip(state, body))]
async fn enroll_face(
    State(state): State<AppState>,
    Json(body): Json<EnrollFaceRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let label = body.label.as_deref().map(str::trim).unwrap_or("");
    let descriptor = body.descriptor.unwrap_or_default();

    if label.is_empty() || descriptor.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "label and descriptor are required".to_string(),
                code: "INVALID_REQUEST".to_string(),
            }),
        ));
    }

    state
        .store
        .add_face(label.to_string(), descriptor)
        .await
        .map_err(|e| store_error("enroll face", e))?;

    metrics::counter!("collector.faces.enrolled").increment(1);
    Ok(Json(OkResponse { ok: true }))
}

/// Ingest one event. Accepts partial (or absent) bodies; missing fields are
/// defaulted rather than rejected.
#[instrument(skip(state, body))]
async fn post_event(
    State(state): State<AppState>,
    body: Option<Json<PostEventRequest>>,
) -> Result<Json<OkResponse>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let event = NewEvent {
        face_label: body.face_label,
        emotion: body.emotion,
        confidence: body.confidence.unwrap_or(0.0),
        delta: body.delta.unwrap_or(0),
        session_id: body.session_id,
        timestamp: body.timestamp,
    };

    state
        .store
        .insert_event(event)
        .await
        .map_err(|e| store_error("persist event", e))?;

    metrics::counter!("collector.events.ingested").increment(1);
    Ok(Json(OkResponse { ok: true }))
}

/// List events with optional exact-match filters, newest-first
#[instrument(skip(state))]
async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<EventListQuery>,
) -> Json<Vec<EventRecord>> {
    let query = EventQuery {
        face_label: params.face_label,
        session_id: params.session_id,
        limit: API_EVENT_LIMIT,
    };

    Json(state.store.get_events(query).await)
}

/// Create a session tag
#[instrument(skip(state, body))]
async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<Json<SessionCreatedResponse>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let id = state
        .store
        .add_session(body.name, body.meta)
        .await
        .map_err(|e| store_error("create session", e))?;

    Ok(Json(SessionCreatedResponse { ok: true, id }))
}

/// List sessions, newest-first
async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionRecord>> {
    Json(state.store.get_sessions().await)
}

/// Fetch one student's history
#[instrument(skip(state))]
async fn get_student_history(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<StudentRecord>, ApiError> {
    match state.store.get_student(&email).await {
        Some(record) => Ok(Json(record)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Student history not found".to_string(),
                code: "NOT_FOUND".to_string(),
            }),
        )),
    }
}

/// Upsert one student's history
#[instrument(skip(state, body))]
async fn put_student_history(
    State(state): State<AppState>,
    Path(email): Path<String>,
    body: Option<Json<PutHistoryRequest>>,
) -> Result<Json<OkResponse>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    state
        .store
        .put_student(email, body.name, body.history)
        .await
        .map_err(|e| store_error("upsert student history", e))?;

    Ok(Json(OkResponse { ok: true }))
}

/// Wipe all collections. Development use only: unauthenticated, no
/// confirmation, no audit trail.
#[instrument(skip(state))]
async fn admin_clear(State(state): State<AppState>) -> Result<Json<OkResponse>, ApiError> {
    state
        .store
        .clear_all()
        .await
        .map_err(|e| store_error("clear collections", e))?;

    metrics::counter!("collector.admin.clears").increment(1);
    Ok(Json(OkResponse { ok: true }))
}

/// Start the ingestion API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!(address = %addr, "Starting ingestion API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_store::FileStore;
    use tempfile::tempdir;

    fn test_state(dir: &tempfile::TempDir) -> AppState {
        AppState {
            store: Arc::new(FileStore::new(dir.path().join("telemetry.json"))),
        }
    }

    #[tokio::test]
    async fn test_post_event_with_empty_body_succeeds() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);

        let response = post_event(State(state.clone()), None).await.unwrap();
        assert!(response.0.ok);

        let events = list_events(State(state), Query(EventListQuery::default())).await;
        assert_eq!(events.0.len(), 1);
        let event = &events.0[0];
        assert!(event.face_label.is_none());
        assert!(event.emotion.is_none());
        assert_eq!(event.confidence, 0.0);
        assert_eq!(event.delta, 0);
        assert!(event.session_id.is_none());
    }

    #[tokio::test]
    async fn test_post_event_keeps_supplied_fields() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);

        let body = PostEventRequest {
            face_label: Some("Me".into()),
            emotion: Some("angry".into()),
            confidence: Some(50.0),
            delta: Some(-2),
            ..Default::default()
        };
        post_event(State(state.clone()), Some(Json(body))).await.unwrap();

        let events = list_events(State(state), Query(EventListQuery::default())).await;
        assert_eq!(events.0[0].face_label.as_deref(), Some("Me"));
        assert_eq!(events.0[0].delta, -2);
    }

    #[tokio::test]
    async fn test_enroll_face_rejects_missing_fields() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);

        let result = enroll_face(
            State(state.clone()),
            Json(EnrollFaceRequest {
                label: None,
                descriptor: None,
            }),
        )
        .await;

        let (status, _) = result.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(list_faces(State(state)).await.0.is_empty());
    }

    #[tokio::test]
    async fn test_enroll_face_rejects_blank_label() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);

        let result = enroll_face(
            State(state.clone()),
            Json(EnrollFaceRequest {
                label: Some("   ".into()),
                descriptor: Some(vec![0.5; 128]),
            }),
        )
        .await;

        assert!(result.is_err());
        assert!(list_faces(State(state)).await.0.is_empty());
    }

    #[tokio::test]
    async fn test_enrolling_same_label_twice_keeps_both_samples() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);

        for descriptor in [vec![0.1f32; 128], vec![0.9f32; 128]] {
            enroll_face(
                State(state.clone()),
                Json(EnrollFaceRequest {
                    label: Some("Me".into()),
                    descriptor: Some(descriptor),
                }),
            )
            .await
            .unwrap();
        }

        let faces = list_faces(State(state)).await;
        assert_eq!(faces.0.len(), 2);
        assert!(faces.0.iter().all(|f| f.label == "Me"));
    }

    #[tokio::test]
    async fn test_event_filters_via_query_params() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);

        let session = create_session(State(state.clone()), None).await.unwrap().0.id;
        for (label, session_id) in [("Alice", Some(session)), ("Alice", None), ("Bob", Some(session))] {
            let body = PostEventRequest {
                face_label: Some(label.into()),
                session_id,
                ..Default::default()
            };
            post_event(State(state.clone()), Some(Json(body))).await.unwrap();
        }

        let filtered = list_events(
            State(state),
            Query(EventListQuery {
                face_label: Some("Alice".into()),
                session_id: Some(session),
            }),
        )
        .await;
        assert_eq!(filtered.0.len(), 1);
    }

    #[tokio::test]
    async fn test_student_history_not_found_then_upserted() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);

        let missing = get_student_history(State(state.clone()), Path("kim@example.edu".into())).await;
        assert_eq!(missing.unwrap_err().0, StatusCode::NOT_FOUND);

        let body = PutHistoryRequest {
            name: Some("Kim".into()),
            history: serde_json::json!({"scores": [88], "study_hours": 12}),
        };
        put_student_history(State(state.clone()), Path("kim@example.edu".into()), Some(Json(body)))
            .await
            .unwrap();

        let record = get_student_history(State(state), Path("kim@example.edu".into()))
            .await
            .unwrap();
        assert_eq!(record.0.name.as_deref(), Some("Kim"));
        assert_eq!(record.0.history["study_hours"], 12);
    }

    #[tokio::test]
    async fn test_admin_clear_wipes_everything() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);

        enroll_face(
            State(state.clone()),
            Json(EnrollFaceRequest {
                label: Some("Me".into()),
                descriptor: Some(vec![0.1; 128]),
            }),
        )
        .await
        .unwrap();
        post_event(State(state.clone()), None).await.unwrap();
        create_session(State(state.clone()), None).await.unwrap();

        admin_clear(State(state.clone())).await.unwrap();

        assert!(list_faces(State(state.clone())).await.0.is_empty());
        assert!(list_events(State(state.clone()), Query(EventListQuery::default())).await.0.is_empty());
        assert!(list_sessions(State(state)).await.0.is_empty());
    }

    #[tokio::test]
    async fn test_router_builds_with_default_config() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir);
        let _router = create_router(state, &crate::config::ApiConfig::default());
    }
}
