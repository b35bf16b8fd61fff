//! HTTP shipping of engagement events to the collector.
//!
//! Event delivery is best-effort and at most once: counted samples are
//! shipped from a detached task, transport failures are logged and dropped,
//! and nothing is retried. Enrollment and session creation are the explicit
//! calls that do surface errors to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while talking to the collector
#[derive(Debug, Error)]
pub enum ShipperError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Collector rejected request with status {status}")]
    Rejected { status: reqwest::StatusCode },

    #[error("Unexpected response body: {0}")]
    InvalidResponse(String),
}

/// Wire form of one engagement event
#[derive(Debug, Clone, Serialize)]
pub struct EngagementEvent {
    pub face_label: Option<String>,
    pub emotion: Option<String>,
    pub confidence: f64,
    pub delta: i32,
    pub session_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct EnrollRequest<'a> {
    label: &'a str,
    descriptor: &'a [f32],
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    name: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    #[allow(dead_code)]
    ok: bool,
    id: i64,
}

/// HTTP client for the collector's ingestion API
pub struct EventShipper {
    client: reqwest::Client,
    base_url: String,
}

impl EventShipper {
    /// Create a shipper for the given collector base URL.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ShipperError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ShipperError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Collector base URL this shipper talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST one event and wait for the outcome.
    pub async fn post_event(&self, event: &EngagementEvent) -> Result<(), ShipperError> {
        let endpoint = format!("{}/events", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(event)
            .send()
            .await
            .map_err(|e| ShipperError::Transport {
                endpoint: endpoint.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(ShipperError::Rejected {
                status: response.status(),
            });
        }

        Ok(())
    }

    /// Ship an event without waiting on the outcome.
    ///
    /// The spawned task owns the request; failures are logged at debug and
    /// dropped so the sampling loop is never blocked or interrupted by
    /// telemetry delivery. Tasks already dispatched when the loop stops are
    /// left to complete or fail on their own.
    pub fn ship_detached(self: &Arc<Self>, event: EngagementEvent) {
        let shipper = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = shipper.post_event(&event).await {
                debug!(error = %e, "Event shipping failed, dropping event");
            }
        });
    }

    /// Enroll a face sample under a label. Unlike event shipping this
    /// surfaces failures: enrollment is an explicit user action.
    pub async fn enroll_face(&self, label: &str, descriptor: &[f32]) -> Result<(), ShipperError> {
        let endpoint = format!("{}/faces", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(&EnrollRequest { label, descriptor })
            .send()
            .await
            .map_err(|e| ShipperError::Transport {
                endpoint: endpoint.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(ShipperError::Rejected {
                status: response.status(),
            });
        }

        Ok(())
    }

    /// Create a session tag on the collector; returns its id.
    pub async fn create_session(&self, name: Option<&str>) -> Result<i64, ShipperError> {
        let endpoint = format!("{}/sessions", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(&CreateSessionRequest { name })
            .send()
            .await
            .map_err(|e| ShipperError::Transport {
                endpoint: endpoint.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(ShipperError::Rejected {
                status: response.status(),
            });
        }

        let body: CreateSessionResponse = response
            .json()
            .await
            .map_err(|e| ShipperError::InvalidResponse(e.to_string()))?;

        Ok(body.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_event() -> EngagementEvent {
        EngagementEvent {
            face_label: Some("Alice".into()),
            emotion: Some("happy".into()),
            confidence: 92.0,
            delta: 2,
            session_id: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_base_url_is_normalized() {
        let shipper =
            EventShipper::new("http://localhost:4000/", Duration::from_secs(1)).unwrap();
        assert_eq!(shipper.base_url(), "http://localhost:4000");
    }

    #[tokio::test]
    async fn test_post_event_reports_transport_failure() {
        // Port 9 is discard; nothing is listening there in the test
        // environment, so the request fails fast.
        let shipper =
            EventShipper::new("http://127.0.0.1:9", Duration::from_millis(250)).unwrap();

        let result = shipper.post_event(&test_event()).await;
        assert!(matches!(result, Err(ShipperError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_ship_detached_swallows_failures() {
        let shipper = Arc::new(
            EventShipper::new("http://127.0.0.1:9", Duration::from_millis(250)).unwrap(),
        );

        // Must not panic or surface anything; the task logs and drops.
        shipper.ship_detached(test_event());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(test_event()).unwrap();
        assert_eq!(json["face_label"], "Alice");
        assert_eq!(json["emotion"], "happy");
        assert_eq!(json["delta"], 2);
        assert!(json["session_id"].is_null());
        assert!(json["timestamp"].is_string());
    }
}
