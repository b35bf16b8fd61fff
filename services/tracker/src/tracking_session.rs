//! Per-session engagement tracking.
//!
//! A `TrackingSession` turns the continuous classification stream into
//! discrete, rate-limited, scored events. It owns the per-identity
//! aggregates for one open tracking session; local state is authoritative
//! for the session even when the collector is unreachable.

use crate::classifier::{Classifier, ClassifierError, Observation};
use crate::event_shipper::{EngagementEvent, EventShipper};
use crate::scoring::{score_delta, Emotion};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Aggregate key for faces the classifier could not identify
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Ticks between periodic stats log lines
const STATS_LOG_INTERVAL_TICKS: u64 = 100;

/// Running aggregate for one identity
#[derive(Debug, Clone)]
pub struct IdentityStats {
    /// Cumulative engagement score
    pub score: i64,
    /// Emotion of the last counted sample
    pub last_emotion: Emotion,
    /// Confidence of the most recent sample, counted or not
    pub last_confidence: f64,
    /// Counted detections
    pub detections: u64,
    /// Counted detections per emotion
    pub histogram: HashMap<Emotion, u64>,
    /// Throttle clock: when this identity was last counted. Duplicate
    /// samples do not refresh it.
    last_counted_at: Instant,
}

/// Outcome of feeding one observation into the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Counted as a distinct detection; carries the score delta
    Counted { delta: i32 },
    /// Throttled duplicate; only last-seen confidence was refreshed
    Duplicate,
}

/// Loop-level statistics
#[derive(Debug, Default, Clone)]
pub struct LoopStats {
    pub ticks: u64,
    pub samples_seen: u64,
    pub samples_counted: u64,
    pub classify_failures: u64,
}

/// One open face-tracking session.
///
/// Aggregates are scoped to the session object rather than process globals,
/// so concurrent sessions (tests, multiple rooms) do not interfere.
pub struct TrackingSession {
    throttle: Duration,
    session_id: Option<i64>,
    shipper: Option<Arc<EventShipper>>,
    identities: RwLock<HashMap<String, IdentityStats>>,
    stats: RwLock<LoopStats>,
    running: AtomicBool,
}

impl TrackingSession {
    /// Create a session with the given throttle window and no shipping.
    pub fn new(throttle: Duration) -> Self {
        Self {
            throttle,
            session_id: None,
            shipper: None,
            identities: RwLock::new(HashMap::new()),
            stats: RwLock::new(LoopStats::default()),
            running: AtomicBool::new(false),
        }
    }

    /// Attach a shipper; counted samples are forwarded to the collector,
    /// tagged with `session_id` when present.
    pub fn with_shipper(mut self, shipper: Arc<EventShipper>, session_id: Option<i64>) -> Self {
        self.shipper = Some(shipper);
        self.session_id = session_id;
        self
    }

    /// Feed one observation into the aggregates.
    ///
    /// A sample is counted iff the emotion changed since this identity's
    /// last counted update OR the throttle window has elapsed since it;
    /// first sightings always count. Duplicates refresh the last-seen
    /// confidence only.
    pub fn observe(&self, observation: &Observation) -> SampleOutcome {
        self.observe_at(observation, Instant::now())
    }

    fn observe_at(&self, observation: &Observation, now: Instant) -> SampleOutcome {
        let key = observation
            .label
            .clone()
            .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string());

        let mut identities = self.identities.write();
        match identities.get_mut(&key) {
            Some(stats) => {
                let emotion_changed = stats.last_emotion != observation.emotion;
                let elapsed = now.saturating_duration_since(stats.last_counted_at);

                if emotion_changed || elapsed >= self.throttle {
                    let delta = score_delta(observation.emotion, observation.confidence);
                    stats.score += i64::from(delta);
                    stats.last_emotion = observation.emotion;
                    stats.last_confidence = observation.confidence;
                    stats.detections += 1;
                    *stats.histogram.entry(observation.emotion).or_insert(0) += 1;
                    stats.last_counted_at = now;
                    SampleOutcome::Counted { delta }
                } else {
                    stats.last_confidence = observation.confidence;
                    SampleOutcome::Duplicate
                }
            }
            None => {
                let delta = score_delta(observation.emotion, observation.confidence);
                let mut histogram = HashMap::new();
                histogram.insert(observation.emotion, 1);
                identities.insert(
                    key,
                    IdentityStats {
                        score: i64::from(delta),
                        last_emotion: observation.emotion,
                        last_confidence: observation.confidence,
                        detections: 1,
                        histogram,
                        last_counted_at: now,
                    },
                );
                SampleOutcome::Counted { delta }
            }
        }
    }

    /// Forward one counted sample to the collector, fire-and-forget.
    fn ship_counted(&self, observation: &Observation, delta: i32) {
        let Some(shipper) = &self.shipper else {
            return;
        };

        let event = EngagementEvent {
            face_label: Some(
                observation
                    .label
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string()),
            ),
            emotion: Some(observation.emotion.as_str().to_string()),
            confidence: observation.confidence,
            delta,
            session_id: self.session_id,
            timestamp: Utc::now(),
        };

        shipper.ship_detached(event);
    }

    /// Run the sampling loop until stopped or the source is exhausted.
    ///
    /// Ticks fire on a fixed timer and are not back-pressured by in-flight
    /// shipping; classification failures skip the tick and never stop the
    /// loop.
    pub async fn run(&self, classifier: Arc<dyn Classifier>, interval: Duration) {
        self.running.store(true, Ordering::SeqCst);

        info!(
            interval_ms = interval.as_millis() as u64,
            throttle_ms = self.throttle.as_millis() as u64,
            session_id = ?self.session_id,
            "Tracking session started"
        );

        let mut ticker = tokio::time::interval(interval);

        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;

            let ticks = {
                let mut stats = self.stats.write();
                stats.ticks += 1;
                stats.ticks
            };

            match classifier.classify().await {
                Ok(observations) => {
                    for observation in &observations {
                        self.stats.write().samples_seen += 1;
                        if let SampleOutcome::Counted { delta } = self.observe(observation) {
                            self.stats.write().samples_counted += 1;
                            self.ship_counted(observation, delta);
                        }
                    }
                }
                Err(ClassifierError::Exhausted) => {
                    info!("Classification source exhausted, stopping tracking session");
                    break;
                }
                Err(e) => {
                    self.stats.write().classify_failures += 1;
                    debug!(error = %e, "Classification failed, skipping tick");
                }
            }

            if ticks % STATS_LOG_INTERVAL_TICKS == 0 {
                self.log_stats();
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Tracking session stopped");
    }

    /// Signal the sampling loop to stop. Already-dispatched shipping tasks
    /// complete or fail on their own.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the sampling loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the per-identity aggregates.
    pub fn snapshot(&self) -> HashMap<String, IdentityStats> {
        self.identities.read().clone()
    }

    /// Current loop statistics.
    pub fn stats(&self) -> LoopStats {
        self.stats.read().clone()
    }

    fn log_stats(&self) {
        let stats = self.stats.read().clone();
        info!(
            ticks = stats.ticks,
            samples_seen = stats.samples_seen,
            samples_counted = stats.samples_counted,
            classify_failures = stats.classify_failures,
            identities = self.identities.read().len(),
            "Tracking session stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ReplayClassifier;

    const THROTTLE: Duration = Duration::from_millis(800);

    fn obs(label: &str, emotion: Emotion, confidence: f64) -> Observation {
        Observation {
            label: Some(label.to_string()),
            emotion,
            confidence,
            area: 0.25,
            descriptor: Vec::new(),
        }
    }

    #[test]
    fn test_first_sighting_counts() {
        let session = TrackingSession::new(THROTTLE);
        let outcome = session.observe(&obs("alice", Emotion::Happy, 100.0));
        assert_eq!(outcome, SampleOutcome::Counted { delta: 2 });

        let snapshot = session.snapshot();
        assert_eq!(snapshot["alice"].detections, 1);
        assert_eq!(snapshot["alice"].histogram[&Emotion::Happy], 1);
    }

    #[test]
    fn test_same_emotion_within_window_is_duplicate() {
        let session = TrackingSession::new(THROTTLE);
        let t0 = Instant::now();

        session.observe_at(&obs("alice", Emotion::Happy, 90.0), t0);
        let outcome =
            session.observe_at(&obs("alice", Emotion::Happy, 70.0), t0 + Duration::from_millis(300));
        assert_eq!(outcome, SampleOutcome::Duplicate);

        let snapshot = session.snapshot();
        // Histogram grew by one across both samples, not two.
        assert_eq!(snapshot["alice"].histogram[&Emotion::Happy], 1);
        assert_eq!(snapshot["alice"].detections, 1);
        // The duplicate still refreshed the last-seen confidence.
        assert_eq!(snapshot["alice"].last_confidence, 70.0);
    }

    #[test]
    fn test_emotion_change_counts_regardless_of_elapsed_time() {
        let session = TrackingSession::new(THROTTLE);
        let t0 = Instant::now();

        session.observe_at(&obs("alice", Emotion::Happy, 90.0), t0);
        let outcome =
            session.observe_at(&obs("alice", Emotion::Sad, 90.0), t0 + Duration::from_millis(100));
        assert!(matches!(outcome, SampleOutcome::Counted { .. }));

        let snapshot = session.snapshot();
        assert_eq!(snapshot["alice"].histogram[&Emotion::Happy], 1);
        assert_eq!(snapshot["alice"].histogram[&Emotion::Sad], 1);
        assert_eq!(snapshot["alice"].detections, 2);
    }

    #[test]
    fn test_same_emotion_counts_again_after_window() {
        let session = TrackingSession::new(THROTTLE);
        let t0 = Instant::now();

        session.observe_at(&obs("alice", Emotion::Happy, 90.0), t0);
        let outcome =
            session.observe_at(&obs("alice", Emotion::Happy, 90.0), t0 + Duration::from_millis(900));
        assert!(matches!(outcome, SampleOutcome::Counted { .. }));
        assert_eq!(session.snapshot()["alice"].histogram[&Emotion::Happy], 2);
    }

    #[test]
    fn test_duplicates_do_not_refresh_throttle_clock() {
        let session = TrackingSession::new(THROTTLE);
        let t0 = Instant::now();

        session.observe_at(&obs("alice", Emotion::Happy, 90.0), t0);
        // A steady stream of duplicates inside the window...
        session.observe_at(&obs("alice", Emotion::Happy, 90.0), t0 + Duration::from_millis(300));
        session.observe_at(&obs("alice", Emotion::Happy, 90.0), t0 + Duration::from_millis(600));
        // ...must not push the next countable sample past the window.
        let outcome =
            session.observe_at(&obs("alice", Emotion::Happy, 90.0), t0 + Duration::from_millis(850));
        assert!(matches!(outcome, SampleOutcome::Counted { .. }));
    }

    #[test]
    fn test_score_accumulates_only_on_counted_samples() {
        let session = TrackingSession::new(THROTTLE);
        let t0 = Instant::now();

        session.observe_at(&obs("alice", Emotion::Happy, 100.0), t0); // +2
        session.observe_at(&obs("alice", Emotion::Happy, 100.0), t0 + Duration::from_millis(100)); // duplicate
        session.observe_at(&obs("alice", Emotion::Angry, 50.0), t0 + Duration::from_millis(200)); // -2

        assert_eq!(session.snapshot()["alice"].score, 0);
    }

    #[test]
    fn test_identities_are_tracked_independently() {
        let session = TrackingSession::new(THROTTLE);
        let t0 = Instant::now();

        session.observe_at(&obs("alice", Emotion::Happy, 90.0), t0);
        let outcome =
            session.observe_at(&obs("bob", Emotion::Happy, 90.0), t0 + Duration::from_millis(10));
        assert!(matches!(outcome, SampleOutcome::Counted { .. }));
        assert_eq!(session.snapshot().len(), 2);
    }

    #[test]
    fn test_unlabeled_faces_aggregate_under_unknown() {
        let session = TrackingSession::new(THROTTLE);

        let unlabeled = Observation {
            label: None,
            emotion: Emotion::Neutral,
            confidence: 60.0,
            area: 0.1,
            descriptor: Vec::new(),
        };
        session.observe(&unlabeled);

        assert!(session.snapshot().contains_key(UNKNOWN_IDENTITY));
    }

    #[tokio::test]
    async fn test_run_consumes_replay_and_stops_on_exhaustion() {
        let session = TrackingSession::new(THROTTLE);
        let classifier: Arc<dyn Classifier> = Arc::new(ReplayClassifier::from_frames(vec![
            vec![obs("alice", Emotion::Happy, 90.0)],
            vec![obs("alice", Emotion::Sad, 80.0), obs("bob", Emotion::Dull, 50.0)],
        ]));

        session.run(classifier, Duration::from_millis(1)).await;

        assert!(!session.is_running());
        let stats = session.stats();
        assert_eq!(stats.samples_seen, 3);
        assert_eq!(stats.samples_counted, 3);
        assert_eq!(session.snapshot().len(), 2);
    }
}
