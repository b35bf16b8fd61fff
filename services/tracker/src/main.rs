//! Engagement tracker for the Aula classroom analytics platform.
//!
//! This binary replays a recorded observation capture through the tracking
//! session, scoring and aggregating classification results locally and
//! shipping counted events to the collector.
//!
//! # Architecture
//!
//! ```text
//! Capture file -> ReplayClassifier -> TrackingSession -> EventShipper -> Collector
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration file (config/tracker.*)
//! 2. Environment variables (prefixed with TRACKER__)
//!
//! See `config.rs` for detailed configuration options.

use anyhow::{Context, Result};
use aula_tracker::classifier::{Classifier, ReplayClassifier};
use aula_tracker::config::TrackerConfig;
use aula_tracker::enrollment;
use aula_tracker::event_shipper::EventShipper;
use aula_tracker::tracking_session::TrackingSession;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = TrackerConfig::load().context("Failed to load configuration")?;

    // Initialize logging
    init_logging(&config.logging)?;

    info!(
        service = "aula-tracker",
        version = env!("CARGO_PKG_VERSION"),
        collector = %config.collector.base_url,
        "Starting engagement tracker"
    );

    // Validate configuration
    config.validate()?;

    let replay_path = config
        .replay
        .path
        .clone()
        .context("replay.path must point to an observation capture file")?;
    let classifier: Arc<dyn Classifier> = Arc::new(
        ReplayClassifier::from_file(&replay_path).with_context(|| {
            format!(
                "Failed to load observation capture from {}",
                replay_path.display()
            )
        })?,
    );

    let shipper = Arc::new(EventShipper::new(
        config.collector.base_url.as_str(),
        config.collector.request_timeout(),
    )?);

    // Explicit enrollment before tracking when a label is configured. This
    // is the one flow that surfaces failure to the user.
    if let Some(label) = &config.enrollment.label {
        match enrollment::enroll(classifier.as_ref(), &shipper, label, &config.enrollment).await {
            Ok(()) => {}
            Err(e) => error!(error = %e, label = %label, "Enrollment failed"),
        }
    }

    // Tag events with a collector session when one is configured. Creation
    // failure degrades to untagged events.
    let session_id = match &config.session.name {
        Some(name) => match shipper.create_session(Some(name)).await {
            Ok(id) => {
                info!(session_id = id, name = %name, "Collector session created");
                Some(id)
            }
            Err(e) => {
                warn!(error = %e, "Failed to create collector session, events will be untagged");
                None
            }
        },
        None => None,
    };

    let session = Arc::new(
        TrackingSession::new(config.sampling.throttle()).with_shipper(shipper, session_id),
    );

    // Spawn the sampling loop
    let mut loop_handle = tokio::spawn({
        let session = session.clone();
        let interval = config.sampling.interval();
        async move {
            session.run(classifier, interval).await;
        }
    });

    // Wait for shutdown signal or loop completion
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
            session.stop();
        }
        _ = &mut loop_handle => {
            info!("Sampling loop completed");
        }
    }

    // Log final statistics
    log_final_stats(&session);

    info!("Shutdown complete");
    Ok(())
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &aula_tracker::config::LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("aula_tracker={}", config.level)));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Log final statistics on shutdown.
fn log_final_stats(session: &TrackingSession) {
    let stats = session.stats();
    info!(
        ticks = stats.ticks,
        samples_seen = stats.samples_seen,
        samples_counted = stats.samples_counted,
        classify_failures = stats.classify_failures,
        "Final loop stats"
    );

    let mut identities: Vec<_> = session.snapshot().into_iter().collect();
    identities.sort_by(|a, b| b.1.score.cmp(&a.1.score));

    for (identity, stats) in identities {
        info!(
            identity = %identity,
            score = stats.score,
            detections = stats.detections,
            last_emotion = %stats.last_emotion,
            last_confidence = stats.last_confidence,
            "Identity final stats"
        );
    }
}
