//! Explicit face enrollment.
//!
//! Enrollment associates a classification descriptor with a human-chosen
//! label. Unlike the background sampling loop it is user-triggered and is
//! the only flow allowed to surface a failure to the user. Attempts are
//! bounded so enrollment can never permanently stall the sampling loop it
//! shares the classifier with.

use crate::classifier::{Classifier, ClassifierError, Observation};
use crate::config::EnrollmentConfig;
use crate::event_shipper::{EventShipper, ShipperError};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use thiserror::Error;
use tracing::{info, warn};

/// Errors surfaced to the user by enrollment
#[derive(Debug, Error)]
pub enum EnrollError {
    #[error("No usable face found after {attempts} attempts")]
    NoUsableFace { attempts: u32 },

    #[error("Classification failed: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Failed to upload enrollment: {0}")]
    Upload(#[from] ShipperError),
}

/// Capture a descriptor for enrollment.
///
/// Runs up to `max_attempts` single passes with short exponential backoff
/// between them, then falls back to one broader multi-result scan and picks
/// the largest-area observation carrying a descriptor. Only when that also
/// comes up empty does the caller see an error.
pub async fn capture_descriptor(
    classifier: &dyn Classifier,
    config: &EnrollmentConfig,
) -> Result<Observation, EnrollError> {
    let mut backoff = ExponentialBackoff {
        initial_interval: config.retry_base_delay(),
        max_interval: config.retry_max_delay(),
        max_elapsed_time: None,
        ..Default::default()
    };

    for attempt in 1..=config.max_attempts {
        match classifier.classify().await {
            Ok(observations) => {
                if let Some(observation) = best_observation(observations) {
                    return Ok(observation);
                }
                warn!(attempt, "No usable face in sample, retrying");
            }
            Err(ClassifierError::Exhausted) => break,
            Err(e) => {
                warn!(attempt, error = %e, "Classification attempt failed");
            }
        }

        if attempt < config.max_attempts {
            if let Some(delay) = backoff.next_backoff() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    // Bounded retries are spent; try one broader scan before giving up.
    match classifier.scan().await {
        Ok(observations) => {
            if let Some(observation) = best_observation(observations) {
                return Ok(observation);
            }
        }
        Err(e) => {
            warn!(error = %e, "Fallback scan failed");
        }
    }

    Err(EnrollError::NoUsableFace {
        attempts: config.max_attempts,
    })
}

/// Capture a descriptor and upload it under the given label.
pub async fn enroll(
    classifier: &dyn Classifier,
    shipper: &EventShipper,
    label: &str,
    config: &EnrollmentConfig,
) -> Result<(), EnrollError> {
    let observation = capture_descriptor(classifier, config).await?;
    shipper.enroll_face(label, &observation.descriptor).await?;

    info!(label = label, "Face enrolled");
    Ok(())
}

/// Largest-area observation that carries a descriptor.
fn best_observation(observations: Vec<Observation>) -> Option<Observation> {
    observations
        .into_iter()
        .filter(|o| !o.descriptor.is_empty())
        .max_by(|a, b| {
            a.area
                .partial_cmp(&b.area)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}
