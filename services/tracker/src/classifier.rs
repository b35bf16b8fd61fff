//! Classification source abstraction.
//!
//! Face/emotion classification is an external capability; the tracker only
//! sees `Observation`s produced behind the `Classifier` trait. The shipped
//! binary drives the loop from a [`ReplayClassifier`] that replays recorded
//! observation captures; live camera/model integrations implement the same
//! trait.

use crate::scoring::Emotion;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::BufRead;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while classifying.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("No face found in the current sample")]
    NoFace,

    #[error("Classification source exhausted")]
    Exhausted,

    #[error("Classifier backend failure: {0}")]
    Backend(String),
}

/// One classification result for a single detected face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Recognized identity label; `None` when the face is unknown
    #[serde(default)]
    pub label: Option<String>,

    /// Emotion label from the fixed classification set
    pub emotion: Emotion,

    /// Classification confidence, 0-100
    pub confidence: f64,

    /// Normalized detection area, used to pick the dominant face
    #[serde(default)]
    pub area: f64,

    /// Feature vector for enrollment; empty when not computed
    #[serde(default)]
    pub descriptor: Vec<f32>,
}

/// A source of classification results.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// One sampling pass: zero or more observations for the current input.
    async fn classify(&self) -> Result<Vec<Observation>, ClassifierError>;

    /// Broader multi-result scan; used as the enrollment fallback when the
    /// single-pass attempts come up empty.
    async fn scan(&self) -> Result<Vec<Observation>, ClassifierError>;
}

/// Replays recorded observation captures.
///
/// The capture format is JSON lines: each line is one frame, an array of
/// observations. Each pass consumes one frame; an empty source reports
/// [`ClassifierError::Exhausted`], which ends the sampling loop cleanly.
#[derive(Debug)]
pub struct ReplayClassifier {
    frames: Mutex<VecDeque<Vec<Observation>>>,
}

impl ReplayClassifier {
    /// Load a capture file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open capture {}: {e}", path.display()))?;

        let mut frames = VecDeque::new();
        for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let frame: Vec<Observation> = serde_json::from_str(&line).map_err(|e| {
                anyhow::anyhow!("Bad capture frame at {}:{}: {e}", path.display(), line_no + 1)
            })?;
            frames.push_back(frame);
        }

        Ok(Self {
            frames: Mutex::new(frames),
        })
    }

    /// Build a replay source from in-memory frames.
    pub fn from_frames(frames: Vec<Vec<Observation>>) -> Self {
        Self {
            frames: Mutex::new(frames.into()),
        }
    }

    /// Frames left to replay.
    pub fn remaining(&self) -> usize {
        self.frames.lock().len()
    }
}

#[async_trait]
impl Classifier for ReplayClassifier {
    async fn classify(&self) -> Result<Vec<Observation>, ClassifierError> {
        self.frames
            .lock()
            .pop_front()
            .ok_or(ClassifierError::Exhausted)
    }

    async fn scan(&self) -> Result<Vec<Observation>, ClassifierError> {
        // The replay capture has no wider view than its recorded frames.
        self.classify().await
    }
}
