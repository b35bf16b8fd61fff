//! Emotion labels and engagement score deltas.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of emotion classification outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Neutral,
    Surprised,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Dull,
}

impl Emotion {
    /// Signed point value per emotion; scaled by confidence to produce a
    /// score delta.
    pub fn point_value(self) -> i32 {
        match self {
            Emotion::Happy => 2,
            Emotion::Neutral => 1,
            Emotion::Surprised => 1,
            Emotion::Sad => -2,
            Emotion::Angry => -3,
            Emotion::Fearful => -1,
            Emotion::Disgusted => -2,
            Emotion::Dull => 0,
        }
    }

    /// Wire form of the label.
    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Neutral => "neutral",
            Emotion::Surprised => "surprised",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Fearful => "fearful",
            Emotion::Disgusted => "disgusted",
            Emotion::Dull => "dull",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score contribution of one classification sample.
///
/// `delta = round(point_value * confidence / 100)`, where rounding is
/// half-away-from-zero (`f64::round`). This is the single place the rounding
/// rule is defined; everything downstream inherits it.
pub fn score_delta(emotion: Emotion, confidence: f64) -> i32 {
    let scaled = emotion.point_value() as f64 * confidence / 100.0;
    scaled.round() as i32
}
