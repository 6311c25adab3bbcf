//! Content-moderation results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Categories that never mark a video as sensitive.
const BENIGN_CATEGORIES: &[&str] = &["safe", "neutral", "none"];

/// Scores for one analysed frame, keyed by category name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModerationFrame {
    /// Frame position in seconds, when the provider reports it.
    #[serde(default)]
    pub position: Option<f64>,
    /// Probability per category, in `[0, 1]`.
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
}

/// Outcome of comparing frame scores against a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModerationVerdict {
    pub is_sensitive: bool,
    /// Highest non-benign score across all frames.
    pub max_score: f64,
    /// Category that produced `max_score`.
    pub category: Option<String>,
    pub frames_analyzed: usize,
}

impl ModerationVerdict {
    /// A video is sensitive when any frame scores `>= threshold` in a non-benign category.
    pub fn evaluate(frames: &[ModerationFrame], threshold: f64) -> Self {
        let mut max_score = 0.0;
        let mut category = None;

        for frame in frames {
            for (name, score) in &frame.scores {
                if BENIGN_CATEGORIES.contains(&name.to_lowercase().as_str()) {
                    continue;
                }
                if *score > max_score {
                    max_score = *score;
                    category = Some(name.clone());
                }
            }
        }

        Self {
            is_sensitive: category.is_some() && max_score >= threshold,
            max_score,
            category,
            frames_analyzed: frames.len(),
        }
    }
}
