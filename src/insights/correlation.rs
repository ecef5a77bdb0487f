//! Partition-and-compare correlation between goal-linked and unlinked
//! activity, used for the mood and energy signals.

use serde::Serialize;
use thiserror::Error;

use crate::goal::GoalId;

/// Minimum samples required on each side of the partition.
pub const MIN_SAMPLES: usize = 3;

/// Not an error from the caller's point of view: it means "no insight
/// produced", and the analytics pass moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("need at least 3 samples on each side ({with_goal} with, {without_goal} without)")]
pub struct InsufficientSamples {
    pub with_goal: usize,
    pub without_goal: usize,
}

/// Comparison of a metric between entries that mention a goal and
/// entries that do not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correlation {
    pub goal_id: Option<GoalId>,
    pub samples_with: usize,
    pub samples_without: usize,
    pub mean_with: f64,
    pub mean_without: f64,
    /// Mean difference normalized by the larger mean magnitude,
    /// clamped to [-1, 1]; 0 when both means are 0.
    pub score: f64,
}

impl Correlation {
    pub fn with_goal(mut self, goal_id: GoalId) -> Self {
        self.goal_id = Some(goal_id);
        self
    }
}

/// Compare the metric values of entries that mention a goal against
/// those that do not. Requires [`MIN_SAMPLES`] on each side.
pub fn correlate(
    with_goal: &[f64],
    without_goal: &[f64],
) -> Result<Correlation, InsufficientSamples> {
    if with_goal.len() < MIN_SAMPLES || without_goal.len() < MIN_SAMPLES {
        return Err(InsufficientSamples {
            with_goal: with_goal.len(),
            without_goal: without_goal.len(),
        });
    }

    let mean_with = mean(with_goal);
    let mean_without = mean(without_goal);
    let denom = mean_with.abs().max(mean_without.abs());
    let score = if denom == 0.0 {
        0.0
    } else {
        ((mean_with - mean_without) / denom).clamp(-1.0, 1.0)
    };

    Ok(Correlation {
        goal_id: None,
        samples_with: with_goal.len(),
        samples_without: without_goal.len(),
        mean_with,
        mean_without,
        score,
    })
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
