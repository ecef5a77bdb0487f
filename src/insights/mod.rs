//! Insight derivation over decrypted goals and journal activity.
//!
//! Pure and stateless: everything needed is passed in already
//! decrypted, including `now`, so a pass can be re-run at any time with
//! no side effects. Insights are ephemeral; they are recomputed on each
//! pass and never persisted.

pub mod correlation;
pub mod patterns;

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::AnalysisError;
use crate::goal::{Goal, GoalId, GoalStatus, Progress};

pub use patterns::{bucket_activity, ActivityBucket, BucketUnit};

/// One journal entry from the activity collaborator, read-only input.
#[derive(Debug, Clone)]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    /// Goals this entry references; an entry may reference several.
    pub goal_ids: HashSet<GoalId>,
    pub mood: Option<f64>,
    pub energy: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    PlateauWarning,
    MoodCorrelation,
    EnergyCorrelation,
    NearCompletion,
    EngagementSuggestion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightPriority {
    High,
    Medium,
    Low,
}

/// A derived behavioral signal. Recomputed each pass, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub goal_id: Option<GoalId>,
    pub priority: InsightPriority,
    pub message: String,
    pub generated_at: DateTime<Utc>,
}

/// A goal the pass could not analyze, with the reason. Surfaced so
/// skipped analyses are observable rather than only logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedGoal {
    pub goal_id: GoalId,
    pub reason: AnalysisError,
}

/// Result of one analytics pass.
#[derive(Debug, Clone, Default)]
pub struct InsightRun {
    pub insights: Vec<Insight>,
    pub skipped: Vec<SkippedGoal>,
}

const PLATEAU_LOOKBACK_DAYS: i64 = 30;
const PLATEAU_QUIET_DAYS: i64 = 14;
const MOOD_IMPROVEMENT_PCT: f64 = 10.0;
const ENERGY_DELTA: f64 = 1.0;
const NEAR_COMPLETION_MIN: f64 = 0.8;
const FALLBACK_MIN_ENTRIES: usize = 10;

/// Run the full analytics pass over the user's goals and activity
/// window. A goal that cannot be analyzed is skipped and recorded;
/// the remaining goals and the global fallback check still run.
pub fn compute(goals: &[Goal], activity: &[ActivityRecord], now: DateTime<Utc>) -> InsightRun {
    let mut run = InsightRun::default();

    for goal in goals.iter().filter(|g| g.status == GoalStatus::Active) {
        match analyze_goal(goal, activity, now) {
            Ok(mut insights) => run.insights.append(&mut insights),
            Err(reason) => {
                tracing::debug!(goal_id = %goal.id, "goal skipped in analytics pass: {reason}");
                run.skipped.push(SkippedGoal {
                    goal_id: goal.id,
                    reason,
                });
            }
        }
    }

    if activity.len() >= FALLBACK_MIN_ENTRIES {
        let any_linked = activity
            .iter()
            .any(|record| goals.iter().any(|goal| record.goal_ids.contains(&goal.id)));
        if !any_linked {
            run.insights.push(Insight {
                kind: InsightKind::EngagementSuggestion,
                goal_id: None,
                priority: InsightPriority::Medium,
                message: "You journal regularly, but none of your recent entries mention a goal. \
                          Linking entries to goals unlocks trend and mood insights."
                    .to_string(),
                generated_at: now,
            });
        }
    }

    run
}

fn analyze_goal(
    goal: &Goal,
    activity: &[ActivityRecord],
    now: DateTime<Utc>,
) -> Result<Vec<Insight>, AnalysisError> {
    if goal.decryption_failed {
        return Err(AnalysisError::UndecryptedRecord);
    }

    let mut insights = Vec::new();
    if let Some(insight) = plateau_warning(goal, activity, now) {
        insights.push(insight);
    }
    if let Some(insight) = mood_correlation(goal, activity, now) {
        insights.push(insight);
    }
    if let Some(insight) = energy_correlation(goal, activity, now) {
        insights.push(insight);
    }
    if let Some(insight) = near_completion(goal, now) {
        insights.push(insight);
    }
    Ok(insights)
}

/// Active in the last 30 days but quiet for the last 14. Both cutoffs
/// are inclusive: a mention exactly 14 days old still counts as recent.
fn plateau_warning(
    goal: &Goal,
    activity: &[ActivityRecord],
    now: DateTime<Utc>,
) -> Option<Insight> {
    let lookback = now - Duration::days(PLATEAU_LOOKBACK_DAYS);
    let quiet = now - Duration::days(PLATEAU_QUIET_DAYS);

    let mut mentioned_in_lookback = false;
    for record in activity.iter().filter(|r| r.goal_ids.contains(&goal.id)) {
        if record.timestamp >= quiet {
            return None;
        }
        if record.timestamp >= lookback {
            mentioned_in_lookback = true;
        }
    }
    if !mentioned_in_lookback {
        return None;
    }

    Some(Insight {
        kind: InsightKind::PlateauWarning,
        goal_id: Some(goal.id),
        priority: InsightPriority::Medium,
        message: format!(
            "'{}' was active this month but has not come up in two weeks. Worth a check-in?",
            goal.title
        ),
        generated_at: now,
    })
}

fn mood_correlation(
    goal: &Goal,
    activity: &[ActivityRecord],
    now: DateTime<Utc>,
) -> Option<Insight> {
    let (with_goal, without_goal) = partition_metric(goal.id, activity, |r| r.mood);
    let corr = correlation::correlate(&with_goal, &without_goal)
        .ok()?
        .with_goal(goal.id);
    if corr.mean_without <= 0.0 {
        return None;
    }

    let improvement = (corr.mean_with - corr.mean_without) / corr.mean_without * 100.0;
    if improvement <= MOOD_IMPROVEMENT_PCT {
        return None;
    }

    Some(Insight {
        kind: InsightKind::MoodCorrelation,
        goal_id: Some(goal.id),
        priority: InsightPriority::High,
        message: format!(
            "Entries that mention '{}' average {}% higher mood.",
            goal.title,
            improvement.round() as i64
        ),
        generated_at: now,
    })
}

fn energy_correlation(
    goal: &Goal,
    activity: &[ActivityRecord],
    now: DateTime<Utc>,
) -> Option<Insight> {
    let (with_goal, without_goal) = partition_metric(goal.id, activity, |r| r.energy);
    let corr = correlation::correlate(&with_goal, &without_goal).ok()?;
    let delta = corr.mean_with - corr.mean_without;

    let message = if delta > ENERGY_DELTA {
        format!(
            "Working on '{}' seems to energize you: entries that mention it average {:.1} points higher energy.",
            goal.title, delta
        )
    } else if delta < -ENERGY_DELTA {
        format!(
            "Working on '{}' may be draining you: entries that mention it average {:.1} points lower energy.",
            goal.title,
            delta.abs()
        )
    } else {
        return None;
    };

    Some(Insight {
        kind: InsightKind::EnergyCorrelation,
        goal_id: Some(goal.id),
        priority: InsightPriority::Medium,
        message,
        generated_at: now,
    })
}

/// Flat milestone lists only; a tiered plan has no single "almost done"
/// reading.
fn near_completion(goal: &Goal, now: DateTime<Utc>) -> Option<Insight> {
    let Some(Progress::List { milestones }) = &goal.progress else {
        return None;
    };
    let total = milestones.len();
    if total == 0 {
        return None;
    }
    let done = milestones.iter().filter(|m| m.completed).count();
    let rate = done as f64 / total as f64;
    if !(NEAR_COMPLETION_MIN..1.0).contains(&rate) {
        return None;
    }

    let remaining = total - done;
    let noun = if remaining == 1 { "milestone" } else { "milestones" };
    Some(Insight {
        kind: InsightKind::NearCompletion,
        goal_id: Some(goal.id),
        priority: InsightPriority::High,
        message: format!("'{}' has {remaining} {noun} left to finish.", goal.title),
        generated_at: now,
    })
}

/// Split a metric's values by whether the entry references the goal.
/// An entry can land on the "with" side for one goal and the "without"
/// side for another.
fn partition_metric(
    goal_id: GoalId,
    activity: &[ActivityRecord],
    metric: impl Fn(&ActivityRecord) -> Option<f64>,
) -> (Vec<f64>, Vec<f64>) {
    let mut with_goal = Vec::new();
    let mut without_goal = Vec::new();
    for record in activity {
        let Some(value) = metric(record) else {
            continue;
        };
        if record.goal_ids.contains(&goal_id) {
            with_goal.push(value);
        } else {
            without_goal.push(value);
        }
    }
    (with_goal, without_goal)
}
