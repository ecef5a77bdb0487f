//! The goal aggregate: the decrypted in-memory shape of an encrypted row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vault::DataKey;

pub type GoalId = Uuid;

/// Placeholder title for a record whose data key failed to unwrap.
/// Shown instead of garbage; the rest of the list still loads.
pub const DECRYPTION_FAILED_TITLE: &str = "Decryption Failed";

/// Goal lifecycle status. Stored unencrypted: it is workflow state, not
/// sensitive content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Active,
    Paused,
    Completed,
    Archived,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Active => "active",
            GoalStatus::Paused => "paused",
            GoalStatus::Completed => "completed",
            GoalStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "paused" => GoalStatus::Paused,
            "completed" => GoalStatus::Completed,
            "archived" => GoalStatus::Archived,
            _ => GoalStatus::Active,
        }
    }
}

/// Goal priority, 1 (lowest) to 5 (highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    /// Strict constructor for caller-supplied values.
    pub fn new(value: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    /// Lenient constructor for values read back from storage.
    pub fn clamped(value: u8) -> Self {
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

/// One step toward a goal. Toggling `completed` re-encrypts the whole
/// progress payload: milestones are stored as one encrypted blob, not
/// per-milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub label: String,
    pub completed: bool,
}

/// A named tier of milestones inside tiered progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub name: String,
    pub milestones: Vec<Milestone>,
}

/// The progress shape, decided once at deserialization. Serialized as a
/// single tagged JSON payload and encrypted as one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Progress {
    Tiered { tiers: Vec<Tier> },
    List { milestones: Vec<Milestone> },
}

impl Progress {
    /// (completed, total) across all milestones regardless of shape.
    pub fn milestone_counts(&self) -> (usize, usize) {
        match self {
            Progress::Tiered { tiers } => tiers
                .iter()
                .flat_map(|t| t.milestones.iter())
                .fold((0, 0), |(done, total), m| {
                    (done + usize::from(m.completed), total + 1)
                }),
            Progress::List { milestones } => milestones
                .iter()
                .fold((0, 0), |(done, total), m| {
                    (done + usize::from(m.completed), total + 1)
                }),
        }
    }

    /// Fraction of milestones completed; 0 when there are none.
    pub fn completion_rate(&self) -> f64 {
        let (done, total) = self.milestone_counts();
        if total == 0 {
            0.0
        } else {
            done as f64 / total as f64
        }
    }
}

/// Generated tips with the plaintext "last generated" timestamp. The
/// items themselves are stored as one encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tips {
    pub items: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// A decrypted goal record.
///
/// The per-record data key rides along (crate-private) so that later
/// field updates re-encrypt with the same key without touching the
/// vault again. It is `None` exactly when `decryption_failed` is set.
#[derive(Debug, Clone)]
pub struct Goal {
    pub id: GoalId,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub progress: Option<Progress>,
    pub tips: Option<Tips>,
    pub status: GoalStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    /// Set when the record's data key failed to unwrap; `title` then
    /// holds [`DECRYPTION_FAILED_TITLE`] and all other fields are empty.
    pub decryption_failed: bool,
    pub(crate) data_key: Option<DataKey>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_mapping() {
        for status in [
            GoalStatus::Active,
            GoalStatus::Paused,
            GoalStatus::Completed,
            GoalStatus::Archived,
        ] {
            assert_eq!(GoalStatus::parse(status.as_str()), status);
        }
        // Unknown strings fall back to active.
        assert_eq!(GoalStatus::parse("garbage"), GoalStatus::Active);
    }

    #[test]
    fn test_priority_bounds() {
        assert!(Priority::new(0).is_none());
        assert!(Priority::new(6).is_none());
        assert_eq!(Priority::new(3).unwrap().get(), 3);
        assert_eq!(Priority::clamped(0).get(), 1);
        assert_eq!(Priority::clamped(9).get(), 5);
    }

    #[test]
    fn test_progress_payload_is_tagged() {
        let progress = Progress::List {
            milestones: vec![Milestone {
                label: "draft".into(),
                completed: true,
            }],
        };
        let json = serde_json::to_string(&progress).unwrap();
        assert!(json.contains("\"shape\":\"list\""));
        assert_eq!(serde_json::from_str::<Progress>(&json).unwrap(), progress);

        let tiered = Progress::Tiered {
            tiers: vec![Tier {
                name: "phase 1".into(),
                milestones: vec![],
            }],
        };
        let json = serde_json::to_string(&tiered).unwrap();
        assert!(json.contains("\"shape\":\"tiered\""));
        assert_eq!(serde_json::from_str::<Progress>(&json).unwrap(), tiered);
    }

    #[test]
    fn test_completion_rate() {
        let progress = Progress::List {
            milestones: vec![
                Milestone { label: "a".into(), completed: true },
                Milestone { label: "b".into(), completed: true },
                Milestone { label: "c".into(), completed: false },
                Milestone { label: "d".into(), completed: true },
                Milestone { label: "e".into(), completed: true },
            ],
        };
        assert_eq!(progress.milestone_counts(), (4, 5));
        assert!((progress.completion_rate() - 0.8).abs() < 1e-9);

        let empty = Progress::List { milestones: vec![] };
        assert_eq!(empty.completion_rate(), 0.0);
    }

    #[test]
    fn test_tiered_counts_span_tiers() {
        let progress = Progress::Tiered {
            tiers: vec![
                Tier {
                    name: "base".into(),
                    milestones: vec![
                        Milestone { label: "a".into(), completed: true },
                        Milestone { label: "b".into(), completed: false },
                    ],
                },
                Tier {
                    name: "stretch".into(),
                    milestones: vec![Milestone { label: "c".into(), completed: true }],
                },
            ],
        };
        assert_eq!(progress.milestone_counts(), (2, 3));
    }
}
