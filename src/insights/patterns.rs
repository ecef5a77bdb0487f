//! Calendar-bucketed engagement trends.
//!
//! Buckets are aligned to the calendar unit, not sliding windows:
//! month buckets start on the 1st, week buckets on Monday (UTC).

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;

use super::ActivityRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketUnit {
    Week,
    Month,
}

/// Per-bucket engagement stats for trend display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityBucket {
    /// First calendar day of the bucket.
    pub start: NaiveDate,
    pub total_entries: usize,
    /// Entries referencing at least one goal.
    pub goal_entries: usize,
    /// `goal_entries / total_entries`; 0 for an empty bucket.
    pub engagement_rate: f64,
}

/// Bucket the activity window into `count` calendar periods ending with
/// the bucket containing `now`, oldest first. Records outside the range
/// are ignored.
pub fn bucket_activity(
    records: &[ActivityRecord],
    unit: BucketUnit,
    count: usize,
    now: DateTime<Utc>,
) -> Vec<ActivityBucket> {
    if count == 0 {
        return Vec::new();
    }

    let current_start = match unit {
        BucketUnit::Week => week_start(now.date_naive()),
        BucketUnit::Month => month_start(now.date_naive()),
    };
    let mut starts = Vec::with_capacity(count);
    let mut start = current_start;
    for _ in 0..count {
        starts.push(start);
        start = match unit {
            BucketUnit::Week => start - Duration::days(7),
            BucketUnit::Month => previous_month_start(start),
        };
    }
    starts.reverse();

    let mut buckets: Vec<ActivityBucket> = starts
        .iter()
        .map(|&start| ActivityBucket {
            start,
            total_entries: 0,
            goal_entries: 0,
            engagement_rate: 0.0,
        })
        .collect();

    let range_start = buckets[0].start;
    let range_end = match unit {
        BucketUnit::Week => current_start + Duration::days(7),
        BucketUnit::Month => next_month_start(current_start),
    };
    for record in records {
        let day = record.timestamp.date_naive();
        if day < range_start || day >= range_end {
            continue;
        }
        // Last bucket whose start is not after the record's day.
        if let Some(idx) = buckets.iter().rposition(|b| day >= b.start) {
            buckets[idx].total_entries += 1;
            if !record.goal_ids.is_empty() {
                buckets[idx].goal_entries += 1;
            }
        }
    }

    for bucket in &mut buckets {
        if bucket.total_entries > 0 {
            bucket.engagement_rate = bucket.goal_entries as f64 / bucket.total_entries as f64;
        }
    }
    buckets
}

fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
}

fn month_start(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

fn previous_month_start(day: NaiveDate) -> NaiveDate {
    let (year, month) = if day.month() == 1 {
        (day.year() - 1, 12)
    } else {
        (day.year(), day.month() - 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(day)
}

fn next_month_start(day: NaiveDate) -> NaiveDate {
    let (year, month) = if day.month() == 12 {
        (day.year() + 1, 1)
    } else {
        (day.year(), day.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(day)
}
