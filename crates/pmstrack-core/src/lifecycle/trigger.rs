//! Cron-like triggers for the sweeps.

use chrono::{DateTime, Datelike, Days, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::SweepKind;
use crate::error::Result;
use crate::storage::SweepConfig;

/// When a sweep fires, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "every", rename_all = "snake_case")]
pub enum Trigger {
    Daily { at: NaiveTime },
    Weekly { weekday: Weekday, at: NaiveTime },
}

impl Trigger {
    /// First firing strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        match *self {
            Trigger::Daily { at } => {
                let candidate = today.and_time(at).and_utc();
                if candidate > now {
                    candidate
                } else {
                    candidate + chrono::Duration::days(1)
                }
            }
            Trigger::Weekly { weekday, at } => {
                let ahead = (7 + weekday.num_days_from_monday()
                    - today.weekday().num_days_from_monday())
                    % 7;
                let day = today
                    .checked_add_days(Days::new(u64::from(ahead)))
                    .unwrap_or(today);
                let candidate = day.and_time(at).and_utc();
                if candidate > now {
                    candidate
                } else {
                    candidate + chrono::Duration::days(7)
                }
            }
        }
    }
}

/// A sweep bound to its trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledSweep {
    pub kind: SweepKind,
    pub trigger: Trigger,
}

/// The three sweeps with the triggers from `[sweep]`.
///
/// # Errors
/// `ConfigError::InvalidValue` for a malformed time or weekday.
pub fn sweep_plan(config: &SweepConfig) -> Result<Vec<ScheduledSweep>> {
    Ok(vec![
        ScheduledSweep {
            kind: SweepKind::DueSoon,
            trigger: Trigger::Daily {
                at: config.due_soon_time()?,
            },
        },
        ScheduledSweep {
            kind: SweepKind::Expiry,
            trigger: Trigger::Daily {
                at: config.expiry_time()?,
            },
        },
        ScheduledSweep {
            kind: SweepKind::WeeklyReport,
            trigger: Trigger::Weekly {
                weekday: config.weekly_report_weekday()?,
                at: config.weekly_report_time()?,
            },
        },
    ])
}
