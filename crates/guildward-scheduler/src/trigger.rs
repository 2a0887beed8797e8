//! Schedule compiler — turns a task definition into a recurring trigger.
//!
//! A compiled trigger is the six-field form "SEC MIN HOUR DOM MON DOW"
//! with seconds fixed at 0 and day-of-month/month wildcarded. All times
//! are UTC regardless of host timezone.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use guildward_core::error::{GuildwardError, Result};
use guildward_core::types::{RecurringTask, Weekday};

/// A compiled recurring trigger. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerSpec {
    minute: u8,
    hour: u8,
    weekday: Weekday,
}

/// Compile a task definition into a trigger.
///
/// Pure and deterministic. Fails only when the definition's fields are not
/// representable; the caller omits that single task from the generation
/// rather than aborting the whole reconciliation.
pub fn compile(task: &RecurringTask) -> Result<TriggerSpec> {
    if task.hour > 23 {
        return Err(GuildwardError::Schedule(format!(
            "hour {} out of range for task {}",
            task.hour, task.id
        )));
    }
    if task.minute > 59 {
        return Err(GuildwardError::Schedule(format!(
            "minute {} out of range for task {}",
            task.minute, task.id
        )));
    }
    Ok(TriggerSpec {
        minute: task.minute,
        hour: task.hour,
        weekday: task.weekday,
    })
}

impl TriggerSpec {
    /// Render as a six-field cron expression, e.g. "0 0 9 * * MON".
    pub fn cron_expression(&self) -> String {
        format!(
            "0 {} {} * * {}",
            self.minute,
            self.hour,
            self.weekday.as_symbol()
        )
    }

    /// Compute the first fire instant strictly after `after`, in UTC.
    ///
    /// Minute-stepping scan bounded at 8 days — enough to cover any
    /// day-of-week plus a wrap.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = after + Duration::minutes(1);
        candidate = candidate.with_second(0).unwrap_or(candidate);
        candidate = candidate.with_nanosecond(0).unwrap_or(candidate);

        for _ in 0..(8 * 24 * 60) {
            if candidate.minute() == u32::from(self.minute)
                && candidate.hour() == u32::from(self.hour)
                && self.matches_weekday(candidate)
            {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }

    fn matches_weekday(&self, at: DateTime<Utc>) -> bool {
        match self.weekday.number_from_sunday() {
            Some(n) => at.weekday().num_days_from_sunday() == n,
            None => true,
        }
    }
}
