//! Due-ness and next-run computation for schedule descriptors.
//!
//! Everything here is pure: callers pass the reference time in.

use {
    chrono::{DateTime, Duration, Utc},
    tracing::debug,
};

use crate::{Error, Result, types::ScheduleType};

/// A parsed `(schedule_type, schedule_value)` pair.
#[derive(Debug, Clone)]
pub enum Schedule {
    Manual,
    /// Minutes between runs.
    Interval(u32),
    Cron(Box<cron::Schedule>),
    Daily,
    Weekly,
}

impl Schedule {
    /// Parse a schedule descriptor.
    ///
    /// `value` is ignored for manual, daily and weekly schedules.
    pub fn parse(schedule_type: ScheduleType, value: Option<&str>) -> Result<Self> {
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        match schedule_type {
            ScheduleType::Manual => Ok(Self::Manual),
            ScheduleType::Daily => Ok(Self::Daily),
            ScheduleType::Weekly => Ok(Self::Weekly),
            ScheduleType::Interval => {
                let raw =
                    value.ok_or_else(|| Error::schedule("interval requires a number of minutes"))?;
                let minutes: u32 = raw
                    .parse()
                    .map_err(|_| Error::schedule(format!("invalid interval minutes: {raw}")))?;
                if minutes == 0 {
                    return Err(Error::schedule("interval minutes must be > 0"));
                }
                Ok(Self::Interval(minutes))
            },
            ScheduleType::Cron => {
                let expr = value.ok_or_else(|| Error::schedule("cron requires an expression"))?;
                parse_cron(expr).map(|s| Self::Cron(Box::new(s)))
            },
        }
    }

    /// First fire time after `reference`, or `None` for manual schedules.
    pub fn next_after(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Manual => None,
            Self::Interval(minutes) => {
                reference.checked_add_signed(Duration::minutes(i64::from(*minutes)))
            },
            Self::Cron(schedule) => schedule.after(&reference).next(),
            Self::Daily => reference.checked_add_signed(Duration::days(1)),
            Self::Weekly => reference.checked_add_signed(Duration::weeks(1)),
        }
    }
}

/// Parse a cron expression.
///
/// The `cron` crate wants 6 or 7 fields (with seconds, optional year). The
/// usual 5-field form (min hour dom month dow) is padded with `0` seconds and
/// a `*` year.
fn parse_cron(expr: &str) -> Result<cron::Schedule> {
    expr.parse::<cron::Schedule>()
        .or_else(|_| format!("0 {expr} *").parse::<cron::Schedule>())
        .map_err(|e| Error::schedule(format!("invalid cron expression '{expr}': {e}")))
}

/// Whether a job with this descriptor and `last_run` should run at `now`.
///
/// Manual schedules are never due. A valid non-manual schedule that never ran
/// is due immediately. A malformed descriptor is never due.
pub fn is_due(
    schedule_type: ScheduleType,
    schedule_value: Option<&str>,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let schedule = match Schedule::parse(schedule_type, schedule_value) {
        Ok(s) => s,
        Err(e) => {
            debug!(%schedule_type, error = %e, "schedule descriptor never due");
            return false;
        },
    };
    if matches!(schedule, Schedule::Manual) {
        return false;
    }
    match last_run {
        None => true,
        Some(last) => schedule.next_after(last).is_some_and(|next| next <= now),
    }
}

/// Next fire time computed from `reference` (the last completion time).
///
/// `None` for manual schedules and malformed descriptors.
pub fn next_run(
    schedule_type: ScheduleType,
    schedule_value: Option<&str>,
    reference: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match Schedule::parse(schedule_type, schedule_value) {
        Ok(schedule) => schedule.next_after(reference),
        Err(e) => {
            debug!(%schedule_type, error = %e, "cannot compute next run");
            None
        },
    }
}
