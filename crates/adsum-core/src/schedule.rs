//! Schedule resolution: which attendance windows apply on a given date.
//!
//! Resolution order is an explicit fallback chain, not scattered
//! conditionals: a per-day-of-week row if one exists, otherwise the global
//! settings with "workday iff Monday–Friday". Holiday status is resolved
//! separately and suppresses attendance regardless of the day's schedule.

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use std::sync::Arc;

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("schedule source: {0}")]
    Source(#[source] SourceError),
}

/// Attendance windows for one day of the week. `day_of_week` is 0=Monday
/// through 6=Sunday; exactly one row may exist per day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub day_of_week: u8,
    pub is_workday: bool,
    pub check_in_start: NaiveTime,
    pub check_in_end: NaiveTime,
    pub check_out_start: NaiveTime,
}

/// Global fallback windows and attendance policy knobs. One row, seeded
/// with defaults on first open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkSettings {
    pub check_in_start: NaiveTime,
    pub check_in_end: NaiveTime,
    pub check_out_start: NaiveTime,
    /// Grace period after `check_in_end` before a check-in counts as late.
    pub late_threshold_minutes: u32,
    /// Minimum minutes between check-in and check-out.
    pub checkout_dwell_minutes: u32,
    /// Minimum similarity for a face match, in [0, 1].
    pub similarity_threshold: f32,
}

impl Default for WorkSettings {
    fn default() -> Self {
        Self {
            check_in_start: NaiveTime::from_hms_opt(7, 0, 0).expect("valid time"),
            check_in_end: NaiveTime::from_hms_opt(8, 0, 0).expect("valid time"),
            check_out_start: NaiveTime::from_hms_opt(16, 0, 0).expect("valid time"),
            late_threshold_minutes: 15,
            checkout_dwell_minutes: 3,
            similarity_threshold: 0.40,
        }
    }
}

/// The windows in force for one calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveSchedule {
    pub date: NaiveDate,
    pub is_workday: bool,
    pub is_holiday: bool,
    pub check_in_start: NaiveTime,
    pub check_in_end: NaiveTime,
    pub check_out_start: NaiveTime,
}

impl EffectiveSchedule {
    /// Attendance runs only on workdays that are not holidays.
    pub fn attendance_applies(&self) -> bool {
        self.is_workday && !self.is_holiday
    }
}

/// 0=Monday … 6=Sunday, matching the `daily_schedules` rows.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_monday() as u8
}

/// Pure window resolution for `date`: the per-day row when present,
/// otherwise the fallback with weekday-derived workday status. Holiday
/// status is supplied by the caller.
pub fn resolve_windows(
    date: NaiveDate,
    day: Option<&DaySchedule>,
    fallback: &WorkSettings,
    is_holiday: bool,
) -> EffectiveSchedule {
    match day {
        Some(d) => EffectiveSchedule {
            date,
            is_workday: d.is_workday,
            is_holiday,
            check_in_start: d.check_in_start,
            check_in_end: d.check_in_end,
            check_out_start: d.check_out_start,
        },
        None => EffectiveSchedule {
            date,
            is_workday: day_of_week(date) < 5,
            is_holiday,
            check_in_start: fallback.check_in_start,
            check_in_end: fallback.check_in_end,
            check_out_start: fallback.check_out_start,
        },
    }
}

/// Where schedule data comes from. Implemented by the record store.
pub trait ScheduleSource {
    fn day_schedule(&self, day_of_week: u8) -> Result<Option<DaySchedule>, SourceError>;
    fn is_holiday(&self, date: NaiveDate) -> Result<bool, SourceError>;
    fn work_settings(&self) -> Result<WorkSettings, SourceError>;
}

impl<T: ScheduleSource + ?Sized> ScheduleSource for Arc<T> {
    fn day_schedule(&self, day_of_week: u8) -> Result<Option<DaySchedule>, SourceError> {
        (**self).day_schedule(day_of_week)
    }
    fn is_holiday(&self, date: NaiveDate) -> Result<bool, SourceError> {
        (**self).is_holiday(date)
    }
    fn work_settings(&self) -> Result<WorkSettings, SourceError> {
        (**self).work_settings()
    }
}

/// Store-backed resolver. Deterministic for a given date and configuration
/// snapshot; no side effects.
pub struct ScheduleResolver<S> {
    source: S,
}

impl<S: ScheduleSource> ScheduleResolver<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn effective(&self, date: NaiveDate) -> Result<EffectiveSchedule, ScheduleError> {
        let day = self
            .source
            .day_schedule(day_of_week(date))
            .map_err(ScheduleError::Source)?;
        let holiday = self.source.is_holiday(date).map_err(ScheduleError::Source)?;
        let settings = self.source.work_settings().map_err(ScheduleError::Source)?;
        Ok(resolve_windows(date, day.as_ref(), &settings, holiday))
    }

    pub fn work_settings(&self) -> Result<WorkSettings, ScheduleError> {
        self.source.work_settings().map_err(ScheduleError::Source)
    }
}
