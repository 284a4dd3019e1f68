//! Attendance decision logic.
//!
//! [`decide`] is a pure function of (existing record, now, effective
//! schedule, policy): it never touches storage. Callers apply the returned
//! decision as an upsert against the unique `(employee, date)` row.
//!
//! Per-day states run `NOT_MARKED → CHECKED_IN → CHECKED_IN_AND_OUT`;
//! ABSENT is assigned only by the end-of-day sweep to employees that never
//! left `NOT_MARKED`.

use crate::schedule::{EffectiveSchedule, WorkSettings};
use crate::types::{AttendanceRecord, AttendanceStatus};
use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::Serialize;

/// Which transition a recognition event at a given time maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    CheckIn,
    CheckOut,
}

/// Why an action was refused. These are expected business outcomes, not
/// errors; the kiosk shows them to the person at the screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Denial {
    NotAWorkday,
    IsHoliday,
    OutOfWindow {
        check_in_start: NaiveTime,
    },
    NoCheckInYet,
    TooSoonToCheckout {
        minutes_remaining: i64,
    },
}

/// Outcome of one recognition event for one employee.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Record a check-in with the classified status.
    CheckIn { status: AttendanceStatus },
    /// Record a check-out; status is left untouched.
    CheckOut,
    /// Check-in already recorded today. Informational, returns the prior
    /// record so kiosk retries stay success-shaped.
    AlreadyCheckedIn,
    /// Check-out already recorded today. Informational.
    AlreadyCheckedOut,
    Denied(Denial),
}

/// Policy knobs the decision needs, split from [`WorkSettings`] so tests
/// and callers can construct them directly.
#[derive(Debug, Clone, Copy)]
pub struct AttendancePolicy {
    pub late_threshold_minutes: u32,
    pub checkout_dwell_minutes: u32,
}

impl From<&WorkSettings> for AttendancePolicy {
    fn from(s: &WorkSettings) -> Self {
        Self {
            late_threshold_minutes: s.late_threshold_minutes,
            checkout_dwell_minutes: s.checkout_dwell_minutes,
        }
    }
}

/// Map a time of day onto a transition.
///
/// An employee who has checked in but not out is in CHECK_OUT mode at any
/// time, so early departures are possible before `check_out_start`. The
/// check-in window extends past `check_in_end` up to `check_out_start`
/// (classified late there). From `check_out_start` to end of day the kiosk
/// only offers check-out — an employee who never checked in gets
/// `NoCheckInYet` there rather than a very-late check-in.
pub fn attendance_mode(
    t: NaiveTime,
    schedule: &EffectiveSchedule,
    checked_in: bool,
    checked_out: bool,
) -> Option<Mode> {
    if checked_in && !checked_out {
        return Some(Mode::CheckOut);
    }
    if t >= schedule.check_in_start && t < schedule.check_in_end {
        return Some(Mode::CheckIn);
    }
    if t >= schedule.check_in_end && t < schedule.check_out_start {
        // Late window: still a check-in, classified LATE by `decide`.
        return Some(Mode::CheckIn);
    }
    if t >= schedule.check_out_start {
        return Some(Mode::CheckOut);
    }
    None
}

/// Decide what a recognition event at `now` means for `existing`, the
/// employee's record for `now.date()` if any.
pub fn decide(
    existing: Option<&AttendanceRecord>,
    now: NaiveDateTime,
    schedule: &EffectiveSchedule,
    policy: &AttendancePolicy,
) -> Decision {
    if !schedule.is_workday {
        return Decision::Denied(Denial::NotAWorkday);
    }
    if schedule.is_holiday {
        return Decision::Denied(Denial::IsHoliday);
    }

    let checked_in = existing.is_some_and(|r| r.check_in_at.is_some());
    let checked_out = existing.is_some_and(|r| r.check_out_at.is_some());

    let Some(mode) = attendance_mode(now.time(), schedule, checked_in, checked_out) else {
        return Decision::Denied(Denial::OutOfWindow {
            check_in_start: schedule.check_in_start,
        });
    };

    match mode {
        Mode::CheckIn => {
            if checked_in {
                return Decision::AlreadyCheckedIn;
            }
            let late_threshold = now.date().and_time(schedule.check_in_end)
                + Duration::minutes(policy.late_threshold_minutes as i64);
            let status = if now <= late_threshold {
                AttendanceStatus::Present
            } else {
                AttendanceStatus::Late
            };
            Decision::CheckIn { status }
        }
        Mode::CheckOut => {
            let Some(check_in_at) = existing.and_then(|r| r.check_in_at) else {
                return Decision::Denied(Denial::NoCheckInYet);
            };
            if checked_out {
                return Decision::AlreadyCheckedOut;
            }
            let dwell = Duration::minutes(policy.checkout_dwell_minutes as i64);
            let elapsed = now - check_in_at;
            if elapsed < dwell {
                return Decision::Denied(Denial::TooSoonToCheckout {
                    minutes_remaining: policy.checkout_dwell_minutes as i64
                        - elapsed.num_minutes(),
                });
            }
            Decision::CheckOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn schedule() -> EffectiveSchedule {
        EffectiveSchedule {
            date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            is_workday: true,
            is_holiday: false,
            check_in_start: t(7, 0),
            check_in_end: t(8, 0),
            check_out_start: t(16, 0),
        }
    }

    fn policy() -> AttendancePolicy {
        AttendancePolicy {
            late_threshold_minutes: 15,
            checkout_dwell_minutes: 3,
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap().and_time(t(h, m))
    }

    fn record(check_in: Option<NaiveDateTime>, check_out: Option<NaiveDateTime>) -> AttendanceRecord {
        AttendanceRecord {
            id: 1,
            employee_id: 7,
            date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            check_in_at: check_in,
            check_out_at: check_out,
            status: AttendanceStatus::Present,
            confidence: Some(0.9),
            corrected_by: None,
            correction_notes: None,
        }
    }

    #[test]
    fn test_before_window_is_rejected() {
        let d = decide(None, at(6, 30), &schedule(), &policy());
        assert!(matches!(d, Decision::Denied(Denial::OutOfWindow { .. })));
    }

    #[test]
    fn test_on_time_window_is_present() {
        let d = decide(None, at(7, 55), &schedule(), &policy());
        assert_eq!(
            d,
            Decision::CheckIn {
                status: AttendanceStatus::Present
            }
        );
    }

    #[test]
    fn test_grace_period_is_still_present() {
        // check_in_end 08:00 + 15 min grace → 08:10 is within it only for
        // status purposes when checking in during the late window.
        let d = decide(None, at(8, 10), &schedule(), &policy());
        assert_eq!(
            d,
            Decision::CheckIn {
                status: AttendanceStatus::Present
            }
        );
    }

    #[test]
    fn test_past_grace_is_late() {
        let d = decide(None, at(8, 16), &schedule(), &policy());
        assert_eq!(
            d,
            Decision::CheckIn {
                status: AttendanceStatus::Late
            }
        );
        let d = decide(None, at(12, 0), &schedule(), &policy());
        assert_eq!(
            d,
            Decision::CheckIn {
                status: AttendanceStatus::Late
            }
        );
    }

    #[test]
    fn test_exactly_at_grace_boundary_is_present() {
        let d = decide(None, at(8, 15), &schedule(), &policy());
        assert_eq!(
            d,
            Decision::CheckIn {
                status: AttendanceStatus::Present
            }
        );
    }

    #[test]
    fn test_second_check_in_is_idempotent() {
        let rec = record(Some(at(7, 30)), None);
        // Already checked in → mode is CHECK_OUT at any time, but a second
        // tap right after check-in hits the dwell guard, not a new check-in.
        let d = decide(Some(&rec), at(7, 31), &schedule(), &policy());
        assert!(matches!(
            d,
            Decision::Denied(Denial::TooSoonToCheckout { .. })
        ));
    }

    #[test]
    fn test_checkout_mode_without_checkin_is_rejected() {
        let d = decide(None, at(16, 30), &schedule(), &policy());
        assert_eq!(d, Decision::Denied(Denial::NoCheckInYet));
    }

    #[test]
    fn test_exactly_at_checkout_start_without_checkin() {
        // Boundary preserved from the source system: 16:00 sharp falls into
        // CHECK_OUT mode, not a very-late check-in.
        let d = decide(None, at(16, 0), &schedule(), &policy());
        assert_eq!(d, Decision::Denied(Denial::NoCheckInYet));
    }

    #[test]
    fn test_checkout_too_soon_reports_minutes_remaining() {
        let rec = record(Some(at(16, 10)), None);
        let d = decide(Some(&rec), at(16, 12), &schedule(), &policy());
        assert_eq!(
            d,
            Decision::Denied(Denial::TooSoonToCheckout {
                minutes_remaining: 1
            })
        );
    }

    #[test]
    fn test_checkout_at_exact_dwell_succeeds() {
        let rec = record(Some(at(16, 10)), None);
        let d = decide(Some(&rec), at(16, 13), &schedule(), &policy());
        assert_eq!(d, Decision::CheckOut);
    }

    #[test]
    fn test_early_departure_allowed_once_checked_in() {
        // Checked in at 07:30, leaving at 11:00 — before check_out_start.
        let rec = record(Some(at(7, 30)), None);
        let d = decide(Some(&rec), at(11, 0), &schedule(), &policy());
        assert_eq!(d, Decision::CheckOut);
    }

    #[test]
    fn test_second_checkout_is_idempotent() {
        let rec = record(Some(at(7, 30)), Some(at(16, 5)));
        let d = decide(Some(&rec), at(16, 40), &schedule(), &policy());
        assert_eq!(d, Decision::AlreadyCheckedOut);
    }

    #[test]
    fn test_checked_in_and_out_in_checkin_window_is_already_checked_in() {
        // Both timestamps set; a tap back inside the check-in window lands
        // on the idempotent check-in reply.
        let rec = record(Some(at(7, 10)), Some(at(7, 20)));
        let d = decide(Some(&rec), at(7, 40), &schedule(), &policy());
        assert_eq!(d, Decision::AlreadyCheckedIn);
    }

    #[test]
    fn test_non_workday_short_circuits() {
        let mut s = schedule();
        s.is_workday = false;
        let d = decide(None, at(7, 30), &s, &policy());
        assert_eq!(d, Decision::Denied(Denial::NotAWorkday));
    }

    #[test]
    fn test_holiday_short_circuits() {
        let mut s = schedule();
        s.is_holiday = true;
        let d = decide(None, at(7, 30), &s, &policy());
        assert_eq!(d, Decision::Denied(Denial::IsHoliday));
    }

    #[test]
    fn test_mode_end_of_day_is_checkout() {
        let s = schedule();
        assert_eq!(
            attendance_mode(t(23, 59), &s, false, false),
            Some(Mode::CheckOut)
        );
    }

    #[test]
    fn test_mode_late_window_is_checkin() {
        let s = schedule();
        assert_eq!(
            attendance_mode(t(12, 0), &s, false, false),
            Some(Mode::CheckIn)
        );
    }
}
