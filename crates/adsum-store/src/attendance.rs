use crate::{Store, StoreError, StoreResult, DATETIME_FMT, DATE_FMT};
use adsum_core::types::{AttendanceRecord, AttendanceStatus};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Row};

/// How a check-in landed in storage. `AlreadyCheckedIn` covers both the
/// common application-level detection and the rarer unique-constraint race
/// where another process won the insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInApplied {
    Created,
    UpdatedExisting,
    AlreadyCheckedIn,
}

fn conversion_err(msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(StoreError::Corrupt(msg)),
    )
}

fn parse_datetime(s: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FMT)
        .map_err(|_| conversion_err(format!("bad datetime: {s}")))
}

pub(crate) fn map_attendance(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let date_str: String = row.get("date")?;
    let date = NaiveDate::parse_from_str(&date_str, DATE_FMT)
        .map_err(|_| conversion_err(format!("bad date: {date_str}")))?;

    let check_in_at = row
        .get::<_, Option<String>>("check_in_at")?
        .map(|s| parse_datetime(&s))
        .transpose()?;
    let check_out_at = row
        .get::<_, Option<String>>("check_out_at")?
        .map(|s| parse_datetime(&s))
        .transpose()?;

    let status_str: String = row.get("status")?;
    let status = AttendanceStatus::from_str(&status_str)
        .ok_or_else(|| conversion_err(format!("bad status: {status_str}")))?;

    Ok(AttendanceRecord {
        id: row.get("id")?,
        employee_id: row.get("employee_id")?,
        date,
        check_in_at,
        check_out_at,
        status,
        confidence: row.get::<_, Option<f64>>("confidence")?.map(|c| c as f32),
        corrected_by: row.get("corrected_by")?,
        correction_notes: row.get("correction_notes")?,
    })
}

const SELECT_ATTENDANCE: &str = "SELECT id, employee_id, date, check_in_at, check_out_at,
        status, confidence, corrected_by, correction_notes
 FROM attendance_logs";

impl Store {
    pub fn attendance_for(
        &self,
        employee_id: i64,
        date: NaiveDate,
    ) -> StoreResult<Option<AttendanceRecord>> {
        let conn = self.conn();
        let sql = format!("{SELECT_ATTENDANCE} WHERE employee_id = ?1 AND date = ?2");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(
            params![employee_id, date.format(DATE_FMT).to_string()],
            map_attendance,
        )?;
        Ok(rows.next().transpose()?)
    }

    fn must_attendance_for(
        &self,
        employee_id: i64,
        date: NaiveDate,
    ) -> StoreResult<AttendanceRecord> {
        self.attendance_for(employee_id, date)?.ok_or_else(|| {
            StoreError::Corrupt(format!(
                "attendance row vanished for employee {employee_id} on {date}"
            ))
        })
    }

    /// Upsert a check-in: fill an existing row for the date (a
    /// sweep-created one, typically) or insert a new one. A unique
    /// constraint violation means another process checked this employee in
    /// first — re-read and report the idempotent case.
    pub fn record_check_in(
        &self,
        employee_id: i64,
        date: NaiveDate,
        now: NaiveDateTime,
        status: AttendanceStatus,
        confidence: f32,
    ) -> StoreResult<(AttendanceRecord, CheckInApplied)> {
        match self.attendance_for(employee_id, date)? {
            Some(rec) if rec.check_in_at.is_some() => {
                return Ok((rec, CheckInApplied::AlreadyCheckedIn));
            }
            Some(rec) => {
                self.conn().execute(
                    "UPDATE attendance_logs
                     SET check_in_at = ?2, status = ?3, confidence = ?4,
                         updated_at = datetime('now', 'localtime')
                     WHERE id = ?1",
                    params![
                        rec.id,
                        now.format(DATETIME_FMT).to_string(),
                        status.as_str(),
                        confidence as f64
                    ],
                )?;
                let rec = self.must_attendance_for(employee_id, date)?;
                return Ok((rec, CheckInApplied::UpdatedExisting));
            }
            None => {}
        }

        let inserted = self.conn().execute(
            "INSERT INTO attendance_logs (employee_id, date, check_in_at, status, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                employee_id,
                date.format(DATE_FMT).to_string(),
                now.format(DATETIME_FMT).to_string(),
                status.as_str(),
                confidence as f64
            ],
        );

        match inserted {
            Ok(_) => {
                let rec = self.must_attendance_for(employee_id, date)?;
                Ok((rec, CheckInApplied::Created))
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                // Lost the race to a concurrent check-in.
                let rec = self.must_attendance_for(employee_id, date)?;
                tracing::warn!(
                    employee_id,
                    %date,
                    "check-in insert hit unique constraint, treating as already checked in"
                );
                Ok((rec, CheckInApplied::AlreadyCheckedIn))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Set `check_out_at`, leaving status untouched. Guarded so a
    /// concurrent duplicate checkout is a no-op; returns whether this call
    /// applied the write.
    pub fn record_check_out(
        &self,
        employee_id: i64,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> StoreResult<(AttendanceRecord, bool)> {
        let changed = self.conn().execute(
            "UPDATE attendance_logs
             SET check_out_at = ?3, updated_at = datetime('now', 'localtime')
             WHERE employee_id = ?1 AND date = ?2
               AND check_in_at IS NOT NULL AND check_out_at IS NULL",
            params![
                employee_id,
                date.format(DATE_FMT).to_string(),
                now.format(DATETIME_FMT).to_string()
            ],
        )?;
        let rec = self.must_attendance_for(employee_id, date)?;
        Ok((rec, changed > 0))
    }

    /// Create ABSENT rows for every active employee with no record on
    /// `date`. Safe to re-run; existing rows of any status are skipped.
    /// Workday/holiday gating is the caller's concern.
    pub fn sweep_absences(&self, date: NaiveDate) -> StoreResult<usize> {
        let inserted = self.conn().execute(
            "INSERT INTO attendance_logs (employee_id, date, status)
             SELECT e.id, ?1, 'absent' FROM employees e
             WHERE e.is_active = 1
               AND NOT EXISTS (
                   SELECT 1 FROM attendance_logs a
                   WHERE a.employee_id = e.id AND a.date = ?1
               )",
            params![date.format(DATE_FMT).to_string()],
        )?;
        Ok(inserted)
    }

    /// All records for one date, for kiosk display and diagnostics.
    pub fn attendance_on(&self, date: NaiveDate) -> StoreResult<Vec<AttendanceRecord>> {
        let conn = self.conn();
        let sql = format!("{SELECT_ATTENDANCE} WHERE date = ?1 ORDER BY check_in_at DESC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([date.format(DATE_FMT).to_string()], map_attendance)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}
