use crate::{Store, StoreError, StoreResult, DATE_FMT, TIME_FMT};
use adsum_core::schedule::{DaySchedule, ScheduleSource, SourceError, WorkSettings};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Row};

fn parse_time(s: &str) -> Result<NaiveTime, StoreError> {
    NaiveTime::parse_from_str(s, TIME_FMT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| StoreError::Corrupt(format!("bad time: {s}")))
}

fn map_day_schedule(row: &Row<'_>) -> rusqlite::Result<(u8, bool, String, String, String)> {
    Ok((
        row.get::<_, i64>("day_of_week")? as u8,
        row.get::<_, i64>("is_workday")? != 0,
        row.get("check_in_start")?,
        row.get("check_in_end")?,
        row.get("check_out_start")?,
    ))
}

/// Outcome counters of one auto-holiday import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct HolidayImportStats {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl Store {
    pub fn day_schedule(&self, day_of_week: u8) -> StoreResult<Option<DaySchedule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT day_of_week, is_workday, check_in_start, check_in_end, check_out_start
             FROM daily_schedules WHERE day_of_week = ?1",
        )?;
        let mut rows = stmt.query_map([day_of_week], map_day_schedule)?;
        let Some(raw) = rows.next().transpose()? else {
            return Ok(None);
        };
        let (dow, is_workday, cis, cie, cos) = raw;
        Ok(Some(DaySchedule {
            day_of_week: dow,
            is_workday,
            check_in_start: parse_time(&cis)?,
            check_in_end: parse_time(&cie)?,
            check_out_start: parse_time(&cos)?,
        }))
    }

    pub fn set_day_schedule(&self, schedule: &DaySchedule) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO daily_schedules
                (day_of_week, is_workday, check_in_start, check_in_end, check_out_start)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (day_of_week) DO UPDATE SET
                is_workday = excluded.is_workday,
                check_in_start = excluded.check_in_start,
                check_in_end = excluded.check_in_end,
                check_out_start = excluded.check_out_start",
            params![
                schedule.day_of_week,
                schedule.is_workday,
                schedule.check_in_start.format(TIME_FMT).to_string(),
                schedule.check_in_end.format(TIME_FMT).to_string(),
                schedule.check_out_start.format(TIME_FMT).to_string()
            ],
        )?;
        Ok(())
    }

    pub fn work_settings(&self) -> StoreResult<WorkSettings> {
        let conn = self.conn();
        let (cis, cie, cos, late, dwell, threshold): (String, String, String, i64, i64, f64) =
            conn.query_row(
                "SELECT check_in_start, check_in_end, check_out_start,
                        late_threshold_minutes, checkout_dwell_minutes, similarity_threshold
                 FROM work_settings WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )?;
        Ok(WorkSettings {
            check_in_start: parse_time(&cis)?,
            check_in_end: parse_time(&cie)?,
            check_out_start: parse_time(&cos)?,
            late_threshold_minutes: late as u32,
            checkout_dwell_minutes: dwell as u32,
            similarity_threshold: threshold as f32,
        })
    }

    pub fn set_work_settings(&self, settings: &WorkSettings) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE work_settings SET
                check_in_start = ?1, check_in_end = ?2, check_out_start = ?3,
                late_threshold_minutes = ?4, checkout_dwell_minutes = ?5,
                similarity_threshold = ?6
             WHERE id = 1",
            params![
                settings.check_in_start.format(TIME_FMT).to_string(),
                settings.check_in_end.format(TIME_FMT).to_string(),
                settings.check_out_start.format(TIME_FMT).to_string(),
                settings.late_threshold_minutes,
                settings.checkout_dwell_minutes,
                settings.similarity_threshold as f64
            ],
        )?;
        Ok(())
    }

    /// A date is a holiday when a non-excluded row exists for it.
    pub fn is_holiday(&self, date: NaiveDate) -> StoreResult<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM holidays WHERE date = ?1 AND is_excluded = 0",
            [date.format(DATE_FMT).to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Record a manually entered holiday.
    pub fn add_holiday(&self, date: NaiveDate, name: &str) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO holidays (date, name, is_auto, is_excluded) VALUES (?1, ?2, 0, 0)
             ON CONFLICT (date) DO UPDATE SET name = excluded.name, is_excluded = 0",
            params![date.format(DATE_FMT).to_string(), name],
        )?;
        Ok(())
    }

    /// Un-mark a holiday without deleting it, so a later auto-import does
    /// not bring it back. Returns whether a row was affected.
    pub fn exclude_holiday(&self, date: NaiveDate) -> StoreResult<bool> {
        let changed = self.conn().execute(
            "UPDATE holidays SET is_excluded = 1 WHERE date = ?1",
            [date.format(DATE_FMT).to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Merge an already-fetched list of national holidays:
    /// new dates are added as auto rows, existing auto rows get their name
    /// refreshed, excluded and manual rows are left alone.
    pub fn import_auto_holidays(
        &self,
        holidays: &[(NaiveDate, String)],
    ) -> StoreResult<HolidayImportStats> {
        let mut stats = HolidayImportStats::default();
        let conn = self.conn();
        for (date, name) in holidays {
            let date_str = date.format(DATE_FMT).to_string();
            let existing: Option<(bool, bool)> = conn
                .query_row(
                    "SELECT is_auto, is_excluded FROM holidays WHERE date = ?1",
                    [&date_str],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)? != 0,
                            row.get::<_, i64>(1)? != 0,
                        ))
                    },
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            match existing {
                Some((_, true)) => stats.skipped += 1,
                Some((true, false)) => {
                    conn.execute(
                        "UPDATE holidays SET name = ?2 WHERE date = ?1",
                        params![date_str, name],
                    )?;
                    stats.updated += 1;
                }
                Some((false, false)) => stats.skipped += 1,
                None => {
                    conn.execute(
                        "INSERT INTO holidays (date, name, is_auto, is_excluded)
                         VALUES (?1, ?2, 1, 0)",
                        params![date_str, name],
                    )?;
                    stats.added += 1;
                }
            }
        }
        Ok(stats)
    }
}

impl ScheduleSource for Store {
    fn day_schedule(&self, day_of_week: u8) -> Result<Option<DaySchedule>, SourceError> {
        Ok(Store::day_schedule(self, day_of_week)?)
    }
    fn is_holiday(&self, date: NaiveDate) -> Result<bool, SourceError> {
        Ok(Store::is_holiday(self, date)?)
    }
    fn work_settings(&self) -> Result<WorkSettings, SourceError> {
        Ok(Store::work_settings(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_seeded_week_has_friday_early_checkout() {
        let store = Store::open_in_memory().unwrap();
        let friday = store.day_schedule(4).unwrap().unwrap();
        assert!(friday.is_workday);
        assert_eq!(friday.check_out_start, t(11, 30));

        let saturday = store.day_schedule(5).unwrap().unwrap();
        assert!(!saturday.is_workday);
    }

    #[test]
    fn test_seeded_settings_defaults() {
        let store = Store::open_in_memory().unwrap();
        let settings = store.work_settings().unwrap();
        assert_eq!(settings.check_in_start, t(7, 0));
        assert_eq!(settings.late_threshold_minutes, 15);
        assert_eq!(settings.checkout_dwell_minutes, 3);
        assert!((settings.similarity_threshold - 0.40).abs() < 1e-6);
    }

    #[test]
    fn test_set_day_schedule_upserts() {
        let store = Store::open_in_memory().unwrap();
        let mut monday = store.day_schedule(0).unwrap().unwrap();
        monday.check_out_start = t(17, 0);
        store.set_day_schedule(&monday).unwrap();
        assert_eq!(
            store.day_schedule(0).unwrap().unwrap().check_out_start,
            t(17, 0)
        );
    }

    #[test]
    fn test_holiday_exclusion_suppresses_and_survives_import() {
        let store = Store::open_in_memory().unwrap();
        let day = d(2025, 1, 1);
        let imported = store
            .import_auto_holidays(&[(day, "New Year".to_string())])
            .unwrap();
        assert_eq!(imported.added, 1);
        assert!(store.is_holiday(day).unwrap());

        assert!(store.exclude_holiday(day).unwrap());
        assert!(!store.is_holiday(day).unwrap());

        // Re-import must not resurrect the excluded holiday.
        let again = store
            .import_auto_holidays(&[(day, "New Year".to_string())])
            .unwrap();
        assert_eq!(again.skipped, 1);
        assert!(!store.is_holiday(day).unwrap());
    }

    #[test]
    fn test_import_refreshes_auto_rows_but_not_manual() {
        let store = Store::open_in_memory().unwrap();
        let auto_day = d(2025, 3, 29);
        let manual_day = d(2025, 4, 2);
        store
            .import_auto_holidays(&[(auto_day, "Nyepi".to_string())])
            .unwrap();
        store.add_holiday(manual_day, "Town anniversary").unwrap();

        let stats = store
            .import_auto_holidays(&[
                (auto_day, "Nyepi (Saka New Year)".to_string()),
                (manual_day, "Something else".to_string()),
            ])
            .unwrap();
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.skipped, 1);
    }
}
