//! Schema creation and default seeds. Everything here is idempotent so
//! open() can run it on every start.

use crate::StoreResult;
use rusqlite::{params, Connection};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS employees (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    nip         TEXT UNIQUE,
    name        TEXT NOT NULL,
    position    TEXT NOT NULL DEFAULT '',
    is_active   INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
);

CREATE TABLE IF NOT EXISTS face_embeddings (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    employee_id INTEGER NOT NULL REFERENCES employees(id) ON DELETE CASCADE,
    embedding   BLOB NOT NULL,
    photo_path  TEXT,
    is_primary  INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
);
CREATE INDEX IF NOT EXISTS idx_face_embeddings_employee
    ON face_embeddings(employee_id);

CREATE TABLE IF NOT EXISTS attendance_logs (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    employee_id      INTEGER NOT NULL REFERENCES employees(id),
    date             TEXT NOT NULL,
    check_in_at      TEXT,
    check_out_at     TEXT,
    status           TEXT NOT NULL,
    confidence       REAL,
    corrected_by     TEXT,
    correction_notes TEXT,
    created_at       TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
    updated_at       TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
    UNIQUE (employee_id, date)
);
CREATE INDEX IF NOT EXISTS idx_attendance_logs_date ON attendance_logs(date);

CREATE TABLE IF NOT EXISTS daily_schedules (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    day_of_week     INTEGER NOT NULL UNIQUE,
    is_workday      INTEGER NOT NULL DEFAULT 1,
    check_in_start  TEXT NOT NULL,
    check_in_end    TEXT NOT NULL,
    check_out_start TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS holidays (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    date        TEXT NOT NULL UNIQUE,
    name        TEXT NOT NULL,
    is_auto     INTEGER NOT NULL DEFAULT 0,
    is_excluded INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS work_settings (
    id                     INTEGER PRIMARY KEY CHECK (id = 1),
    check_in_start         TEXT NOT NULL,
    check_in_end           TEXT NOT NULL,
    check_out_start        TEXT NOT NULL,
    late_threshold_minutes INTEGER NOT NULL,
    checkout_dwell_minutes INTEGER NOT NULL,
    similarity_threshold   REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    action      TEXT NOT NULL,
    entity      TEXT NOT NULL,
    description TEXT NOT NULL,
    actor       TEXT NOT NULL,
    details     TEXT,
    created_at  TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
);
";

pub(crate) fn create_all(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Seed the single settings row and the default week. Friday closes early;
/// Saturday and Sunday are off.
pub(crate) fn seed_defaults(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO work_settings
            (id, check_in_start, check_in_end, check_out_start,
             late_threshold_minutes, checkout_dwell_minutes, similarity_threshold)
         VALUES (1, '07:00:00', '08:00:00', '16:00:00', 15, 3, 0.40)",
        [],
    )?;

    let default_week: [(u8, bool, &str); 7] = [
        (0, true, "16:00:00"),
        (1, true, "16:00:00"),
        (2, true, "16:00:00"),
        (3, true, "16:00:00"),
        (4, true, "11:30:00"),
        (5, false, "16:00:00"),
        (6, false, "16:00:00"),
    ];
    for (dow, workday, checkout) in default_week {
        conn.execute(
            "INSERT OR IGNORE INTO daily_schedules
                (day_of_week, is_workday, check_in_start, check_in_end, check_out_start)
             VALUES (?1, ?2, '07:00:00', '08:00:00', ?3)",
            params![dow, workday, checkout],
        )?;
    }
    Ok(())
}
