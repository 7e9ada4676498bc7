use crate::calc::{AttendanceRecord, Status, Student};
use crate::calendar::{self, Schedule, ScheduleError, WeekdaySet};
use crate::settings::AppSettings;
use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

pub const DB_FILE_NAME: &str = "attendance.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            subject TEXT NOT NULL DEFAULT '',
            class_days TEXT NOT NULL DEFAULT '',
            start_date TEXT,
            end_date TEXT,
            partial1_end_date TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            name TEXT NOT NULL,
            roster_code TEXT,
            FOREIGN KEY(group_id) REFERENCES groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_group ON students(group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('present', 'late', 'absent')),
            updated_at TEXT,
            PRIMARY KEY(student_id, date),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    info!(path = %db_path.to_string_lossy(), "workspace database ready");
    Ok(conn)
}

pub fn settings_all(conn: &Connection) -> anyhow::Result<HashMap<String, String>> {
    let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

pub fn settings_set(conn: &Connection, key: &str, value: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, value),
    )?;
    Ok(())
}

pub fn settings_delete(conn: &Connection, key: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM settings WHERE key = ?", [key])?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub subject: String,
    pub class_days: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub partial1_end_date: Option<String>,
}

impl GroupRow {
    pub fn weekdays(&self) -> Result<WeekdaySet, ScheduleError> {
        WeekdaySet::parse(&self.class_days)
    }

    /// Start, end and split as far as they resolve, with the global term dates
    /// standing in for missing group dates.
    fn bounds(
        &self,
        settings: &AppSettings,
    ) -> Result<(Option<NaiveDate>, Option<NaiveDate>, Option<NaiveDate>), ScheduleError> {
        let start = match non_blank(&self.start_date) {
            Some(raw) => Some(calendar::parse_date("startDate", raw)?),
            None => settings.global_start_date,
        };
        let end = match non_blank(&self.end_date) {
            Some(raw) => Some(calendar::parse_date("endDate", raw)?),
            None => settings.global_end_date,
        };
        let split = match non_blank(&self.partial1_end_date) {
            Some(raw) => Some(calendar::parse_date("partial1EndDate", raw)?),
            None => None,
        };
        Ok((start, end, split))
    }

    /// Resolve the class window, falling back to the global term dates.
    /// `Ok(None)` means the group has no usable window yet.
    pub fn schedule(&self, settings: &AppSettings) -> Result<Option<Schedule>, ScheduleError> {
        let weekdays = self.weekdays()?;
        let (start, end, split) = self.bounds(settings)?;
        let (Some(start), Some(end)) = (start, end) else {
            return Ok(None);
        };
        Ok(Some(Schedule {
            weekdays,
            start,
            end,
            split,
        }))
    }

    /// Check `start <= split <= end` against whichever bounds resolve under `settings`.
    /// A window that is only partly known is checked as far as it goes.
    pub fn validate(&self, settings: &AppSettings) -> Result<(), ScheduleError> {
        let weekdays = self.weekdays()?;
        let (start, end, split) = self.bounds(settings)?;
        if let (Some(start), Some(end)) = (start, end) {
            return Schedule {
                weekdays,
                start,
                end,
                split,
            }
            .validate();
        }
        if weekdays.is_empty() {
            return Err(ScheduleError::NoClassDays);
        }
        if let Some(p) = split {
            if start.is_some_and(|s| p < s) || end.is_some_and(|e| p > e) {
                return Err(ScheduleError::SplitOutsideTerm);
            }
        }
        Ok(())
    }

    /// True when the group takes its start or end date from the global term.
    pub fn uses_global_dates(&self) -> bool {
        non_blank(&self.start_date).is_none() || non_blank(&self.end_date).is_none()
    }
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

const GROUP_COLUMNS: &str =
    "id, name, subject, class_days, start_date, end_date, partial1_end_date";

fn group_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: r.get(0)?,
        name: r.get(1)?,
        subject: r.get(2)?,
        class_days: r.get(3)?,
        start_date: r.get(4)?,
        end_date: r.get(5)?,
        partial1_end_date: r.get(6)?,
    })
}

pub fn load_group(conn: &Connection, group_id: &str) -> rusqlite::Result<Option<GroupRow>> {
    conn.query_row(
        &format!("SELECT {} FROM groups WHERE id = ?", GROUP_COLUMNS),
        [group_id],
        group_from_row,
    )
    .optional()
}

pub fn list_groups(conn: &Connection) -> rusqlite::Result<Vec<GroupRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM groups ORDER BY name, id",
        GROUP_COLUMNS
    ))?;
    let rows = stmt
        .query_map([], group_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_students(conn: &Connection, group_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM students WHERE group_id = ?",
        [group_id],
        |r| r.get(0),
    )
}

/// Roster in display order (name, then id).
pub fn load_students(conn: &Connection, group_id: &str) -> rusqlite::Result<Vec<Student>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, roster_code
         FROM students
         WHERE group_id = ?
         ORDER BY name, id",
    )?;
    let rows = stmt
        .query_map([group_id], |r| {
            let roster_code: Option<String> = r.get(2)?;
            Ok(Student {
                id: r.get(0)?,
                name: r.get(1)?,
                roster_code: roster_code
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn student_in_group(
    conn: &Connection,
    group_id: &str,
    student_id: &str,
) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM students WHERE group_id = ? AND id = ?",
        (group_id, student_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

/// All records of a group's students. Rows that do not parse are skipped.
pub fn load_records(conn: &Connection, group_id: &str) -> rusqlite::Result<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT a.student_id, a.date, a.status
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE s.group_id = ?
         ORDER BY a.date, a.student_id",
    )?;
    let raw = stmt
        .query_map([group_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(raw.len());
    for (student_id, date, status) in raw {
        let (Ok(date), Some(status)) = (
            NaiveDate::parse_from_str(&date, calendar::DATE_FORMAT),
            Status::parse(&status),
        ) else {
            warn!(%student_id, %date, %status, "skipping malformed attendance row");
            continue;
        };
        out.push(AttendanceRecord {
            student_id,
            date,
            status,
        });
    }
    Ok(out)
}

/// Dates on which at least one student of the group has a record.
pub fn recorded_dates(conn: &Connection, group_id: &str) -> rusqlite::Result<HashSet<NaiveDate>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT a.date
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE s.group_id = ?",
    )?;
    let dates = stmt
        .query_map([group_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(dates
        .iter()
        .filter_map(|s| NaiveDate::parse_from_str(s, calendar::DATE_FORMAT).ok())
        .collect())
}

pub fn upsert_attendance(
    conn: &Connection,
    student_id: &str,
    date: NaiveDate,
    status: Status,
    updated_at: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO attendance(student_id, date, status, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           status = excluded.status,
           updated_at = excluded.updated_at",
        (
            student_id,
            calendar::format_date(date),
            status.as_str(),
            updated_at,
        ),
    )?;
    Ok(())
}

pub fn clear_attendance(conn: &Connection, student_id: &str, date: NaiveDate) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM attendance WHERE student_id = ? AND date = ?",
        (student_id, calendar::format_date(date)),
    )
}

/// Records of the group that fall on a weekday outside `keep`.
pub fn off_schedule_records(
    conn: &Connection,
    group_id: &str,
    keep: WeekdaySet,
) -> rusqlite::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT a.student_id, a.date
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE s.group_id = ?",
    )?;
    let rows = stmt
        .query_map([group_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter(|(_, date)| {
            NaiveDate::parse_from_str(date, calendar::DATE_FORMAT)
                .map(|d| !keep.contains(d.weekday()))
                .unwrap_or(false)
        })
        .collect())
}
