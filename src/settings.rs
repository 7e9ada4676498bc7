use crate::calc::{GridDefault, ReportOptions, UnsetPolicy, DEFAULT_LOW_ATTENDANCE_THRESHOLD};
use crate::calendar::{self, DEFAULT_HORIZON_DAYS};
use crate::db;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::warn;

pub const GLOBAL_START_DATE: &str = "globalStartDate";
pub const GLOBAL_END_DATE: &str = "globalEndDate";
pub const SHOW_ROSTER_CODE: &str = "showRosterCode";
pub const REPORT_UNSET_STATUS: &str = "reportUnsetStatus";
pub const GRID_UNSET_DISPLAY: &str = "gridUnsetDisplay";
pub const LOW_ATTENDANCE_THRESHOLD: &str = "lowAttendanceThreshold";
pub const NEXT_CLASS_HORIZON_DAYS: &str = "nextClassHorizonDays";

// Older workspaces stored the roster-code toggle under this key.
const LEGACY_SHOW_ROSTER_CODE: &str = "showMatricula";

const MAX_HORIZON_DAYS: u32 = 3660;

/// Process-wide configuration, built from the flat `settings` table.
#[derive(Debug, Clone, PartialEq)]
pub struct AppSettings {
    pub global_start_date: Option<NaiveDate>,
    pub global_end_date: Option<NaiveDate>,
    pub show_roster_code: bool,
    pub report_unset_status: UnsetPolicy,
    pub grid_unset_display: GridDefault,
    pub low_attendance_threshold: f64,
    pub next_class_horizon_days: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            global_start_date: None,
            global_end_date: None,
            show_roster_code: false,
            report_unset_status: UnsetPolicy::Absent,
            grid_unset_display: GridDefault::Pending,
            low_attendance_threshold: DEFAULT_LOW_ATTENDANCE_THRESHOLD,
            next_class_horizon_days: DEFAULT_HORIZON_DAYS,
        }
    }
}

impl AppSettings {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        Ok(Self::from_map(&db::settings_all(conn)?))
    }

    /// Best-effort: a malformed stored value falls back to its default.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let mut out = Self::default();
        let mut obj = Map::new();
        for (k, v) in map {
            let key = if k == LEGACY_SHOW_ROSTER_CODE && !map.contains_key(SHOW_ROSTER_CODE) {
                SHOW_ROSTER_CODE
            } else {
                k.as_str()
            };
            obj.insert(key.to_string(), stored_to_json(key, v));
        }
        let start = obj.remove(GLOBAL_START_DATE);
        let end = obj.remove(GLOBAL_END_DATE);
        (out.global_start_date, out.global_end_date) = stored_term(start.as_ref(), end.as_ref());
        for (k, v) in &obj {
            let mut single = Map::new();
            single.insert(k.clone(), v.clone());
            if let Err(e) = out.merge_patch(&single) {
                if is_known_key(k) {
                    warn!(key = %k, error = %e, "ignoring malformed stored setting");
                }
            }
        }
        out
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            unset: self.report_unset_status,
            low_threshold: self.low_attendance_threshold,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            GLOBAL_START_DATE: self.global_start_date.map(calendar::format_date),
            GLOBAL_END_DATE: self.global_end_date.map(calendar::format_date),
            SHOW_ROSTER_CODE: self.show_roster_code,
            REPORT_UNSET_STATUS: self.report_unset_status.as_str(),
            GRID_UNSET_DISPLAY: self.grid_unset_display.as_str(),
            LOW_ATTENDANCE_THRESHOLD: self.low_attendance_threshold,
            NEXT_CLASS_HORIZON_DAYS: self.next_class_horizon_days,
        })
    }

    /// Apply a JSON patch in place. Unknown keys and bad values are rejected and
    /// leave `self` untouched.
    pub fn merge_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        let mut next = self.clone();
        for (k, v) in patch {
            match k.as_str() {
                GLOBAL_START_DATE => next.global_start_date = parse_optional_date(v, GLOBAL_START_DATE)?,
                GLOBAL_END_DATE => next.global_end_date = parse_optional_date(v, GLOBAL_END_DATE)?,
                SHOW_ROSTER_CODE => {
                    next.show_roster_code = v
                        .as_bool()
                        .ok_or_else(|| format!("{} must be boolean", k))?;
                }
                REPORT_UNSET_STATUS => {
                    next.report_unset_status = v
                        .as_str()
                        .and_then(UnsetPolicy::parse)
                        .ok_or_else(|| format!("{} must be one of: absent, present", k))?;
                }
                GRID_UNSET_DISPLAY => {
                    next.grid_unset_display = v
                        .as_str()
                        .and_then(GridDefault::parse)
                        .ok_or_else(|| format!("{} must be one of: pending, present", k))?;
                }
                LOW_ATTENDANCE_THRESHOLD => {
                    let t = v
                        .as_f64()
                        .ok_or_else(|| format!("{} must be a number", k))?;
                    if !(0.0..=100.0).contains(&t) {
                        return Err(format!("{} must be between 0 and 100", k));
                    }
                    next.low_attendance_threshold = t;
                }
                NEXT_CLASS_HORIZON_DAYS => {
                    let n = v
                        .as_u64()
                        .filter(|n| (1..=u64::from(MAX_HORIZON_DAYS)).contains(n))
                        .ok_or_else(|| {
                            format!("{} must be an integer between 1 and {}", k, MAX_HORIZON_DAYS)
                        })?;
                    next.next_class_horizon_days = n as u32;
                }
                _ => return Err(format!("unknown setting: {}", k)),
            }
        }
        if let (Some(s), Some(e)) = (next.global_start_date, next.global_end_date) {
            if e < s {
                return Err(format!("{} must not be before {}", GLOBAL_END_DATE, GLOBAL_START_DATE));
            }
        }
        *self = next;
        Ok(())
    }

    pub fn save(&self, conn: &Connection) -> anyhow::Result<()> {
        let tx = conn.unchecked_transaction()?;
        for (key, date) in [
            (GLOBAL_START_DATE, self.global_start_date),
            (GLOBAL_END_DATE, self.global_end_date),
        ] {
            match date {
                Some(d) => db::settings_set(&tx, key, &calendar::format_date(d))?,
                None => db::settings_delete(&tx, key)?,
            }
        }
        db::settings_set(&tx, SHOW_ROSTER_CODE, if self.show_roster_code { "true" } else { "false" })?;
        db::settings_set(&tx, REPORT_UNSET_STATUS, self.report_unset_status.as_str())?;
        db::settings_set(&tx, GRID_UNSET_DISPLAY, self.grid_unset_display.as_str())?;
        db::settings_set(
            &tx,
            LOW_ATTENDANCE_THRESHOLD,
            &self.low_attendance_threshold.to_string(),
        )?;
        db::settings_set(
            &tx,
            NEXT_CLASS_HORIZON_DAYS,
            &self.next_class_horizon_days.to_string(),
        )?;
        db::settings_delete(&tx, LEGACY_SHOW_ROSTER_CODE)?;
        tx.commit()?;
        Ok(())
    }
}

fn is_known_key(k: &str) -> bool {
    matches!(
        k,
        GLOBAL_START_DATE
            | GLOBAL_END_DATE
            | SHOW_ROSTER_CODE
            | REPORT_UNSET_STATUS
            | GRID_UNSET_DISPLAY
            | LOW_ATTENDANCE_THRESHOLD
            | NEXT_CLASS_HORIZON_DAYS
    )
}

/// Stored values are plain strings; lift them to the JSON types `merge_patch` expects.
fn stored_to_json(key: &str, raw: &str) -> Value {
    match key {
        SHOW_ROSTER_CODE => match raw.trim() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" | "" => Value::Bool(false),
            other => Value::String(other.to_string()),
        },
        LOW_ATTENDANCE_THRESHOLD | NEXT_CLASS_HORIZON_DAYS => serde_json::from_str::<Value>(raw.trim())
            .ok()
            .filter(Value::is_number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        _ => Value::String(raw.to_string()),
    }
}

/// Term dates load as a pair. An inverted pair drops both dates.
fn stored_term(start: Option<&Value>, end: Option<&Value>) -> (Option<NaiveDate>, Option<NaiveDate>) {
    let load = |v: Option<&Value>, field: &'static str| {
        let v = v?;
        parse_optional_date(v, field)
            .map_err(|e| warn!(key = field, error = %e, "ignoring malformed stored setting"))
            .ok()
            .flatten()
    };
    let start = load(start, GLOBAL_START_DATE);
    let end = load(end, GLOBAL_END_DATE);
    match (start, end) {
        (Some(s), Some(e)) if e < s => {
            warn!(start = %s, end = %e, "ignoring stored term dates: end is before start");
            (None, None)
        }
        pair => pair,
    }
}

fn parse_optional_date(v: &Value, field: &'static str) -> Result<Option<NaiveDate>, String> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => calendar::parse_date(field, s)
            .map(Some)
            .map_err(|e| e.to_string()),
        _ => Err(format!("{} must be a YYYY-MM-DD string or null", field)),
    }
}
