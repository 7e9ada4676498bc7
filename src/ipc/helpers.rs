use crate::calendar::{self, Period, Schedule, ScheduleError};
use crate::db::{self, GroupRow};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::settings::AppSettings;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn query(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn update(e: impl std::fmt::Display, table: &str) -> Self {
        Self::new("db_update_failed", e.to_string()).with_details(json!({ "table": table }))
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<ScheduleError> for HandlerErr {
    fn from(e: ScheduleError) -> Self {
        HandlerErr::bad_params(e.to_string())
    }
}

/// Run a handler body against the open workspace and wrap the result in the envelope.
pub fn with_conn<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Trimmed string param; blank and null both read as `None`.
pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_date(params: &serde_json::Value, key: &'static str) -> Result<NaiveDate, HandlerErr> {
    let raw = required_str(params, key)?;
    Ok(calendar::parse_date(key, &raw)?)
}

pub fn optional_date(
    params: &serde_json::Value,
    key: &'static str,
) -> Result<Option<NaiveDate>, HandlerErr> {
    match optional_str(params, key) {
        Some(raw) => Ok(Some(calendar::parse_date(key, &raw)?)),
        None => Ok(None),
    }
}

/// `params.today` when given, otherwise the local calendar date.
pub fn today_param(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    Ok(optional_date(params, "today")?.unwrap_or_else(|| chrono::Local::now().date_naive()))
}

pub fn now_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub fn load_settings(conn: &Connection) -> Result<AppSettings, HandlerErr> {
    AppSettings::load(conn).map_err(HandlerErr::query)
}

pub fn require_group(conn: &Connection, group_id: &str) -> Result<GroupRow, HandlerErr> {
    db::load_group(conn, group_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("group not found"))
}

/// Stored schedule data is re-validated here; a bad row is reported, not coerced.
pub fn require_schedule(group: &GroupRow, settings: &AppSettings) -> Result<Schedule, HandlerErr> {
    let schedule = group.schedule(settings).map_err(|e| {
        HandlerErr::new("bad_data", e.to_string()).with_details(json!({ "groupId": group.id }))
    })?;
    schedule.ok_or_else(|| {
        HandlerErr::new(
            "schedule_incomplete",
            "group has no start/end dates and no global term dates are set",
        )
        .with_details(json!({ "groupId": group.id }))
    })
}

pub fn parse_period(params: &serde_json::Value) -> Result<Period, HandlerErr> {
    match params.get("period").and_then(|v| v.as_str()).unwrap_or("full") {
        "full" => Ok(Period::Full),
        "partial1" => Ok(Period::FirstPartial),
        "partial2" => Ok(Period::SecondPartial),
        "custom" => {
            let from = required_date(params, "from")?;
            let to = required_date(params, "to")?;
            if to < from {
                return Err(ScheduleError::Inverted {
                    earlier: "from",
                    later: "to",
                }
                .into());
            }
            Ok(Period::Custom { from, to })
        }
        other => Err(HandlerErr::bad_params(
            "period must be one of: full, partial1, partial2, custom",
        )
        .with_details(json!({ "period": other }))),
    }
}

pub fn dates_json(dates: &[NaiveDate]) -> serde_json::Value {
    json!(dates.iter().copied().map(calendar::format_date).collect::<Vec<_>>())
}

pub fn group_json(group: &GroupRow, student_count: i64) -> serde_json::Value {
    let weekdays = group.weekdays().unwrap_or_default();
    json!({
        "id": group.id,
        "name": group.name,
        "subject": group.subject,
        "classDays": weekdays.indices(),
        "classDayLetters": weekdays.to_letters(),
        "startDate": group.start_date,
        "endDate": group.end_date,
        "partial1EndDate": group.partial1_end_date,
        "studentCount": student_count
    })
}
