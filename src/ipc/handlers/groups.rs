use crate::calendar::{self, WeekdaySet};
use crate::db::{self, GroupRow};
use crate::ipc::helpers::{
    dates_json, group_json, load_settings, parse_period, require_group, require_schedule,
    required_str, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

/// `classDays` may be an array (`[1, 3]`, `["L", "X"]`) or a string (`"1,3"`, `"LX"`).
fn parse_class_days(v: &serde_json::Value) -> Result<WeekdaySet, HandlerErr> {
    let joined = match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    serde_json::Value::Number(n) => parts.push(n.to_string()),
                    serde_json::Value::String(s) => parts.push(s.clone()),
                    _ => {
                        return Err(HandlerErr::bad_params(
                            "classDays entries must be numbers or day letters",
                        ))
                    }
                }
            }
            parts.join(",")
        }
        _ => return Err(HandlerErr::bad_params("classDays must be an array or string")),
    };
    Ok(WeekdaySet::parse(&joined)?)
}

/// Normalise an optional date field for storage; `null`/blank clears it.
fn date_field(v: &serde_json::Value, key: &'static str) -> Result<Option<String>, HandlerErr> {
    match v {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(None),
        serde_json::Value::String(s) => {
            Ok(Some(calendar::format_date(calendar::parse_date(key, s)?)))
        }
        _ => Err(HandlerErr::bad_params(format!("{} must be a date string or null", key))),
    }
}

fn validate_group(conn: &Connection, group: &GroupRow) -> Result<(), HandlerErr> {
    if group.name.trim().is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let settings = load_settings(conn)?;
    Ok(group.validate(&settings)?)
}

fn apply_fields(group: &mut GroupRow, fields: &serde_json::Map<String, serde_json::Value>) -> Result<(), HandlerErr> {
    for (k, v) in fields {
        match k.as_str() {
            "name" => {
                group.name = v
                    .as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| HandlerErr::bad_params("name must be a string"))?;
            }
            "subject" => {
                group.subject = match v {
                    serde_json::Value::Null => String::new(),
                    serde_json::Value::String(s) => s.trim().to_string(),
                    _ => return Err(HandlerErr::bad_params("subject must be a string")),
                };
            }
            "classDays" => group.class_days = parse_class_days(v)?.to_index_string(),
            "startDate" => group.start_date = date_field(v, "startDate")?,
            "endDate" => group.end_date = date_field(v, "endDate")?,
            "partial1EndDate" => group.partial1_end_date = date_field(v, "partial1EndDate")?,
            _ => {
                return Err(HandlerErr::bad_params(format!("unknown group field: {}", k)));
            }
        }
    }
    Ok(())
}

fn groups_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let groups = db::list_groups(conn).map_err(HandlerErr::query)?;
    let mut out = Vec::with_capacity(groups.len());
    for g in &groups {
        let count = db::count_students(conn, &g.id).map_err(HandlerErr::query)?;
        out.push(group_json(g, count));
    }
    Ok(json!({ "groups": out }))
}

fn groups_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = required_str(params, "groupId")?;
    let group = require_group(conn, &group_id)?;
    let count = db::count_students(conn, &group.id).map_err(HandlerErr::query)?;
    Ok(json!({ "group": group_json(&group, count) }))
}

fn groups_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(fields) = params.as_object() else {
        return Err(HandlerErr::bad_params("params must be an object"));
    };
    if !fields.contains_key("name") {
        return Err(HandlerErr::bad_params("missing name"));
    }
    if !fields.contains_key("classDays") {
        return Err(HandlerErr::bad_params("missing classDays"));
    }
    let mut group = GroupRow {
        id: Uuid::new_v4().to_string(),
        name: String::new(),
        subject: String::new(),
        class_days: String::new(),
        start_date: None,
        end_date: None,
        partial1_end_date: None,
    };
    apply_fields(&mut group, fields)?;
    validate_group(conn, &group)?;

    conn.execute(
        "INSERT INTO groups(id, name, subject, class_days, start_date, end_date, partial1_end_date)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &group.id,
            &group.name,
            &group.subject,
            &group.class_days,
            &group.start_date,
            &group.end_date,
            &group.partial1_end_date,
        ),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "groups" })))?;
    info!(group_id = %group.id, name = %group.name, "group created");

    Ok(json!({ "groupId": group.id, "group": group_json(&group, 0) }))
}

fn groups_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = required_str(params, "groupId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let confirmed = params
        .get("confirmScheduleChange")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let current = require_group(conn, &group_id)?;
    let mut next = current.clone();
    apply_fields(&mut next, patch)?;
    validate_group(conn, &next)?;

    let old_days = current.weekdays().unwrap_or_default();
    let new_days = next.weekdays()?;
    let stale = if old_days != new_days {
        db::off_schedule_records(conn, &group_id, new_days).map_err(HandlerErr::query)?
    } else {
        Vec::new()
    };
    if !stale.is_empty() && !confirmed {
        return Err(HandlerErr::new(
            "confirm_required",
            "changing class days removes attendance recorded on days no longer scheduled",
        )
        .with_details(json!({ "recordsToRemove": stale.len() })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (student_id, date) in &stale {
        tx.execute(
            "DELETE FROM attendance WHERE student_id = ? AND date = ?",
            (student_id, date),
        )
        .map_err(|e| HandlerErr::update(e, "attendance"))?;
    }
    tx.execute(
        "UPDATE groups
         SET name = ?, subject = ?, class_days = ?, start_date = ?, end_date = ?, partial1_end_date = ?
         WHERE id = ?",
        (
            &next.name,
            &next.subject,
            &next.class_days,
            &next.start_date,
            &next.end_date,
            &next.partial1_end_date,
            &group_id,
        ),
    )
    .map_err(|e| HandlerErr::update(e, "groups"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    if !stale.is_empty() {
        info!(%group_id, removed = stale.len(), "class days changed; removed off-schedule attendance");
    }
    let count = db::count_students(conn, &group_id).map_err(HandlerErr::query)?;
    Ok(json!({
        "group": group_json(&next, count),
        "attendanceRemoved": stale.len()
    }))
}

fn groups_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = required_str(params, "groupId")?;
    require_group(conn, &group_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Explicit dependency order: attendance -> students -> group.
    let attendance_removed = tx
        .execute(
            "DELETE FROM attendance
             WHERE student_id IN (SELECT id FROM students WHERE group_id = ?)",
            [&group_id],
        )
        .map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string()).with_details(json!({ "table": "attendance" }))
        })?;
    let students_removed = tx
        .execute("DELETE FROM students WHERE group_id = ?", [&group_id])
        .map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string()).with_details(json!({ "table": "students" }))
        })?;
    tx.execute("DELETE FROM groups WHERE id = ?", [&group_id])
        .map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string()).with_details(json!({ "table": "groups" }))
        })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    info!(%group_id, students_removed, attendance_removed, "group deleted");
    Ok(json!({
        "ok": true,
        "studentsRemoved": students_removed,
        "attendanceRemoved": attendance_removed
    }))
}

fn groups_class_dates(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = required_str(params, "groupId")?;
    let group = require_group(conn, &group_id)?;
    let settings = load_settings(conn)?;
    let schedule = require_schedule(&group, &settings)?;
    let period = parse_period(params)?;
    let dates = period.resolve(&schedule);
    Ok(json!({
        "groupId": group.id,
        "period": period.as_str(),
        "startDate": calendar::format_date(schedule.start),
        "endDate": calendar::format_date(schedule.end),
        "partial1EndDate": schedule.split.map(calendar::format_date),
        "dates": dates_json(&dates)
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "groups.list" => Some(with_conn(state, req, groups_list)),
        "groups.get" => Some(with_conn(state, req, groups_get)),
        "groups.create" => Some(with_conn(state, req, groups_create)),
        "groups.update" => Some(with_conn(state, req, groups_update)),
        "groups.delete" => Some(with_conn(state, req, groups_delete)),
        "groups.classDates" => Some(with_conn(state, req, groups_class_dates)),
        _ => None,
    }
}
