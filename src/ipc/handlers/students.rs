use crate::db;
use crate::export::{self, RosterEntry};
use crate::ipc::helpers::{optional_str, require_group, required_str, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

fn student_json(s: &crate::calc::Student) -> serde_json::Value {
    json!({
        "id": s.id,
        "name": s.name,
        "rosterCode": s.roster_code
    })
}

fn require_student(conn: &Connection, group_id: &str, student_id: &str) -> Result<(), HandlerErr> {
    if db::student_in_group(conn, group_id, student_id).map_err(HandlerErr::query)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found("student not found"))
    }
}

fn insert_entries(
    conn: &Connection,
    group_id: &str,
    entries: &[RosterEntry],
) -> Result<Vec<String>, HandlerErr> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut ids = Vec::with_capacity(entries.len());
    for entry in entries {
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO students(id, group_id, name, roster_code) VALUES(?, ?, ?, ?)",
            (&id, group_id, &entry.name, &entry.roster_code),
        )
        .map_err(|e| {
            HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "students" }))
        })?;
        ids.push(id);
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(ids)
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = required_str(params, "groupId")?;
    require_group(conn, &group_id)?;
    let students = db::load_students(conn, &group_id).map_err(HandlerErr::query)?;
    Ok(json!({
        "students": students.iter().map(student_json).collect::<Vec<_>>()
    }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = required_str(params, "groupId")?;
    let name = required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    require_group(conn, &group_id)?;
    let entry = RosterEntry {
        roster_code: optional_str(params, "rosterCode"),
        name,
    };
    let ids = insert_entries(conn, &group_id, std::slice::from_ref(&entry))?;
    Ok(json!({ "studentId": ids.first() }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = required_str(params, "groupId")?;
    let student_id = required_str(params, "studentId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let current: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT name, roster_code FROM students WHERE id = ? AND group_id = ?",
            (&student_id, &group_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((mut name, mut roster_code)) = current else {
        return Err(HandlerErr::not_found("student not found"));
    };

    for (k, v) in patch {
        match k.as_str() {
            "name" => {
                let next = v
                    .as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| HandlerErr::bad_params("name must be a string"))?;
                if next.is_empty() {
                    return Err(HandlerErr::bad_params("name must not be empty"));
                }
                name = next;
            }
            "rosterCode" => {
                roster_code = match v {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => {
                        Some(s.trim().to_string()).filter(|s| !s.is_empty())
                    }
                    _ => return Err(HandlerErr::bad_params("rosterCode must be a string or null")),
                };
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown student field: {}", k))),
        }
    }

    conn.execute(
        "UPDATE students SET name = ?, roster_code = ? WHERE id = ?",
        (&name, &roster_code, &student_id),
    )
    .map_err(|e| HandlerErr::update(e, "students"))?;
    Ok(json!({ "ok": true }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = required_str(params, "groupId")?;
    let student_id = required_str(params, "studentId")?;
    require_student(conn, &group_id, &student_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let attendance_removed = tx
        .execute("DELETE FROM attendance WHERE student_id = ?", [&student_id])
        .map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": "attendance" }))
        })?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": "students" }))
        })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    info!(%group_id, %student_id, attendance_removed, "student deleted");
    Ok(json!({ "ok": true, "attendanceRemoved": attendance_removed }))
}

fn students_bulk_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = required_str(params, "groupId")?;
    let text = required_str(params, "text")?;
    require_group(conn, &group_id)?;
    let entries = export::parse_roster_lines(&text);
    if entries.is_empty() {
        return Err(HandlerErr::bad_params("no student names found"));
    }
    let ids = insert_entries(conn, &group_id, &entries)?;
    info!(%group_id, created = ids.len(), "students added from text");
    Ok(json!({ "created": ids.len(), "studentIds": ids }))
}

fn students_import_csv(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = required_str(params, "groupId")?;
    let in_path = PathBuf::from(required_str(params, "inPath")?);
    require_group(conn, &group_id)?;

    let file = std::fs::File::open(&in_path).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string())
            .with_details(json!({ "path": in_path.to_string_lossy() }))
    })?;
    let entries = export::parse_roster_csv(file).map_err(|e| {
        HandlerErr::new("bad_params", format!("invalid roster csv: {}", e))
            .with_details(json!({ "path": in_path.to_string_lossy() }))
    })?;
    let ids = insert_entries(conn, &group_id, &entries)?;
    info!(%group_id, path = %in_path.to_string_lossy(), created = ids.len(), "roster csv imported");
    Ok(json!({ "created": ids.len(), "studentIds": ids }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        "students.bulkCreate" => Some(with_conn(state, req, students_bulk_create)),
        "students.importCsv" => Some(with_conn(state, req, students_import_csv)),
        _ => None,
    }
}
