use crate::calc::Status;
use crate::calendar;
use crate::db;
use crate::ipc::helpers::{
    dates_json, load_settings, now_stamp, parse_period, require_group, require_schedule,
    required_date, required_str, today_param, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, NaiveDate};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

/// `null` clears the cell; anything else must name a status.
fn parse_status_param(params: &serde_json::Value) -> Result<Option<Status>, HandlerErr> {
    match params.get("status") {
        None => Err(HandlerErr::bad_params("missing status")),
        Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Status::parse(s).map(Some).ok_or_else(|| {
            HandlerErr::bad_params("status must be one of: present, late, absent, or null")
                .with_details(json!({ "status": s }))
        }),
        Some(_) => Err(HandlerErr::bad_params("status must be a string or null")),
    }
}

fn write_cell(
    conn: &Connection,
    student_id: &str,
    date: NaiveDate,
    status: Option<Status>,
    stamp: &str,
) -> Result<(), HandlerErr> {
    match status {
        Some(status) => db::upsert_attendance(conn, student_id, date, status, stamp)
            .map_err(|e| HandlerErr::update(e, "attendance")),
        None => db::clear_attendance(conn, student_id, date)
            .map(|_| ())
            .map_err(|e| HandlerErr::update(e, "attendance")),
    }
}

fn attendance_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = required_str(params, "groupId")?;
    let today = today_param(params)?;
    let group = require_group(conn, &group_id)?;
    let settings = load_settings(conn)?;
    let schedule = require_schedule(&group, &settings)?;
    let period = parse_period(params)?;

    let dates = period.resolve(&schedule);
    let parts = calendar::split(&dates, schedule.split);
    let students = db::load_students(conn, &group_id).map_err(HandlerErr::query)?;
    let records = db::load_records(conn, &group_id).map_err(HandlerErr::query)?;
    let by_cell: HashMap<(&str, NaiveDate), Status> = records
        .iter()
        .map(|r| ((r.student_id.as_str(), r.date), r.status))
        .collect();

    let grid = settings.grid_unset_display;
    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let cells: Vec<serde_json::Value> = dates
                .iter()
                .map(|d| {
                    let recorded = by_cell.get(&(s.id.as_str(), *d)).copied();
                    let display = grid.display(recorded, *d, today);
                    json!({
                        "date": calendar::format_date(*d),
                        "status": recorded.map(Status::as_str),
                        "displayStatus": display.map(Status::as_str).unwrap_or("pending")
                    })
                })
                .collect();
            json!({
                "id": s.id,
                "name": s.name,
                "rosterCode": s.roster_code,
                "cells": cells
            })
        })
        .collect();

    Ok(json!({
        "groupId": group.id,
        "groupName": group.name,
        "period": period.as_str(),
        "today": calendar::format_date(today),
        "dates": dates_json(&dates),
        "partial1Dates": dates_json(&parts.before),
        "partial2Dates": dates_json(&parts.after),
        "splitIndex": schedule.split.map(|_| parts.before.len()),
        "showRosterCode": settings.show_roster_code,
        "gridUnsetDisplay": grid.as_str(),
        "students": rows
    }))
}

fn attendance_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = required_str(params, "groupId")?;
    let student_id = required_str(params, "studentId")?;
    let date = required_date(params, "date")?;
    let status = parse_status_param(params)?;

    let group = require_group(conn, &group_id)?;
    if !db::student_in_group(conn, &group_id, &student_id).map_err(HandlerErr::query)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    let on_schedule = group
        .weekdays()
        .map(|w| w.contains(date.weekday()))
        .unwrap_or(false);
    if !on_schedule {
        debug!(%group_id, date = %calendar::format_date(date), "attendance recorded off schedule");
    }

    write_cell(conn, &student_id, date, status, &now_stamp())?;
    Ok(json!({
        "ok": true,
        "status": status.map(Status::as_str)
    }))
}

fn attendance_bulk_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = required_str(params, "groupId")?;
    let date = required_date(params, "date")?;
    let status = parse_status_param(params)?;
    require_group(conn, &group_id)?;

    // Without studentIds the whole roster is stamped.
    let student_ids: Vec<String> = match params.get("studentIds") {
        None | Some(serde_json::Value::Null) => db::load_students(conn, &group_id)
            .map_err(HandlerErr::query)?
            .into_iter()
            .map(|s| s.id)
            .collect(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        Some(_) => return Err(HandlerErr::bad_params("studentIds must be an array")),
    };

    let stamp = now_stamp();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut updated = 0usize;
    for student_id in &student_ids {
        if !db::student_in_group(&tx, &group_id, student_id).map_err(HandlerErr::query)? {
            continue;
        }
        write_cell(&tx, student_id, date, status, &stamp)?;
        updated += 1;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    debug!(%group_id, date = %calendar::format_date(date), updated, "attendance stamped");
    Ok(json!({ "ok": true, "updated": updated }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.open" => Some(with_conn(state, req, attendance_open)),
        "attendance.set" => Some(with_conn(state, req, attendance_set)),
        "attendance.bulkSet" => Some(with_conn(state, req, attendance_bulk_set)),
        _ => None,
    }
}
