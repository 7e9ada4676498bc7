use crate::calc;
use crate::calendar::{self, Schedule};
use crate::db::{self, GroupRow};
use crate::ipc::helpers::{dates_json, load_settings, today_param, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use tracing::debug;

/// Groups whose schedule resolves. Groups with missing or malformed dates are left out.
fn scheduled_groups(conn: &Connection) -> Result<Vec<(GroupRow, Schedule)>, HandlerErr> {
    let settings = load_settings(conn)?;
    let groups = db::list_groups(conn).map_err(HandlerErr::query)?;
    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        match group.schedule(&settings) {
            Ok(Some(schedule)) => out.push((group, schedule)),
            Ok(None) => debug!(group_id = %group.id, "skipping group without term dates"),
            Err(e) => debug!(group_id = %group.id, error = %e, "skipping group with bad schedule"),
        }
    }
    Ok(out)
}

fn summary(group: &GroupRow) -> serde_json::Value {
    json!({
        "groupId": group.id,
        "name": group.name,
        "subject": group.subject
    })
}

fn meeting_on(groups: &[(GroupRow, Schedule)], day: NaiveDate) -> Vec<serde_json::Value> {
    groups
        .iter()
        .filter(|(_, s)| s.is_class_date(day))
        .map(|(g, _)| summary(g))
        .collect()
}

fn dashboard_overview(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = today_param(params)?;
    let horizon = load_settings(conn)?.next_class_horizon_days;
    let groups = scheduled_groups(conn)?;

    let todays = meeting_on(&groups, today);
    let tomorrow = today.succ_opt();
    let tomorrows = tomorrow.map(|d| meeting_on(&groups, d)).unwrap_or_default();

    // Only looked up when tomorrow is free.
    let next = if tomorrows.is_empty() {
        tomorrow.and_then(|t| {
            groups
                .iter()
                .filter_map(|(_, s)| calendar::next_class_day(s, t, horizon))
                .min()
        })
    } else {
        None
    };

    Ok(json!({
        "today": calendar::format_date(today),
        "todaysClasses": todays,
        "tomorrow": tomorrow.map(calendar::format_date),
        "tomorrowClasses": tomorrows,
        "nextClassDay": next.map(calendar::format_date),
        "nextClasses": next.map(|d| meeting_on(&groups, d)).unwrap_or_default(),
        "horizonDays": horizon
    }))
}

fn dashboard_pending(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = today_param(params)?;
    let mode = params.get("mode").and_then(|v| v.as_str()).unwrap_or("flag");
    if mode != "flag" && mode != "dates" {
        return Err(HandlerErr::bad_params("mode must be one of: flag, dates")
            .with_details(json!({ "mode": mode })));
    }

    let mut pending = Vec::new();
    for (group, schedule) in scheduled_groups(conn)? {
        if db::count_students(conn, &group.id).map_err(HandlerErr::query)? == 0 {
            continue;
        }
        let recorded = db::recorded_dates(conn, &group.id).map_err(HandlerErr::query)?;
        if mode == "flag" {
            if let Some(first) = calc::first_pending_date(&schedule, &recorded, today) {
                let mut v = summary(&group);
                v["firstPendingDate"] = json!(calendar::format_date(first));
                pending.push(v);
            }
        } else {
            let dates = calc::pending_dates(&schedule, &recorded, today);
            if !dates.is_empty() {
                let mut v = summary(&group);
                v["firstPendingDate"] = json!(calendar::format_date(dates[0]));
                v["pendingCount"] = json!(dates.len());
                v["pendingDates"] = dates_json(&dates);
                pending.push(v);
            }
        }
    }

    Ok(json!({
        "today": calendar::format_date(today),
        "mode": mode,
        "groups": pending
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.overview" => Some(with_conn(state, req, dashboard_overview)),
        "dashboard.pending" => Some(with_conn(state, req, dashboard_pending)),
        _ => None,
    }
}
