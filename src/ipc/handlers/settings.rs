use crate::db;
use crate::ipc::helpers::{load_settings, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::settings::AppSettings;
use rusqlite::Connection;
use serde_json::json;
use tracing::{info, warn};

fn settings_get(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({ "settings": load_settings(conn)?.to_json() }))
}

/// Groups on the global term that are valid now but would not be under `next`.
/// Groups that are already invalid do not block the patch.
fn conflicting_groups(
    conn: &Connection,
    current: &AppSettings,
    next: &AppSettings,
) -> Result<Vec<String>, HandlerErr> {
    if current.global_start_date == next.global_start_date
        && current.global_end_date == next.global_end_date
    {
        return Ok(Vec::new());
    }
    let groups = db::list_groups(conn).map_err(HandlerErr::query)?;
    Ok(groups
        .into_iter()
        .filter(|g| g.uses_global_dates())
        .filter(|g| g.validate(current).is_ok() && g.validate(next).is_err())
        .map(|g| g.id)
        .collect())
}

fn settings_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let current = load_settings(conn)?;
    let mut settings = current.clone();
    settings.merge_patch(patch).map_err(HandlerErr::bad_params)?;

    let conflicts = conflicting_groups(conn, &current, &settings)?;
    if !conflicts.is_empty() {
        warn!(groups = conflicts.len(), "term dates rejected: partial end dates fall outside");
        return Err(HandlerErr::bad_params(
            "new term dates put the partial end date of some groups outside their term",
        )
        .with_details(json!({ "groupIds": conflicts })));
    }

    settings
        .save(conn)
        .map_err(|e| HandlerErr::update(format!("{e:#}"), "settings"))?;
    info!(keys = ?patch.keys().collect::<Vec<_>>(), "settings updated");
    Ok(json!({ "settings": settings.to_json() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(with_conn(state, req, settings_get)),
        "settings.update" => Some(with_conn(state, req, settings_update)),
        _ => None,
    }
}
