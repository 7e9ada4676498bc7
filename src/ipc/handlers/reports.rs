use crate::calc::{self, format_percentage, round_off_1_decimal, PeriodReport};
use crate::calendar::{self, Period};
use crate::db::{self, GroupRow};
use crate::export::{self, HtmlReport};
use crate::ipc::helpers::{
    load_settings, parse_period, require_group, require_schedule, required_str, with_conn,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::settings::AppSettings;
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

struct BuiltReport {
    group: GroupRow,
    settings: AppSettings,
    period: Period,
    report: PeriodReport,
}

fn build_report(conn: &Connection, params: &serde_json::Value) -> Result<BuiltReport, HandlerErr> {
    let group_id = required_str(params, "groupId")?;
    let group = require_group(conn, &group_id)?;
    let settings = load_settings(conn)?;
    let schedule = require_schedule(&group, &settings)?;
    let period = parse_period(params)?;

    let occurrences = period.resolve(&schedule);
    let students = db::load_students(conn, &group_id).map_err(HandlerErr::query)?;
    let records = db::load_records(conn, &group_id).map_err(HandlerErr::query)?;
    let report = calc::aggregate(&students, &occurrences, &records, &settings.report_options());
    Ok(BuiltReport {
        group,
        settings,
        period,
        report,
    })
}

fn period_label(period: &Period) -> String {
    match period {
        Period::Full => "Full term".to_string(),
        Period::FirstPartial => "First partial".to_string(),
        Period::SecondPartial => "Second partial".to_string(),
        Period::Custom { from, to } => format!(
            "{} to {}",
            calendar::format_date(*from),
            calendar::format_date(*to)
        ),
    }
}

fn total_classes(report: &PeriodReport) -> usize {
    match report {
        PeriodReport::NoClasses => 0,
        PeriodReport::Rows { total_classes, .. } => *total_classes,
    }
}

fn write_output(out_path: &str, bytes: &[u8]) -> Result<(), HandlerErr> {
    let io_err = |e: std::io::Error| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
    };
    let out = PathBuf::from(out_path);
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(&out, bytes).map_err(io_err)
}

fn reports_period(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let built = build_report(conn, params)?;
    let rows: Vec<serde_json::Value> = built
        .report
        .rows()
        .iter()
        .map(|row| {
            let mut v = json!(row);
            v["percentageDisplay"] = json!(format_percentage(round_off_1_decimal(row.percentage), 1));
            v
        })
        .collect();
    Ok(json!({
        "groupId": built.group.id,
        "period": built.period.as_str(),
        "periodLabel": period_label(&built.period),
        "noClasses": matches!(built.report, PeriodReport::NoClasses),
        "totalClasses": total_classes(&built.report),
        "showRosterCode": built.settings.show_roster_code,
        "lowAttendanceThreshold": built.settings.low_attendance_threshold,
        "rows": rows
    }))
}

fn reports_export_csv(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let out_path = required_str(params, "outPath")?;
    let built = build_report(conn, params)?;
    let rows = built.report.rows();

    let mut buf = Vec::new();
    export::write_report_csv(&mut buf, rows)
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path })))?;
    write_output(&out_path, &buf)?;

    info!(group_id = %built.group.id, path = %out_path, rows = rows.len(), "report csv written");
    Ok(json!({
        "ok": true,
        "rowsExported": rows.len(),
        "noClasses": matches!(built.report, PeriodReport::NoClasses),
        "path": out_path
    }))
}

fn reports_export_html(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let out_path = required_str(params, "outPath")?;
    let built = build_report(conn, params)?;
    let label = period_label(&built.period);
    let title = params
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("Attendance report");

    let html = export::render_report_html(&HtmlReport {
        title,
        group_name: &built.group.name,
        subject: &built.group.subject,
        period_label: &label,
        total_classes: total_classes(&built.report),
        show_roster_code: built.settings.show_roster_code,
        rows: built.report.rows(),
    });
    write_output(&out_path, html.as_bytes())?;

    info!(group_id = %built.group.id, path = %out_path, "report html written");
    Ok(json!({
        "ok": true,
        "rowsExported": built.report.rows().len(),
        "noClasses": matches!(built.report, PeriodReport::NoClasses),
        "path": out_path
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.period" => Some(with_conn(state, req, reports_period)),
        "reports.exportCsv" => Some(with_conn(state, req, reports_export_csv)),
        "reports.exportHtml" => Some(with_conn(state, req, reports_export_html)),
        _ => None,
    }
}
