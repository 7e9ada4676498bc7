use crate::calc::{format_percentage, round_off_1_decimal, StudentReportRow};
use std::io::{Read, Write};

pub const CSV_HEADER: [&str; 6] = [
    "roster_code",
    "student_name",
    "present",
    "late",
    "absent",
    "attendance_percent",
];

pub fn write_report_csv<W: Write>(out: W, rows: &[StudentReportRow]) -> csv::Result<()> {
    let mut w = csv::Writer::from_writer(out);
    w.write_record(CSV_HEADER)?;
    for row in rows {
        w.write_record([
            row.roster_code.clone().unwrap_or_default(),
            row.name.clone(),
            row.present.to_string(),
            row.late.to_string(),
            row.absent.to_string(),
            format_percentage(row.percentage, 2),
        ])?;
    }
    w.flush()?;
    Ok(())
}

pub struct HtmlReport<'a> {
    pub title: &'a str,
    pub group_name: &'a str,
    pub subject: &'a str,
    pub period_label: &'a str,
    pub total_classes: usize,
    pub show_roster_code: bool,
    pub rows: &'a [StudentReportRow],
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Printable page the UI hands to its PDF printer.
pub fn render_report_html(report: &HtmlReport<'_>) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<style>\n\
         body { font-family: sans-serif; }\n\
         table { width: 100%; border-collapse: collapse; }\n\
         th, td { border: 1px solid #ccc; padding: 8px; text-align: left; }\n\
         thead { background-color: #f2f2f2; }\n\
         .low-attendance { background-color: #fffbeb; }\n\
         </style>\n</head>\n<body>\n",
    );
    html.push_str(&format!("<h1>{}</h1>\n", html_escape(report.title)));
    html.push_str(&format!(
        "<p>{} &middot; {} &middot; {} ({} classes)</p>\n",
        html_escape(report.group_name),
        html_escape(report.subject),
        html_escape(report.period_label),
        report.total_classes
    ));
    if report.total_classes == 0 {
        html.push_str("<p class=\"no-classes\">No classes in period</p>\n</body>\n</html>\n");
        return html;
    }
    html.push_str("<table>\n<thead>\n<tr>");
    if report.show_roster_code {
        html.push_str("<th>Roster code</th>");
    }
    html.push_str("<th>Student</th><th>Present</th><th>Late</th><th>Absent</th><th>% Attendance</th></tr>\n</thead>\n<tbody>\n");
    for row in report.rows {
        if row.low_attendance {
            html.push_str("<tr class=\"low-attendance\">");
        } else {
            html.push_str("<tr>");
        }
        if report.show_roster_code {
            html.push_str(&format!(
                "<td>{}</td>",
                html_escape(row.roster_code.as_deref().unwrap_or(""))
            ));
        }
        html.push_str(&format!(
            "<td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}%</td></tr>\n",
            html_escape(&row.name),
            row.present,
            row.late,
            row.absent,
            format_percentage(round_off_1_decimal(row.percentage), 1)
        ));
    }
    html.push_str("</tbody>\n</table>\n</body>\n</html>\n");
    html
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub roster_code: Option<String>,
    pub name: String,
}

fn entry(code: Option<&str>, name: &str) -> Option<RosterEntry> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(RosterEntry {
        roster_code: code.map(str::trim).filter(|c| !c.is_empty()).map(str::to_string),
        name: name.to_string(),
    })
}

/// Pasted roster text, one student per line: `name` or `code, name`.
/// A leading field counts as a code only when it is numeric, so "Perez, Ana" stays a name.
pub fn parse_roster_lines(text: &str) -> Vec<RosterEntry> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            match line.split_once(',') {
                Some((first, rest)) if is_numeric_code(first) => entry(Some(first), rest),
                _ => entry(None, line),
            }
        })
        .collect()
}

fn is_numeric_code(s: &str) -> bool {
    let t = s.trim();
    !t.is_empty() && t.chars().all(|c| c.is_ascii_digit())
}

fn is_header_name(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "name" | "student" | "student_name" | "nombre" | "alumno"
    )
}

/// Roster CSV: one column (`name`) or two (`code,name`). A header row is skipped.
pub fn parse_roster_csv<R: Read>(input: R) -> csv::Result<Vec<RosterEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);
    let mut out = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let parsed = match (record.get(0), record.get(1)) {
            (Some(code), Some(name)) => {
                if i == 0 && is_header_name(name) {
                    continue;
                }
                entry(Some(code), name)
            }
            (Some(name), None) => {
                if i == 0 && is_header_name(name) {
                    continue;
                }
                entry(None, name)
            }
            _ => None,
        };
        out.extend(parsed);
    }
    Ok(out)
}
