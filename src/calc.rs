use crate::calendar::Schedule;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

pub const DEFAULT_LOW_ATTENDANCE_THRESHOLD: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Present,
    Late,
    Absent,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Present => "present",
            Status::Late => "late",
            Status::Absent => "absent",
        }
    }

    /// Accepts the stored names plus the short and Spanish forms older UIs send.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" | "presente" | "p" => Some(Status::Present),
            "late" | "retardo" | "l" | "r" => Some(Status::Late),
            "absent" | "ausente" | "a" => Some(Status::Absent),
            _ => None,
        }
    }
}

/// What a class date without any record counts as in a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnsetPolicy {
    #[default]
    Absent,
    Present,
}

impl UnsetPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            UnsetPolicy::Absent => "absent",
            UnsetPolicy::Present => "present",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "absent" => Some(UnsetPolicy::Absent),
            "present" => Some(UnsetPolicy::Present),
            _ => None,
        }
    }

    fn status(self) -> Status {
        match self {
            UnsetPolicy::Absent => Status::Absent,
            UnsetPolicy::Present => Status::Present,
        }
    }
}

/// How the attendance grid shows an unset cell. Never used by reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GridDefault {
    #[default]
    Pending,
    /// Unset cells dated today or later show as present; past ones stay pending.
    Present,
}

impl GridDefault {
    pub fn as_str(self) -> &'static str {
        match self {
            GridDefault::Pending => "pending",
            GridDefault::Present => "present",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(GridDefault::Pending),
            "present" => Some(GridDefault::Present),
            _ => None,
        }
    }

    /// `None` means the cell renders as pending.
    pub fn display(self, recorded: Option<Status>, date: NaiveDate, today: NaiveDate) -> Option<Status> {
        match (recorded, self) {
            (Some(s), _) => Some(s),
            (None, GridDefault::Present) if date >= today => Some(Status::Present),
            (None, _) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub roster_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub date: NaiveDate,
    pub status: Status,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportOptions {
    pub unset: UnsetPolicy,
    pub low_threshold: f64,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            unset: UnsetPolicy::Absent,
            low_threshold: DEFAULT_LOW_ATTENDANCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReportRow {
    pub student_id: String,
    pub roster_code: Option<String>,
    pub name: String,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
    pub total: usize,
    /// Unrounded; format with [`format_percentage`].
    pub percentage: f64,
    pub low_attendance: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeriodReport {
    NoClasses,
    Rows {
        total_classes: usize,
        rows: Vec<StudentReportRow>,
    },
}

impl PeriodReport {
    pub fn rows(&self) -> &[StudentReportRow] {
        match self {
            PeriodReport::NoClasses => &[],
            PeriodReport::Rows { rows, .. } => rows,
        }
    }
}

/// `Int(10*x + 0.5) / 10`, the rounding used for on-screen percentages.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

pub fn format_percentage(x: f64, decimals: usize) -> String {
    format!("{:.*}", decimals, x)
}

pub fn is_low_attendance(percentage: f64, threshold: f64) -> bool {
    percentage <= threshold
}

fn compare_names(a: &StudentReportRow, b: &StudentReportRow) -> Ordering {
    a.name
        .as_bytes()
        .cmp(b.name.as_bytes())
        .then_with(|| a.student_id.cmp(&b.student_id))
}

pub fn aggregate(
    students: &[Student],
    occurrences: &[NaiveDate],
    records: &[AttendanceRecord],
    opts: &ReportOptions,
) -> PeriodReport {
    let in_period: HashSet<NaiveDate> = occurrences.iter().copied().collect();
    let total = in_period.len();
    if total == 0 {
        return PeriodReport::NoClasses;
    }

    let mut by_cell: HashMap<(&str, NaiveDate), Status> = HashMap::new();
    for r in records {
        if in_period.contains(&r.date) {
            by_cell.insert((r.student_id.as_str(), r.date), r.status);
        }
    }

    let mut rows: Vec<StudentReportRow> = students
        .iter()
        .map(|s| {
            let mut present = 0usize;
            let mut late = 0usize;
            let mut absent = 0usize;
            for date in &in_period {
                let status = by_cell
                    .get(&(s.id.as_str(), *date))
                    .copied()
                    .unwrap_or_else(|| opts.unset.status());
                match status {
                    Status::Present => present += 1,
                    Status::Late => late += 1,
                    Status::Absent => absent += 1,
                }
            }
            let percentage = 100.0 * ((present + late) as f64) / (total as f64);
            StudentReportRow {
                student_id: s.id.clone(),
                roster_code: s.roster_code.clone(),
                name: s.name.clone(),
                present,
                late,
                absent,
                total,
                percentage,
                low_attendance: is_low_attendance(percentage, opts.low_threshold),
            }
        })
        .collect();
    rows.sort_by(compare_names);

    PeriodReport::Rows {
        total_classes: total,
        rows,
    }
}

/// Earliest past class date with no record for any student of the group.
pub fn first_pending_date(
    schedule: &Schedule,
    recorded_dates: &HashSet<NaiveDate>,
    today: NaiveDate,
) -> Option<NaiveDate> {
    schedule
        .past_occurrences_iter(today)
        .find(|d| !recorded_dates.contains(d))
}

pub fn pending_dates(
    schedule: &Schedule,
    recorded_dates: &HashSet<NaiveDate>,
    today: NaiveDate,
) -> Vec<NaiveDate> {
    let mut dates = schedule.past_occurrences(today);
    dates.retain(|d| !recorded_dates.contains(d));
    dates
}
