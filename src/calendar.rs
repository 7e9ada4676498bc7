use chrono::{Datelike, Days, NaiveDate, Weekday};
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_HORIZON_DAYS: u32 = 365;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("unknown weekday code: {0:?}")]
    UnknownWeekday(String),
    #[error("class days must not be empty")]
    NoClassDays,
    #[error("{field} must be a YYYY-MM-DD date, got {value:?}")]
    BadDate { field: &'static str, value: String },
    #[error("{later} must not be before {earlier}")]
    Inverted {
        earlier: &'static str,
        later: &'static str,
    },
    #[error("partial end date must fall between the term start and end dates")]
    SplitOutsideTerm,
}

pub fn parse_date(field: &'static str, raw: &str) -> Result<NaiveDate, ScheduleError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| ScheduleError::BadDate {
        field,
        value: raw.to_string(),
    })
}

pub fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

/// Weekday numbering used on the wire and in storage: 0=Sunday .. 6=Saturday.
pub fn weekday_index(day: Weekday) -> u8 {
    day.num_days_from_sunday() as u8
}

pub fn weekday_from_index(idx: u8) -> Option<Weekday> {
    match idx {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

/// Single-letter day codes: D L M X J V S (domingo .. sábado).
pub fn weekday_from_letter(c: char) -> Option<Weekday> {
    match c.to_ascii_uppercase() {
        'D' => Some(Weekday::Sun),
        'L' => Some(Weekday::Mon),
        'M' => Some(Weekday::Tue),
        'X' => Some(Weekday::Wed),
        'J' => Some(Weekday::Thu),
        'V' => Some(Weekday::Fri),
        'S' => Some(Weekday::Sat),
        _ => None,
    }
}

pub fn weekday_letter(day: Weekday) -> char {
    match day {
        Weekday::Sun => 'D',
        Weekday::Mon => 'L',
        Weekday::Tue => 'M',
        Weekday::Wed => 'X',
        Weekday::Thu => 'J',
        Weekday::Fri => 'V',
        Weekday::Sat => 'S',
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << weekday_index(day);
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << weekday_index(day)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Scheduled days in Sunday..Saturday order.
    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        (0u8..7)
            .filter_map(weekday_from_index)
            .filter(|d| self.contains(*d))
    }

    pub fn indices(&self) -> Vec<u8> {
        self.iter().map(weekday_index).collect()
    }

    /// Storage form, e.g. "1,3".
    pub fn to_index_string(&self) -> String {
        self.indices()
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn to_letters(&self) -> String {
        self.iter().map(weekday_letter).collect()
    }

    /// Accepts numeric indices ("1,3"), letter codes ("L,X" or "LX"), or a mix.
    /// Empty input yields an empty set; callers decide whether that is allowed.
    pub fn parse(raw: &str) -> Result<Self, ScheduleError> {
        let mut set = Self::empty();
        for token in raw
            .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            if let Ok(idx) = token.parse::<u8>() {
                let day = weekday_from_index(idx)
                    .ok_or_else(|| ScheduleError::UnknownWeekday(token.to_string()))?;
                set.insert(day);
                continue;
            }
            for c in token.chars() {
                let day = weekday_from_letter(c)
                    .ok_or_else(|| ScheduleError::UnknownWeekday(token.to_string()))?;
                set.insert(day);
            }
        }
        Ok(set)
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = Self::empty();
        for day in iter {
            set.insert(day);
        }
        set
    }
}

/// Every date in `[start, end]` whose weekday is scheduled, ascending.
/// An inverted range or an empty weekday set means "no classes".
pub fn expand(weekdays: WeekdaySet, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    expand_iter(weekdays, start, end).collect()
}

/// Lazy form of [`expand`] for callers that stop at the first match.
pub fn expand_iter(
    weekdays: WeekdaySet,
    start: NaiveDate,
    end: NaiveDate,
) -> impl Iterator<Item = NaiveDate> {
    let live = !weekdays.is_empty() && start <= end;
    start
        .iter_days()
        .take_while(move |d| live && *d <= end)
        .filter(move |d| weekdays.contains(d.weekday()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitDates {
    pub before: Vec<NaiveDate>,
    pub after: Vec<NaiveDate>,
}

/// Partition at `split_point`; a date equal to the split point stays in `before`.
pub fn split(occurrences: &[NaiveDate], split_point: Option<NaiveDate>) -> SplitDates {
    let Some(p) = split_point else {
        return SplitDates {
            before: occurrences.to_vec(),
            after: Vec::new(),
        };
    };
    let (before, after) = occurrences.iter().copied().partition(|d| *d <= p);
    SplitDates { before, after }
}

pub fn windowed(occurrences: &[NaiveDate], from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    occurrences
        .iter()
        .copied()
        .filter(|d| *d >= from && *d <= to)
        .collect()
}

/// A group's schedule after the date window has been resolved (group dates or the
/// global term dates).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub weekdays: WeekdaySet,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub split: Option<NaiveDate>,
}

impl Schedule {
    pub fn occurrences(&self) -> Vec<NaiveDate> {
        expand(self.weekdays, self.start, self.end)
    }

    pub fn is_class_date(&self, day: NaiveDate) -> bool {
        !windowed(&expand(self.weekdays, day, day), self.start, self.end).is_empty()
    }

    pub fn split_occurrences(&self) -> SplitDates {
        split(&self.occurrences(), self.split)
    }

    /// Class dates strictly before `today`.
    pub fn past_occurrences(&self, today: NaiveDate) -> Vec<NaiveDate> {
        self.past_occurrences_iter(today).collect()
    }

    pub fn past_occurrences_iter(&self, today: NaiveDate) -> impl Iterator<Item = NaiveDate> {
        expand_iter(self.weekdays, self.start, self.end).take_while(move |d| *d < today)
    }

    /// Full validation used when a group is created or edited.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.weekdays.is_empty() {
            return Err(ScheduleError::NoClassDays);
        }
        if self.end < self.start {
            return Err(ScheduleError::Inverted {
                earlier: "startDate",
                later: "endDate",
            });
        }
        if let Some(p) = self.split {
            if p < self.start || p > self.end {
                return Err(ScheduleError::SplitOutsideTerm);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Full,
    FirstPartial,
    SecondPartial,
    Custom { from: NaiveDate, to: NaiveDate },
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Full => "full",
            Period::FirstPartial => "partial1",
            Period::SecondPartial => "partial2",
            Period::Custom { .. } => "custom",
        }
    }

    pub fn resolve(&self, schedule: &Schedule) -> Vec<NaiveDate> {
        match self {
            Period::Full => schedule.occurrences(),
            Period::FirstPartial => schedule.split_occurrences().before,
            Period::SecondPartial => schedule.split_occurrences().after,
            Period::Custom { from, to } => windowed(&schedule.occurrences(), *from, *to),
        }
    }
}

/// First class date after `after`, looking at most `horizon_days` ahead.
pub fn next_class_day(schedule: &Schedule, after: NaiveDate, horizon_days: u32) -> Option<NaiveDate> {
    let last = after.checked_add_days(Days::new(u64::from(horizon_days)))?;
    let from = after.succ_opt()?;
    expand(schedule.weekdays, from.max(schedule.start), last.min(schedule.end))
        .first()
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    fn mon_wed() -> WeekdaySet {
        [Weekday::Mon, Weekday::Wed].into_iter().collect()
    }

    #[test]
    fn expand_mon_wed_first_half_of_january() {
        let got = expand(mon_wed(), d(2024, 1, 1), d(2024, 1, 15));
        assert_eq!(
            got,
            vec![
                d(2024, 1, 1),
                d(2024, 1, 3),
                d(2024, 1, 8),
                d(2024, 1, 10),
                d(2024, 1, 15)
            ]
        );
    }

    #[test]
    fn expand_inverted_range_or_no_days_is_empty() {
        assert!(expand(mon_wed(), d(2024, 1, 15), d(2024, 1, 1)).is_empty());
        assert!(expand(WeekdaySet::empty(), d(2024, 1, 1), d(2024, 1, 31)).is_empty());
    }

    #[test]
    fn split_keeps_split_date_in_first_partial() {
        let occ = expand(mon_wed(), d(2024, 1, 1), d(2024, 1, 15));
        let parts = split(&occ, Some(d(2024, 1, 8)));
        assert_eq!(parts.before, vec![d(2024, 1, 1), d(2024, 1, 3), d(2024, 1, 8)]);
        assert_eq!(parts.after, vec![d(2024, 1, 10), d(2024, 1, 15)]);
    }

    #[test]
    fn split_without_point_puts_everything_first() {
        let occ = expand(mon_wed(), d(2024, 1, 1), d(2024, 1, 15));
        let parts = split(&occ, None);
        assert_eq!(parts.before, occ);
        assert!(parts.after.is_empty());

        let parts = split(&occ, Some(d(2023, 12, 1)));
        assert!(parts.before.is_empty());
        assert_eq!(parts.after, occ);
    }

    #[test]
    fn weekday_parsing_accepts_indices_and_letters() {
        assert_eq!(WeekdaySet::parse("1,3").expect("indices"), mon_wed());
        assert_eq!(WeekdaySet::parse("L,X").expect("letters"), mon_wed());
        assert_eq!(WeekdaySet::parse("lx").expect("packed letters"), mon_wed());
        assert_eq!(WeekdaySet::parse("").expect("empty"), WeekdaySet::empty());
        assert_eq!(
            WeekdaySet::parse("1,9"),
            Err(ScheduleError::UnknownWeekday("9".to_string()))
        );
        assert!(WeekdaySet::parse("Q").is_err());
        assert_eq!(mon_wed().to_index_string(), "1,3");
        assert_eq!(mon_wed().to_letters(), "LX");
    }

    #[test]
    fn periods_resolve_against_split() {
        let schedule = Schedule {
            weekdays: mon_wed(),
            start: d(2024, 1, 1),
            end: d(2024, 1, 15),
            split: Some(d(2024, 1, 8)),
        };
        assert_eq!(Period::Full.resolve(&schedule).len(), 5);
        assert_eq!(Period::FirstPartial.resolve(&schedule).len(), 3);
        assert_eq!(Period::SecondPartial.resolve(&schedule).len(), 2);
        let custom = Period::Custom {
            from: d(2024, 1, 2),
            to: d(2024, 1, 9),
        };
        assert_eq!(custom.resolve(&schedule), vec![d(2024, 1, 3), d(2024, 1, 8)]);

        let no_split = Schedule { split: None, ..schedule };
        assert_eq!(Period::FirstPartial.resolve(&no_split).len(), 5);
        assert!(Period::SecondPartial.resolve(&no_split).is_empty());
    }

    #[test]
    fn next_class_day_skips_to_following_slot() {
        let schedule = Schedule {
            weekdays: mon_wed(),
            start: d(2024, 1, 1),
            end: d(2024, 6, 30),
            split: None,
        };
        // Wednesday -> next Monday
        assert_eq!(
            next_class_day(&schedule, d(2024, 1, 3), DEFAULT_HORIZON_DAYS),
            Some(d(2024, 1, 8))
        );
        // before the term starts
        assert_eq!(
            next_class_day(&schedule, d(2023, 11, 1), DEFAULT_HORIZON_DAYS),
            Some(d(2024, 1, 1))
        );
        assert_eq!(next_class_day(&schedule, d(2024, 6, 30), DEFAULT_HORIZON_DAYS), None);
        assert_eq!(next_class_day(&schedule, d(2023, 11, 1), 30), None);
    }

    #[test]
    fn past_occurrences_exclude_today() {
        let schedule = Schedule {
            weekdays: mon_wed(),
            start: d(2024, 1, 1),
            end: d(2024, 1, 15),
            split: None,
        };
        assert_eq!(
            schedule.past_occurrences(d(2024, 1, 8)),
            vec![d(2024, 1, 1), d(2024, 1, 3)]
        );
        assert!(schedule.past_occurrences(d(2024, 1, 1)).is_empty());
        assert_eq!(schedule.past_occurrences(d(2025, 1, 1)).len(), 5);
    }

    #[test]
    fn validate_rejects_bad_schedules() {
        let ok = Schedule {
            weekdays: mon_wed(),
            start: d(2024, 1, 1),
            end: d(2024, 1, 15),
            split: Some(d(2024, 1, 15)),
        };
        assert_eq!(ok.validate(), Ok(()));
        let no_days = Schedule {
            weekdays: WeekdaySet::empty(),
            ..ok.clone()
        };
        assert_eq!(no_days.validate(), Err(ScheduleError::NoClassDays));
        let split_out = Schedule {
            split: Some(d(2024, 2, 1)),
            ..ok.clone()
        };
        assert_eq!(split_out.validate(), Err(ScheduleError::SplitOutsideTerm));
        let inverted = Schedule {
            end: d(2023, 12, 31),
            split: None,
            ..ok
        };
        assert!(matches!(inverted.validate(), Err(ScheduleError::Inverted { .. })));
    }

    fn arb_weekdays() -> impl Strategy<Value = WeekdaySet> {
        (0u8..128).prop_map(|mask| {
            (0u8..7)
                .filter(|i| mask & (1 << i) != 0)
                .filter_map(weekday_from_index)
                .collect::<WeekdaySet>()
        })
    }

    fn arb_date() -> impl Strategy<Value = NaiveDate> {
        (0u64..1500).prop_map(|offset| d(2022, 1, 1) + Days::new(offset))
    }

    proptest! {
        #[test]
        fn expand_matches_brute_force(w in arb_weekdays(), s in arb_date(), e in arb_date()) {
            let got = expand(w, s, e);
            if s > e {
                prop_assert!(got.is_empty());
            } else {
                let mut brute = Vec::new();
                let mut cur = s;
                while cur <= e {
                    if w.contains(cur.weekday()) {
                        brute.push(cur);
                    }
                    cur = cur.succ_opt().expect("next day");
                }
                prop_assert_eq!(&got, &brute);
                prop_assert!(got.windows(2).all(|p| p[0] < p[1]));
                prop_assert!(got.iter().all(|x| *x >= s && *x <= e && w.contains(x.weekday())));
            }
            prop_assert_eq!(got, expand(w, s, e));
        }

        #[test]
        fn split_loses_and_duplicates_nothing(w in arb_weekdays(), s in arb_date(), e in arb_date(), p in arb_date()) {
            let occ = expand(w, s, e);
            let parts = split(&occ, Some(p));
            let mut joined = parts.before.clone();
            joined.extend(parts.after.iter().copied());
            prop_assert_eq!(&joined, &occ);
            prop_assert!(parts.before.iter().all(|x| *x <= p));
            prop_assert!(parts.after.iter().all(|x| *x > p));
            if occ.contains(&p) {
                prop_assert!(parts.before.contains(&p));
            }
        }
    }
}
