use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest window a pivot can span, one ISO year.
pub const MAX_WINDOW_WEEKS: usize = 53;

/// One ISO-8601 week, identified by its Monday.
///
/// Ordering follows the calendar, so weeks of consecutive years compare the
/// way they occur in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct WeekId {
    start: NaiveDate,
}

impl WeekId {
    /// The ISO week containing `date`.
    pub fn of(date: NaiveDate) -> Self {
        let back = date.weekday().num_days_from_monday() as u64;
        Self {
            start: date.checked_sub_days(Days::new(back)).unwrap_or(date),
        }
    }

    pub fn from_iso(year: i32, week: u32) -> Option<Self> {
        NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).map(|start| Self { start })
    }

    /// ISO week-numbering year, which differs from the calendar year for
    /// some days around New Year.
    pub fn year(&self) -> i32 {
        self.start.iso_week().year()
    }

    pub fn week(&self) -> u32 {
        self.start.iso_week().week()
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Sunday of the week.
    pub fn end(&self) -> NaiveDate {
        self.start
            .checked_add_days(Days::new(6))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn previous(&self) -> Option<Self> {
        self.start
            .checked_sub_days(Days::new(7))
            .map(|start| Self { start })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end()
    }

    /// Column header, e.g. `W9`.
    pub fn label(&self) -> String {
        format!("W{}", self.week())
    }

    /// Human readable span, e.g. `26 Feb - 3 Mar`.
    pub fn date_range(&self) -> String {
        format!(
            "{} - {}",
            self.start.format("%-d %b"),
            self.end().format("%-d %b")
        )
    }
}

impl fmt::Display for WeekId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-W{:02}", self.year(), self.week())
    }
}

impl FromStr for WeekId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, week) = s
            .split_once("-W")
            .ok_or_else(|| format!("expected YYYY-Www, got {:?}", s))?;
        let year: i32 = year.parse().map_err(|_| format!("bad ISO year in {:?}", s))?;
        let week: u32 = week.parse().map_err(|_| format!("bad ISO week in {:?}", s))?;
        WeekId::from_iso(year, week).ok_or_else(|| format!("{:?} is not an ISO week", s))
    }
}

impl From<WeekId> for String {
    fn from(id: WeekId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for WeekId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Column descriptor of the pivot grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekDescriptor {
    pub id: WeekId,
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub range: String,
}

impl From<WeekId> for WeekDescriptor {
    fn from(id: WeekId) -> Self {
        Self {
            id,
            label: id.label(),
            start: id.start(),
            end: id.end(),
            range: id.date_range(),
        }
    }
}

/// The `count` weeks ending with the one containing `reference`, oldest
/// first. `count` is capped at [`MAX_WINDOW_WEEKS`].
pub fn week_window(reference: NaiveDate, count: usize) -> Vec<WeekId> {
    let count = count.min(MAX_WINDOW_WEEKS);
    let mut weeks = Vec::with_capacity(count);
    let mut current = Some(WeekId::of(reference));
    while weeks.len() < count {
        match current {
            Some(week) => {
                weeks.push(week);
                current = week.previous();
            }
            None => break,
        }
    }
    weeks.reverse();
    weeks
}
