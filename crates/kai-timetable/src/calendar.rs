//! Academic calendar helpers: lesson periods, week parity and group codes.

use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveTime, Timelike};
use regex::Regex;

/// A numbered lesson period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub number: u8,
    /// Minutes since midnight.
    pub start: u16,
    pub end: u16,
}

impl Period {
    const fn new(number: u8, start: u16, end: u16) -> Self {
        Self { number, start, end }
    }

    pub fn contains(&self, minute: u16) -> bool {
        minute >= self.start && minute <= self.end
    }

    /// `HH:MM-HH:MM`.
    pub fn label(&self) -> String {
        format!(
            "{:02}:{:02}-{:02}:{:02}",
            self.start / 60,
            self.start % 60,
            self.end / 60,
            self.end % 60
        )
    }
}

pub const PERIODS: [Period; 7] = [
    Period::new(1, 8 * 60, 9 * 60 + 35),
    Period::new(2, 9 * 60 + 50, 11 * 60 + 25),
    Period::new(3, 11 * 60 + 40, 13 * 60 + 15),
    Period::new(4, 13 * 60 + 30, 15 * 60 + 5),
    Period::new(5, 15 * 60 + 20, 16 * 60 + 55),
    Period::new(6, 17 * 60 + 10, 18 * 60 + 45),
    Period::new(7, 19 * 60, 20 * 60 + 35),
];

pub fn period(number: u8) -> Option<Period> {
    PERIODS.iter().copied().find(|p| p.number == number)
}

/// The period in progress at `time`, if any, and the next one to start.
pub fn period_at(time: NaiveTime) -> (Option<Period>, Option<Period>) {
    let minute = (time.hour() * 60 + time.minute()) as u16;
    let current = PERIODS.iter().copied().find(|p| p.contains(minute));
    let next = PERIODS.iter().copied().find(|p| p.start > minute);
    (current, next)
}

/// Teaching week (1 or 2) of the alternating timetable on `date`.
///
/// Dates before the semester start count as week 1.
pub fn teaching_week(semester_start: NaiveDate, date: NaiveDate) -> u8 {
    let days = (date - semester_start).num_days();
    if days < 0 {
        return 1;
    }
    ((days / 7) % 2) as u8 + 1
}

fn group_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[БМКД]-\d{3}-\d{2}-\d-[А-ЯІЇЄҐA-Z]{1,4}")
            .unwrap_or_else(|e| panic!("invalid group pattern: {e}"))
    })
}

/// First student group code mentioned in `text`, uppercased.
pub fn extract_group_code(text: &str) -> Option<String> {
    let upper = text.to_uppercase();
    group_pattern().find(&upper).map(|m| m.as_str().to_string())
}

/// Canonical spelling of a group code: trimmed, uppercased, `_` and
/// spaces read as dashes.
pub fn normalize_group(group: &str) -> String {
    group
        .trim()
        .to_uppercase()
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
