//! Timetable data model.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::calendar::teaching_week;

/// One scheduled class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    /// Period number, 1-based.
    pub number: u8,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lecturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// Lecture, practice, lab.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Lessons of one weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub day: Weekday,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
}

/// Two-week alternating timetable of one student group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timetable {
    pub group: String,
    /// Keyed by teaching week (1 or 2).
    #[serde(default)]
    pub weeks: BTreeMap<u8, Vec<DaySchedule>>,
}

impl Timetable {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            weeks: BTreeMap::new(),
        }
    }

    /// Lessons on `day` of teaching week `week`, ordered by period.
    pub fn lessons(&self, week: u8, day: Weekday) -> Vec<&Lesson> {
        let mut out: Vec<&Lesson> = self
            .weeks
            .get(&week)
            .into_iter()
            .flatten()
            .filter(|d| d.day == day)
            .flat_map(|d| d.lessons.iter())
            .collect();
        out.sort_by_key(|l| l.number);
        out
    }

    /// Lessons held on a calendar date.
    pub fn on_date(&self, semester_start: NaiveDate, date: NaiveDate) -> Vec<&Lesson> {
        self.lessons(teaching_week(semester_start, date), date.weekday())
    }

    pub fn lesson_count(&self) -> usize {
        self.weeks
            .values()
            .flatten()
            .map(|d| d.lessons.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_and_lookup() {
        let json = r#"{
            "group": "Б-121-22-1-КІ",
            "weeks": {
                "1": [
                    {"day": "Mon", "lessons": [
                        {"number": 3, "subject": "Бази даних", "room": "ауд. 5.301"},
                        {"number": 1, "subject": "Алгоритми", "lecturer": "Іванов П. С.", "kind": "Лекція"}
                    ]}
                ],
                "2": [
                    {"day": "Tue", "lessons": [{"number": 2, "subject": "Фізика"}]}
                ]
            }
        }"#;
        let t: Timetable = serde_json::from_str(json).unwrap();
        assert_eq!(t.lesson_count(), 3);

        let monday = t.lessons(1, Weekday::Mon);
        assert_eq!(monday.len(), 2);
        assert_eq!(monday[0].subject, "Алгоритми");
        assert_eq!(monday[1].room.as_deref(), Some("ауд. 5.301"));

        assert!(t.lessons(2, Weekday::Mon).is_empty());
        assert!(t.lessons(3, Weekday::Tue).is_empty());

        let start = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        // Tuesday of the second week
        let tuesday = NaiveDate::from_ymd_opt(2025, 9, 9).unwrap();
        assert_eq!(t.on_date(start, tuesday)[0].subject, "Фізика");
        assert!(t.on_date(start, NaiveDate::from_ymd_opt(2025, 9, 2).unwrap()).is_empty());
    }
}
