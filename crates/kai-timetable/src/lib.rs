//! kai-timetable: student group timetables for kai.
//!
//! # Features
//!
//! - Two-week alternating timetables keyed by group code
//! - Lesson periods and week parity from the semester start
//! - Group code extraction from free text
//! - Bounded TTL cache with exponential-backoff refresh

pub mod cache;
pub mod calendar;
pub mod model;
pub mod source;

pub use cache::{BackoffPolicy, TimetableCache};
pub use calendar::{
    extract_group_code, normalize_group, period, period_at, teaching_week, Period, PERIODS,
};
pub use model::{DaySchedule, Lesson, Timetable};
pub use source::{JsonDirSource, TimetableSource};
