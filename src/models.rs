use std::fmt;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Day of the week as stored in `timeslots.day_of_week` (Monday = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Weekday::Monday => "Lunes",
            Weekday::Tuesday => "Martes",
            Weekday::Wednesday => "Miércoles",
            Weekday::Thursday => "Jueves",
            Weekday::Friday => "Viernes",
            Weekday::Saturday => "Sábado",
            Weekday::Sunday => "Domingo",
        }
    }
}

impl From<Weekday> for u8 {
    fn from(value: Weekday) -> Self {
        value.index()
    }
}

impl TryFrom<u8> for Weekday {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Weekday::from_index(value).ok_or_else(|| format!("day_of_week must be 0-6, got {value}"))
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A recurring weekly window: one day, half-open `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeeklyWindow {
    pub day: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WeeklyWindow {
    pub fn new(day: Weekday, start: NaiveTime, end: NaiveTime) -> Self {
        Self { day, start, end }
    }

    pub fn overlaps(&self, other: &WeeklyWindow) -> bool {
        self.day == other.day && self.start < other.end && self.end > other.start
    }

    pub fn is_ordered(&self) -> bool {
        self.start < self.end
    }

    pub fn start_label(&self) -> String {
        self.start.format("%H:%M").to_string()
    }

    pub fn end_label(&self) -> String {
        self.end.format("%H:%M").to_string()
    }
}

impl fmt::Display for WeeklyWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-{}", self.day, self.start_label(), self.end_label())
    }
}

/// `HH:MM` on output; `HH:MM` or `HH:MM:00` on input. Slots are whole
/// minutes, so non-zero seconds are rejected.
pub mod hhmm {
    use chrono::{NaiveTime, Timelike};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(value: &str) -> Option<NaiveTime> {
        let value = value.trim();
        NaiveTime::parse_from_str(value, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
            .ok()
            .filter(|time| time.second() == 0 && time.nanosecond() == 0)
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {raw}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TimeSlot {
    pub id: i64,
    #[schema(value_type = u8, minimum = 0, maximum = 6, example = 0)]
    pub day_of_week: Weekday,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "08:00")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "10:00")]
    pub end_time: NaiveTime,
}

impl TimeSlot {
    pub fn window(&self) -> WeeklyWindow {
        WeeklyWindow::new(self.day_of_week, self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Classroom {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Teacher,
    Student,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::Teacher => "TEACHER",
            UserRole::Student => "STUDENT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ADMIN" => Some(UserRole::Admin),
            "TEACHER" => Some(UserRole::Teacher),
            "STUDENT" => Some(UserRole::Student),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub role: UserRole,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Profile {
    pub id: i64,
    pub user_id: i64,
    pub bio: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub is_read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub academic_year: i32,
    pub semester: i32,
    pub teacher_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_schedule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_classroom: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewClassroom {
    pub name: String,
    #[serde(default)]
    pub location: String,
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewUser {
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    pub role: UserRole,
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewCourse {
    pub name: String,
    pub code: String,
    pub academic_year: i32,
    pub semester: i32,
    pub teacher_id: Option<i64>,
    pub legacy_schedule: Option<String>,
    pub legacy_classroom: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CourseSession {
    pub id: i64,
    pub course_id: i64,
    pub timeslot_id: i64,
    pub classroom_id: Option<i64>,
    pub recurrence: String,
    pub notes: String,
    pub is_active: bool,
}

/// A session joined with its slot, room and course, as listed by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SessionView {
    pub id: i64,
    pub course_id: i64,
    pub course_name: String,
    pub timeslot_id: i64,
    #[schema(value_type = u8, minimum = 0, maximum = 6)]
    pub day_of_week: Weekday,
    pub day_name: String,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "08:00")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "10:00")]
    pub end_time: NaiveTime,
    pub classroom_id: Option<i64>,
    pub classroom_name: Option<String>,
    pub recurrence: String,
    pub notes: String,
}

impl SessionView {
    pub fn window(&self) -> WeeklyWindow {
        WeeklyWindow::new(self.day_of_week, self.start_time, self.end_time)
    }
}
