use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use icalendar::{Calendar, CalendarDateTime, Component, DatePerhapsTime, Event, EventLike};

use crate::models::SessionView;

/// Weekly recurring calendar for one course's sessions.
#[derive(Clone, Default)]
pub struct ICalExporter;

impl ICalExporter {
    pub fn new() -> Self {
        Self
    }

    /// `week_of` may be any date; events start in that date's Monday-based week.
    pub fn generate(
        &self,
        course_name: &str,
        sessions: &[SessionView],
        week_of: NaiveDate,
        tzid: &str,
    ) -> Vec<u8> {
        if sessions.is_empty() {
            return Vec::new();
        }

        let monday = week_of - Duration::days(week_of.weekday().num_days_from_monday() as i64);
        let at = |date: NaiveDate, time| {
            DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone {
                date_time: NaiveDateTime::new(date, time),
                tzid: tzid.to_string(),
            })
        };

        let mut calendar = Calendar::new();
        calendar.name(&format!("Estudify: {course_name}"));

        for session in sessions {
            let date = monday + Duration::days(session.day_of_week.index() as i64);

            let mut event = Event::new();
            event.summary(&format!("{}: {}", session.course_name, session.day_name));
            event.starts(at(date, session.start_time));
            event.ends(at(date, session.end_time));
            event.add_property("RRULE", "FREQ=WEEKLY");
            if let Some(room) = &session.classroom_name {
                event.location(room);
            }
            let mut description = format!("Recurrencia: {}", session.recurrence);
            if !session.notes.is_empty() {
                description.push('\n');
                description.push_str(&session.notes);
            }
            event.description(&description);
            event.uid(&format!("session-{}-estudify", session.id));
            calendar.push(event);
        }

        calendar.to_string().into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;
    use crate::models::Weekday;

    fn session(id: i64, day: Weekday, room: Option<&str>) -> SessionView {
        SessionView {
            id,
            course_id: 1,
            course_name: "Química".to_string(),
            timeslot_id: 1,
            day_of_week: day,
            day_name: day.display_name().to_string(),
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            classroom_id: None,
            classroom_name: room.map(str::to_string),
            recurrence: "weekly".to_string(),
            notes: String::new(),
        }
    }

    #[test]
    fn test_generate_weekly_events() {
        let exporter = ICalExporter::new();
        // A Thursday; events anchor on that week's Monday.
        let week_of = NaiveDate::from_ymd_opt(2025, 3, 13).unwrap();
        let bytes = exporter.generate(
            "Química",
            &[
                session(1, Weekday::Monday, Some("Lab 2")),
                session(2, Weekday::Wednesday, None),
            ],
            week_of,
            "America/Bogota",
        );
        let body = String::from_utf8(bytes).unwrap();
        assert!(body.contains("BEGIN:VCALENDAR"));
        assert_eq!(body.matches("BEGIN:VEVENT").count(), 2);
        assert!(body.contains("RRULE:FREQ=WEEKLY"));
        assert!(body.contains("20250310T080000"));
        assert!(body.contains("20250312T080000"));
        assert!(body.contains("Lab 2"));
        assert!(body.contains("session-1-estudify"));
    }

    #[test]
    fn test_generate_empty() {
        let exporter = ICalExporter::new();
        let week_of = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        assert!(exporter.generate("X", &[], week_of, "UTC").is_empty());
    }
}
