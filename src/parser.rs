//! Parser for the legacy free-text `Course.schedule` field, e.g.
//! `"Lun 08:00-10:00; Mar 9-11"`.

use chrono::NaiveTime;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{WeeklyWindow, Weekday};

static ENTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<day>[A-Za-zÁÉÍÓÚáéíóúñÑ]+)\s+(?P<start>\d{1,2}(?::\d{2})?)-(?P<end>\d{1,2}(?::\d{2})?)",
    )
    .expect("regex compiles")
});

fn lookup_day(word: &str) -> Option<Weekday> {
    let day = match word {
        "lun" | "lunes" => Weekday::Monday,
        "mar" | "martes" => Weekday::Tuesday,
        "mie" | "mié" | "miercoles" | "miércoles" => Weekday::Wednesday,
        "jue" | "jueves" => Weekday::Thursday,
        "vie" | "viernes" => Weekday::Friday,
        "sab" | "sáb" | "sabado" | "sábado" => Weekday::Saturday,
        "dom" | "domingo" => Weekday::Sunday,
        _ => return None,
    };
    Some(day)
}

/// Three-letter prefix first, then the whole word.
fn parse_day(raw: &str) -> Option<Weekday> {
    let lowered = raw.to_lowercase();
    let prefix: String = lowered.chars().take(3).collect();
    lookup_day(&prefix).or_else(|| lookup_day(&lowered))
}

/// `8`, `08`, `8:30`, `08:30`. Out-of-range values are rejected.
fn parse_time(raw: &str) -> Option<NaiveTime> {
    let (hour, minute) = match raw.split_once(':') {
        Some((h, m)) => (h.parse::<u32>().ok()?, m.parse::<u32>().ok()?),
        None => (raw.parse::<u32>().ok()?, 0),
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Parses one `<day> <start>-<end>` entry. `None` when the text does not
/// match or the day is unknown.
pub fn parse_entry(text: &str) -> Option<WeeklyWindow> {
    let caps = ENTRY_RE.captures(text.trim())?;
    let day = parse_day(&caps["day"])?;
    let start = parse_time(&caps["start"])?;
    let end = parse_time(&caps["end"])?;
    Some(WeeklyWindow::new(day, start, end))
}

/// Splits a legacy field on `;` or `,`, dropping blank pieces.
pub fn split_schedule(schedule: &str) -> Vec<&str> {
    schedule
        .split([';', ','])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(w: WeeklyWindow) -> (u8, String, String) {
        (w.day.index(), w.start_label(), w.end_label())
    }

    #[test]
    fn test_parse_padded_times() {
        let parsed = parse_entry("Lun 08:00-10:00").unwrap();
        assert_eq!(labels(parsed), (0, "08:00".into(), "10:00".into()));
    }

    #[test]
    fn test_parse_bare_hours() {
        let parsed = parse_entry("Mar 8-10").unwrap();
        assert_eq!(labels(parsed), (1, "08:00".into(), "10:00".into()));
    }

    #[test]
    fn test_parse_mixed_minutes() {
        let parsed = parse_entry("Mié 9:30-11:00").unwrap();
        assert_eq!(labels(parsed), (2, "09:30".into(), "11:00".into()));
    }

    #[test]
    fn test_day_names_accents_and_case() {
        for word in ["mie", "MIÉ", "miercoles", "Miércoles"] {
            let parsed = parse_entry(&format!("{word} 8-9")).unwrap();
            assert_eq!(parsed.day, Weekday::Wednesday, "{word}");
        }
        assert_eq!(parse_entry("sábado 10-12").unwrap().day, Weekday::Saturday);
        assert_eq!(parse_entry("DOMINGO 7-8").unwrap().day, Weekday::Sunday);
        assert_eq!(parse_entry("viernes 7-8").unwrap().day, Weekday::Friday);
    }

    #[test]
    fn test_invalid_text() {
        assert!(parse_entry("InvalidText").is_none());
        assert!(parse_entry("Lun").is_none());
        assert!(parse_entry("Foo 8-10").is_none());
        assert!(parse_entry("").is_none());
    }

    #[test]
    fn test_out_of_range_hours_rejected() {
        assert!(parse_entry("Lun 25-26").is_none());
        assert!(parse_entry("Lun 8:75-9").is_none());
    }

    #[test]
    fn test_inverted_range_still_parses() {
        let parsed = parse_entry("Jue 12-10").unwrap();
        assert!(!parsed.is_ordered());
    }

    #[test]
    fn test_split_schedule() {
        assert_eq!(
            split_schedule("Lun 8-10; Mar 9-11,Mié 7-8 ;; "),
            vec!["Lun 8-10", "Mar 9-11", "Mié 7-8"]
        );
        assert!(split_schedule("   ").is_empty());
    }
}
