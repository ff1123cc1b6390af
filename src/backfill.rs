//! Backfill of legacy `Course.schedule` text into time slots, classrooms and
//! course sessions.
//!
//! The run happens inside one transaction: committed in live mode, rolled
//! back in dry-run mode, so both modes report identical counts and failures.
//! Each entry gets its own savepoint and a rejected entry leaves no rows
//! behind.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::db::{NewSession, Repo, StoreError, Table};
use crate::models::{Course, WeeklyWindow};
use crate::parser::{parse_entry, split_schedule};
use crate::validation::{SessionCandidate, ValidationError, validate_session};

#[derive(Debug, Clone, Default)]
pub struct BackfillOptions {
    pub dry_run: bool,
    pub failures_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Created {
    pub timeslots: u32,
    pub classrooms: u32,
    pub sessions: u32,
}

impl Created {
    fn absorb(&mut self, other: Created) {
        self.timeslots += other.timeslots;
        self.classrooms += other.classrooms;
        self.sessions += other.sessions;
    }
}

/// One entry that could not be migrated. `error` is `None` for parse
/// failures and carries the message for rejected sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub course_id: i64,
    pub course_name: String,
    pub entry: String,
    pub error: Option<String>,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {:?}, {:?}", self.course_id, self.course_name, self.entry)?;
        if let Some(error) = &self.error {
            write!(f, ", {error:?}")?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailuresFile {
    Written(PathBuf),
    Unwritable { path: PathBuf, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub dry_run: bool,
    pub courses_total: i64,
    pub created: Created,
    pub failures: Vec<Failure>,
    pub failures_file: Option<FailuresFile>,
}

impl BackfillReport {
    /// Console summary. Everything goes to `out` except a failures-file
    /// write error, which goes to `err`.
    pub fn render(&self, out: &mut dyn Write, err: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "Procesando {} cursos...", self.courses_total)?;
        if self.dry_run {
            writeln!(out, "Modo dry-run: no se harán escrituras en la base de datos")?;
        }
        match &self.failures_file {
            Some(FailuresFile::Written(path)) => {
                writeln!(out, "Fallos escritos en {}", path.display())?
            }
            Some(FailuresFile::Unwritable { error, .. }) => {
                writeln!(err, "No se pudo escribir archivo de fallos: {error}")?
            }
            None => {}
        }
        writeln!(out, "Timeslots creados: {}", self.created.timeslots)?;
        writeln!(out, "Classrooms creados: {}", self.created.classrooms)?;
        writeln!(out, "Sessions creadas: {}", self.created.sessions)?;
        if self.failures.is_empty() {
            writeln!(out, "Migración completada sin fallos.")?;
        } else {
            writeln!(
                out,
                "Fallos encontrados (curso_id, curso_name, entrada[, error]):"
            )?;
            for failure in &self.failures {
                writeln!(out, "{failure}")?;
            }
        }
        Ok(())
    }
}

enum EntryOutcome {
    Created(Created),
    Unparsed,
    Rejected(String),
}

pub fn run_backfill(
    conn: &mut Connection,
    options: &BackfillOptions,
) -> Result<BackfillReport, StoreError> {
    let mut tx = conn.transaction()?;
    let courses_total = Repo::new(&tx).count(Table::Courses)?;
    let courses = Repo::new(&tx).list_courses_with_legacy_schedule()?;
    info!(
        courses_total,
        with_schedule = courses.len(),
        dry_run = options.dry_run,
        "starting schedule backfill"
    );

    let mut created = Created::default();
    let mut failures = Vec::new();

    for course in &courses {
        let schedule = course.legacy_schedule.as_deref().unwrap_or_default();
        for entry in split_schedule(schedule) {
            let failure = |error: Option<String>| Failure {
                course_id: course.id,
                course_name: course.name.clone(),
                entry: entry.to_string(),
                error,
            };
            match process_entry(&mut tx, course, entry)? {
                EntryOutcome::Created(delta) => created.absorb(delta),
                EntryOutcome::Unparsed => {
                    warn!(course_id = course.id, entry, "unparseable schedule entry");
                    failures.push(failure(None));
                }
                EntryOutcome::Rejected(message) => {
                    warn!(course_id = course.id, entry, %message, "schedule entry rejected");
                    failures.push(failure(Some(message)));
                }
            }
        }
    }

    if options.dry_run {
        tx.rollback()?;
    } else {
        tx.commit()?;
    }

    let failures_file = match &options.failures_file {
        Some(path) if !failures.is_empty() => Some(write_failures(path, &failures)),
        _ => None,
    };

    info!(
        timeslots = created.timeslots,
        classrooms = created.classrooms,
        sessions = created.sessions,
        failures = failures.len(),
        dry_run = options.dry_run,
        "schedule backfill finished"
    );

    Ok(BackfillReport {
        dry_run: options.dry_run,
        courses_total,
        created,
        failures,
        failures_file,
    })
}

fn process_entry(
    tx: &mut Transaction<'_>,
    course: &Course,
    entry: &str,
) -> Result<EntryOutcome, StoreError> {
    let Some(window) = parse_entry(entry) else {
        return Ok(EntryOutcome::Unparsed);
    };

    let mut savepoint = tx.savepoint()?;
    let result = materialize(&Repo::new(&savepoint), course, window);
    match result {
        Ok(created) => {
            savepoint.commit()?;
            Ok(EntryOutcome::Created(created))
        }
        Err(ValidationError::Store(store_err)) => {
            error!(course_id = course.id, entry, error = %store_err, "store error during backfill");
            Err(store_err)
        }
        Err(err) => {
            // A rolled back savepoint stays open until released.
            savepoint.rollback()?;
            savepoint.commit()?;
            Ok(EntryOutcome::Rejected(err.to_string()))
        }
    }
}

fn materialize(
    repo: &Repo<'_>,
    course: &Course,
    window: WeeklyWindow,
) -> Result<Created, ValidationError> {
    let mut created = Created::default();

    let (slot, new_slot) = repo.get_or_create_timeslot(&window)?;
    if new_slot {
        created.timeslots += 1;
    }

    let legacy_room = course
        .legacy_classroom
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let classroom_id = match legacy_room {
        Some(name) => {
            let (room, new_room) = repo.get_or_create_classroom(name)?;
            if new_room {
                created.classrooms += 1;
            }
            Some(room.id)
        }
        None => None,
    };

    validate_session(repo, &SessionCandidate::new(course, slot.window(), classroom_id))?;
    repo.insert_session(&NewSession {
        course_id: course.id,
        timeslot_id: slot.id,
        classroom_id,
        recurrence: "weekly".to_string(),
        notes: String::new(),
    })?;
    created.sessions += 1;

    Ok(created)
}

fn write_failures(path: &Path, failures: &[Failure]) -> FailuresFile {
    let written = serde_json::to_string_pretty(failures)
        .map_err(io::Error::from)
        .and_then(|json| fs::write(path, json));
    match written {
        Ok(()) => FailuresFile::Written(path.to_path_buf()),
        Err(err) => {
            error!(path = %path.display(), error = %err, "could not write failures file");
            FailuresFile::Unwritable {
                path: path.to_path_buf(),
                error: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::models::{NewCourse, NewUser, UserRole};

    fn teacher(conn: &Connection, username: &str) -> i64 {
        Repo::new(conn)
            .insert_user(&NewUser {
                username: username.into(),
                full_name: String::new(),
                email: String::new(),
                role: UserRole::Teacher,
                api_token: None,
            })
            .unwrap()
            .id
    }

    fn legacy_course(
        conn: &Connection,
        code: &str,
        teacher_id: Option<i64>,
        schedule: &str,
        room: Option<&str>,
    ) -> Course {
        Repo::new(conn)
            .create_course(&NewCourse {
                name: format!("Curso {code}"),
                code: code.into(),
                academic_year: 2025,
                semester: 1,
                teacher_id,
                legacy_schedule: Some(schedule.into()),
                legacy_classroom: room.map(str::to_string),
            })
            .unwrap()
    }

    fn counts(conn: &Connection) -> (i64, i64, i64) {
        let repo = Repo::new(conn);
        (
            repo.count(Table::TimeSlots).unwrap(),
            repo.count(Table::Classrooms).unwrap(),
            repo.count(Table::CourseSessions).unwrap(),
        )
    }

    fn render(report: &BackfillReport) -> String {
        let mut out = Vec::new();
        let mut err = Vec::new();
        report.render(&mut out, &mut err).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_dry_run_reports_without_writing() {
        let mut conn = open_in_memory().unwrap();
        let t = teacher(&conn, "dry_teacher");
        legacy_course(&conn, "DR1", Some(t), "Lun 8-10; Mar 9-11", None);

        let report = run_backfill(
            &mut conn,
            &BackfillOptions {
                dry_run: true,
                failures_file: None,
            },
        )
        .unwrap();

        assert_eq!(report.created.sessions, 2);
        assert_eq!(report.created.timeslots, 2);
        assert!(report.failures.is_empty());
        assert_eq!(counts(&conn), (0, 0, 0));

        let output = render(&report);
        assert!(output.contains("Modo dry-run"));
        assert!(output.contains("Sessions creadas: 2"));
    }

    #[test]
    fn test_live_run_creates_rows() {
        let mut conn = open_in_memory().unwrap();
        let t = teacher(&conn, "live_teacher");
        legacy_course(&conn, "C1", Some(t), "Lun 8-10; Mar 9-11", None);

        let report = run_backfill(&mut conn, &BackfillOptions::default()).unwrap();

        assert_eq!(
            report.created,
            Created {
                timeslots: 2,
                classrooms: 0,
                sessions: 2
            }
        );
        assert!(report.failures.is_empty());
        assert_eq!(counts(&conn), (2, 0, 2));
        assert!(render(&report).contains("Migración completada sin fallos."));
    }

    #[test]
    fn test_shared_timeslot_and_classroom_reused() {
        let mut conn = open_in_memory().unwrap();
        legacy_course(&conn, "A", None, "Lun 8-10", Some("Aula 1"));
        legacy_course(&conn, "B", None, "Lun 8-10", Some("Aula 2"));
        legacy_course(&conn, "C", None, "Mar 8-10", Some("Aula 1"));

        let report = run_backfill(&mut conn, &BackfillOptions::default()).unwrap();

        assert_eq!(
            report.created,
            Created {
                timeslots: 2,
                classrooms: 2,
                sessions: 3
            }
        );
        assert_eq!(counts(&conn), (2, 2, 3));
    }

    #[test]
    fn test_parse_failure_has_no_error_message() {
        let mut conn = open_in_memory().unwrap();
        let course = legacy_course(&conn, "F1", None, "InvalidEntry, Lun 8-9", None);

        let report = run_backfill(&mut conn, &BackfillOptions::default()).unwrap();

        assert_eq!(report.created.sessions, 1);
        assert_eq!(
            report.failures,
            vec![Failure {
                course_id: course.id,
                course_name: course.name.clone(),
                entry: "InvalidEntry".into(),
                error: None,
            }]
        );
    }

    #[test]
    fn test_conflicts_inside_one_run_match_between_modes() {
        let run = |dry_run: bool| {
            let mut conn = open_in_memory().unwrap();
            let t = teacher(&conn, "docente");
            legacy_course(&conn, "A", Some(t), "Lun 8-10", Some("Aula 1"));
            legacy_course(&conn, "B", None, "Lun 9-11", Some("Aula 1"));
            legacy_course(&conn, "C", Some(t), "Lun 9:30-10:30", Some("Aula 2"));
            let report = run_backfill(
                &mut conn,
                &BackfillOptions {
                    dry_run,
                    failures_file: None,
                },
            )
            .unwrap();
            (report, counts(&conn))
        };

        let (dry, dry_counts) = run(true);
        let (live, live_counts) = run(false);

        assert_eq!(dry.created, live.created);
        assert_eq!(dry.failures, live.failures);
        assert_eq!(dry_counts, (0, 0, 0));

        assert_eq!(live.created.sessions, 1);
        assert_eq!(live.failures.len(), 2);
        assert!(live.failures[0].error.as_deref().unwrap().contains("aula"));
        assert!(live.failures[1].error.as_deref().unwrap().contains("docente"));
        // Rejected entries leave no orphan slots or rooms behind.
        assert_eq!(live_counts, (1, 1, 1));
    }

    #[test]
    fn test_inverted_range_is_a_validation_failure() {
        let mut conn = open_in_memory().unwrap();
        legacy_course(&conn, "X", None, "Jue 12-10", None);

        let report = run_backfill(&mut conn, &BackfillOptions::default()).unwrap();

        assert_eq!(report.created, Created::default());
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.is_some());
        assert_eq!(counts(&conn), (0, 0, 0));
    }

    #[test]
    fn test_failures_file_written_as_json() {
        let mut conn = open_in_memory().unwrap();
        let course = legacy_course(&conn, "F1", None, "InvalidEntry", None);
        let path = std::env::temp_dir().join(format!(
            "estudify-backfill-failures-{}.json",
            std::process::id()
        ));

        let report = run_backfill(
            &mut conn,
            &BackfillOptions {
                dry_run: true,
                failures_file: Some(path.clone()),
            },
        )
        .unwrap();

        assert_eq!(report.failures_file, Some(FailuresFile::Written(path.clone())));
        let data: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let rows = data.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["course_id"], course.id);
        assert_eq!(rows[0]["entry"], "InvalidEntry");
        assert!(rows[0]["error"].is_null());
        assert!(render(&report).contains("Fallos escritos en"));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_failures_file_skipped_without_failures() {
        let mut conn = open_in_memory().unwrap();
        legacy_course(&conn, "OK", None, "Vie 7-8", None);
        let path = std::env::temp_dir().join(format!(
            "estudify-backfill-empty-{}.json",
            std::process::id()
        ));

        let report = run_backfill(
            &mut conn,
            &BackfillOptions {
                dry_run: false,
                failures_file: Some(path.clone()),
            },
        )
        .unwrap();

        assert_eq!(report.failures_file, None);
        assert!(!path.exists());
    }

    #[test]
    fn test_store_error_aborts_run() {
        let mut conn = open_in_memory().unwrap();
        legacy_course(&conn, "S1", None, "Lun 8-10; Mar 9-11", None);
        conn.execute_batch(
            "CREATE TRIGGER reject_sessions BEFORE INSERT ON course_sessions
             BEGIN SELECT RAISE(ABORT, 'disk gone'); END;",
        )
        .unwrap();

        let result = run_backfill(&mut conn, &BackfillOptions::default());

        assert!(matches!(result, Err(StoreError::Sqlite(_))));
        assert_eq!(counts(&conn), (0, 0, 0));
    }

    #[test]
    fn test_inverted_range_message_is_not_a_conflict() {
        let mut conn = open_in_memory().unwrap();
        legacy_course(&conn, "INV", None, "Jue 12-10", None);

        let report = run_backfill(&mut conn, &BackfillOptions::default()).unwrap();

        let message = report.failures[0].error.as_deref().unwrap();
        assert!(message.starts_with("Rango horario inválido"));
        assert!(!message.contains("Solapamiento"));
    }

    #[test]
    fn test_failure_display() {
        let failure = Failure {
            course_id: 3,
            course_name: "Física".into(),
            entry: "Lun 8-10".into(),
            error: Some("boom".into()),
        };
        assert_eq!(failure.to_string(), r#"(3, "Física", "Lun 8-10", "boom")"#);
    }
}
