//! SQLite store for the scheduling tables.
//!
//! `ScheduleDb` owns the shared connection used by the HTTP server. All
//! queries live on `Repo`, which borrows any `Connection` so the same code
//! runs inside a transaction or savepoint (a `Transaction` derefs to
//! `Connection`).

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;

use crate::models::{
    Classroom, Course, CourseSession, NewClassroom, NewCourse, NewUser, Notification, Profile,
    SessionView, TimeSlot, User, UserRole, WeeklyWindow, Weekday,
};

const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("{entity} {id} is still referenced by course sessions")]
    Protected { entity: &'static str, id: i64 },
    #[error("{0} already exists")]
    Duplicate(String),
    #[error("database lock poisoned")]
    Poisoned,
}

impl ToSql for Weekday {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(i64::from(self.index())))
    }
}

impl FromSql for Weekday {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_i64()?;
        u8::try_from(raw)
            .ok()
            .and_then(Weekday::from_index)
            .ok_or(FromSqlError::OutOfRange(raw))
    }
}

impl ToSql for UserRole {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for UserRole {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        UserRole::parse(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

/// Opens (creating if needed) the database file and applies the schema.
pub fn open_connection(path: impl AsRef<Path>) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection, StoreError> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

pub struct ScheduleDb {
    conn: Mutex<Connection>,
}

impl ScheduleDb {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::new(open_connection(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(open_in_memory()?))
    }

    /// Never hold the guard across an `.await`.
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

const TIMESLOT_COLUMNS: &str = "id, day_of_week, start_time, end_time";
const CLASSROOM_COLUMNS: &str = "id, name, location, capacity";
const USER_COLUMNS: &str = "id, username, full_name, email, role, is_active";
const COURSE_COLUMNS: &str =
    "id, name, code, academic_year, semester, teacher_id, legacy_schedule, legacy_classroom";
const SESSION_COLUMNS: &str =
    "id, course_id, timeslot_id, classroom_id, recurrence, notes, is_active";

const SESSION_VIEW_SELECT: &str = "
    SELECT s.id, s.course_id, c.name, s.timeslot_id, t.day_of_week, t.start_time, t.end_time,
           s.classroom_id, r.name, s.recurrence, s.notes
    FROM course_sessions s
    JOIN courses c ON c.id = s.course_id
    JOIN timeslots t ON t.id = s.timeslot_id
    LEFT JOIN classrooms r ON r.id = s.classroom_id";

fn timeslot_from_row(row: &Row<'_>) -> rusqlite::Result<TimeSlot> {
    Ok(TimeSlot {
        id: row.get(0)?,
        day_of_week: row.get(1)?,
        start_time: row.get(2)?,
        end_time: row.get(3)?,
    })
}

fn classroom_from_row(row: &Row<'_>) -> rusqlite::Result<Classroom> {
    Ok(Classroom {
        id: row.get(0)?,
        name: row.get(1)?,
        location: row.get(2)?,
        capacity: row.get(3)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        full_name: row.get(2)?,
        email: row.get(3)?,
        role: row.get(4)?,
        is_active: row.get(5)?,
    })
}

fn course_from_row(row: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        academic_year: row.get(3)?,
        semester: row.get(4)?,
        teacher_id: row.get(5)?,
        legacy_schedule: row.get(6)?,
        legacy_classroom: row.get(7)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<CourseSession> {
    Ok(CourseSession {
        id: row.get(0)?,
        course_id: row.get(1)?,
        timeslot_id: row.get(2)?,
        classroom_id: row.get(3)?,
        recurrence: row.get(4)?,
        notes: row.get(5)?,
        is_active: row.get(6)?,
    })
}

fn session_view_from_row(row: &Row<'_>) -> rusqlite::Result<SessionView> {
    let day_of_week: Weekday = row.get(4)?;
    Ok(SessionView {
        id: row.get(0)?,
        course_id: row.get(1)?,
        course_name: row.get(2)?,
        timeslot_id: row.get(3)?,
        day_of_week,
        day_name: day_of_week.display_name().to_string(),
        start_time: row.get(5)?,
        end_time: row.get(6)?,
        classroom_id: row.get(7)?,
        classroom_name: row.get(8)?,
        recurrence: row.get(9)?,
        notes: row.get(10)?,
    })
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub course_id: i64,
    pub timeslot_id: i64,
    pub classroom_id: Option<i64>,
    pub recurrence: String,
    pub notes: String,
}

/// Tables that can be counted with [`Repo::count`].
#[derive(Debug, Clone, Copy)]
pub enum Table {
    TimeSlots,
    Classrooms,
    CourseSessions,
    Courses,
    Users,
    Profiles,
    Notifications,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::TimeSlots => "timeslots",
            Table::Classrooms => "classrooms",
            Table::CourseSessions => "course_sessions",
            Table::Courses => "courses",
            Table::Users => "users",
            Table::Profiles => "profiles",
            Table::Notifications => "notifications",
        }
    }
}

#[derive(Clone, Copy)]
pub struct Repo<'c> {
    conn: &'c Connection,
}

impl<'c> Repo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn ping(&self) -> Result<(), StoreError> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    pub fn count(&self, table: Table) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    // --- time slots ---

    pub fn find_timeslot(&self, window: &WeeklyWindow) -> Result<Option<TimeSlot>, StoreError> {
        let sql = format!(
            "SELECT {TIMESLOT_COLUMNS} FROM timeslots
             WHERE day_of_week = ?1 AND start_time = ?2 AND end_time = ?3"
        );
        Ok(self
            .conn
            .query_row(&sql, params![window.day, window.start, window.end], timeslot_from_row)
            .optional()?)
    }

    /// Returns the slot and whether it was inserted by this call.
    pub fn get_or_create_timeslot(
        &self,
        window: &WeeklyWindow,
    ) -> Result<(TimeSlot, bool), StoreError> {
        if let Some(existing) = self.find_timeslot(window)? {
            return Ok((existing, false));
        }
        let stamp = now();
        self.conn.execute(
            "INSERT INTO timeslots (day_of_week, start_time, end_time, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![window.day, window.start, window.end, stamp],
        )?;
        let slot = TimeSlot {
            id: self.conn.last_insert_rowid(),
            day_of_week: window.day,
            start_time: window.start,
            end_time: window.end,
        };
        Ok((slot, true))
    }

    pub fn get_timeslot(&self, id: i64) -> Result<TimeSlot, StoreError> {
        let sql = format!("SELECT {TIMESLOT_COLUMNS} FROM timeslots WHERE id = ?1");
        self.conn
            .query_row(&sql, [id], timeslot_from_row)
            .optional()?
            .ok_or(StoreError::NotFound {
                entity: "timeslot",
                id,
            })
    }

    pub fn list_timeslots(&self) -> Result<Vec<TimeSlot>, StoreError> {
        let sql = format!(
            "SELECT {TIMESLOT_COLUMNS} FROM timeslots ORDER BY day_of_week, start_time, end_time"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let slots = stmt
            .query_map([], timeslot_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(slots)
    }

    /// Refuses while any session, active or not, still points at the slot.
    pub fn delete_timeslot(&self, id: i64) -> Result<(), StoreError> {
        self.get_timeslot(id)?;
        let references: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM course_sessions WHERE timeslot_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        if references > 0 {
            return Err(StoreError::Protected {
                entity: "timeslot",
                id,
            });
        }
        match self.conn.execute("DELETE FROM timeslots WHERE id = ?1", [id]) {
            Ok(_) => Ok(()),
            Err(err) if is_foreign_key_violation(&err) => Err(StoreError::Protected {
                entity: "timeslot",
                id,
            }),
            Err(err) => Err(err.into()),
        }
    }

    // --- classrooms ---

    /// Names are not unique; the oldest match wins.
    pub fn find_classroom_by_name(&self, name: &str) -> Result<Option<Classroom>, StoreError> {
        let sql = format!(
            "SELECT {CLASSROOM_COLUMNS} FROM classrooms WHERE name = ?1 ORDER BY id LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, [name], classroom_from_row)
            .optional()?)
    }

    pub fn create_classroom(&self, new: &NewClassroom) -> Result<Classroom, StoreError> {
        let stamp = now();
        self.conn.execute(
            "INSERT INTO classrooms (name, location, capacity, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![new.name, new.location, new.capacity, stamp],
        )?;
        Ok(Classroom {
            id: self.conn.last_insert_rowid(),
            name: new.name.clone(),
            location: new.location.clone(),
            capacity: new.capacity,
        })
    }

    pub fn get_or_create_classroom(&self, name: &str) -> Result<(Classroom, bool), StoreError> {
        if let Some(existing) = self.find_classroom_by_name(name)? {
            return Ok((existing, false));
        }
        let created = self.create_classroom(&NewClassroom {
            name: name.to_string(),
            location: String::new(),
            capacity: None,
        })?;
        Ok((created, true))
    }

    pub fn get_classroom(&self, id: i64) -> Result<Classroom, StoreError> {
        let sql = format!("SELECT {CLASSROOM_COLUMNS} FROM classrooms WHERE id = ?1");
        self.conn
            .query_row(&sql, [id], classroom_from_row)
            .optional()?
            .ok_or(StoreError::NotFound {
                entity: "classroom",
                id,
            })
    }

    pub fn list_classrooms(&self) -> Result<Vec<Classroom>, StoreError> {
        let sql = format!("SELECT {CLASSROOM_COLUMNS} FROM classrooms ORDER BY name, id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rooms = stmt
            .query_map([], classroom_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rooms)
    }

    /// Sessions in the room survive with a NULL classroom.
    pub fn delete_classroom(&self, id: i64) -> Result<(), StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM classrooms WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "classroom",
                id,
            });
        }
        Ok(())
    }

    // --- users ---

    pub fn insert_user(&self, new: &NewUser) -> Result<User, StoreError> {
        let stamp = now();
        let inserted = self.conn.execute(
            "INSERT INTO users (username, full_name, email, role, api_token, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                new.username,
                new.full_name,
                new.email,
                new.role,
                new.api_token,
                stamp
            ],
        );
        match inserted {
            Ok(_) => self.get_user(self.conn.last_insert_rowid()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::Duplicate(format!("user {}", new.username)))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn get_user(&self, id: i64) -> Result<User, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        self.conn
            .query_row(&sql, [id], user_from_row)
            .optional()?
            .ok_or(StoreError::NotFound { entity: "user", id })
    }

    pub fn find_user_by_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE api_token = ?1 AND is_active = 1");
        Ok(self
            .conn
            .query_row(&sql, [token], user_from_row)
            .optional()?)
    }

    /// Idempotent: returns the existing profile when there is one.
    pub fn ensure_profile(&self, user_id: i64) -> Result<Profile, StoreError> {
        let stamp = now();
        self.conn.execute(
            "INSERT OR IGNORE INTO profiles (user_id, created_at, updated_at) VALUES (?1, ?2, ?2)",
            params![user_id, stamp],
        )?;
        Ok(self.conn.query_row(
            "SELECT id, user_id, bio FROM profiles WHERE user_id = ?1",
            [user_id],
            |row| {
                Ok(Profile {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    bio: row.get(2)?,
                })
            },
        )?)
    }

    pub fn enqueue_notification(
        &self,
        user_id: i64,
        title: &str,
        message: &str,
        kind: &str,
    ) -> Result<Notification, StoreError> {
        let stamp = now();
        self.conn.execute(
            "INSERT INTO notifications (user_id, title, message, kind, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![user_id, title, message, kind, stamp],
        )?;
        Ok(Notification {
            id: self.conn.last_insert_rowid(),
            user_id,
            title: title.to_string(),
            message: message.to_string(),
            kind: kind.to_string(),
            is_read: false,
        })
    }

    pub fn list_notifications(&self, user_id: i64) -> Result<Vec<Notification>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, title, message, kind, is_read
             FROM notifications WHERE user_id = ?1 AND is_active = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([user_id], |row| {
                Ok(Notification {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    title: row.get(2)?,
                    message: row.get(3)?,
                    kind: row.get(4)?,
                    is_read: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // --- courses ---

    pub fn create_course(&self, new: &NewCourse) -> Result<Course, StoreError> {
        let stamp = now();
        let inserted = self.conn.execute(
            "INSERT INTO courses (name, code, academic_year, semester, teacher_id,
                                  legacy_schedule, legacy_classroom, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                new.name,
                new.code,
                new.academic_year,
                new.semester,
                new.teacher_id,
                new.legacy_schedule,
                new.legacy_classroom,
                stamp
            ],
        );
        match inserted {
            Ok(_) => self.get_course(self.conn.last_insert_rowid()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Duplicate(format!(
                "course {} {}-{}",
                new.code, new.academic_year, new.semester
            ))),
            Err(err) => Err(err.into()),
        }
    }

    pub fn get_course(&self, id: i64) -> Result<Course, StoreError> {
        let sql = format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = ?1");
        self.conn
            .query_row(&sql, [id], course_from_row)
            .optional()?
            .ok_or(StoreError::NotFound {
                entity: "course",
                id,
            })
    }

    pub fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        let sql = format!("SELECT {COURSE_COLUMNS} FROM courses WHERE is_active = 1 ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let courses = stmt
            .query_map([], course_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(courses)
    }

    /// Courses whose legacy free-text schedule still holds something.
    pub fn list_courses_with_legacy_schedule(&self) -> Result<Vec<Course>, StoreError> {
        let sql = format!(
            "SELECT {COURSE_COLUMNS} FROM courses
             WHERE legacy_schedule IS NOT NULL AND TRIM(legacy_schedule) <> ''
             ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let courses = stmt
            .query_map([], course_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(courses)
    }

    /// Cascades to the course's sessions.
    pub fn delete_course(&self, id: i64) -> Result<(), StoreError> {
        let deleted = self.conn.execute("DELETE FROM courses WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "course",
                id,
            });
        }
        Ok(())
    }

    // --- sessions ---

    pub fn insert_session(&self, new: &NewSession) -> Result<CourseSession, StoreError> {
        let stamp = now();
        self.conn.execute(
            "INSERT INTO course_sessions (course_id, timeslot_id, classroom_id, recurrence, notes,
                                          created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                new.course_id,
                new.timeslot_id,
                new.classroom_id,
                new.recurrence,
                new.notes,
                stamp
            ],
        )?;
        self.get_session(self.conn.last_insert_rowid())
    }

    pub fn get_session(&self, id: i64) -> Result<CourseSession, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM course_sessions WHERE id = ?1");
        self.conn
            .query_row(&sql, [id], session_from_row)
            .optional()?
            .ok_or(StoreError::NotFound {
                entity: "session",
                id,
            })
    }

    pub fn update_session(&self, session: &CourseSession) -> Result<CourseSession, StoreError> {
        let updated = self.conn.execute(
            "UPDATE course_sessions
             SET timeslot_id = ?2, classroom_id = ?3, recurrence = ?4, notes = ?5,
                 is_active = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                session.id,
                session.timeslot_id,
                session.classroom_id,
                session.recurrence,
                session.notes,
                session.is_active,
                now()
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "session",
                id: session.id,
            });
        }
        self.get_session(session.id)
    }

    pub fn deactivate_session(&self, id: i64) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE course_sessions SET is_active = 0, updated_at = ?2 WHERE id = ?1",
            params![id, now()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "session",
                id,
            });
        }
        Ok(())
    }

    pub fn get_session_view(&self, id: i64) -> Result<SessionView, StoreError> {
        let sql = format!("{SESSION_VIEW_SELECT} WHERE s.id = ?1");
        self.query_session_views(&sql, params![id])?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound {
                entity: "session",
                id,
            })
    }

    pub fn list_sessions_for_course(&self, course_id: i64) -> Result<Vec<SessionView>, StoreError> {
        let sql = format!(
            "{SESSION_VIEW_SELECT}
             WHERE s.course_id = ?1 AND s.is_active = 1
             ORDER BY t.day_of_week, t.start_time"
        );
        self.query_session_views(&sql, params![course_id])
    }

    pub fn active_sessions_in_room_on_day(
        &self,
        classroom_id: i64,
        day: Weekday,
    ) -> Result<Vec<SessionView>, StoreError> {
        let sql = format!(
            "{SESSION_VIEW_SELECT}
             WHERE s.classroom_id = ?1 AND t.day_of_week = ?2 AND s.is_active = 1
             ORDER BY t.start_time, s.id"
        );
        self.query_session_views(&sql, params![classroom_id, day])
    }

    pub fn active_sessions_for_teacher_on_day(
        &self,
        teacher_id: i64,
        day: Weekday,
    ) -> Result<Vec<SessionView>, StoreError> {
        let sql = format!(
            "{SESSION_VIEW_SELECT}
             WHERE c.teacher_id = ?1 AND t.day_of_week = ?2 AND s.is_active = 1
             ORDER BY t.start_time, s.id"
        );
        self.query_session_views(&sql, params![teacher_id, day])
    }

    fn query_session_views(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<SessionView>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, session_view_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
