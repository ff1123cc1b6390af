use chrono::NaiveTime;
use thiserror::Error;
use tracing::debug;

use crate::db::{Repo, StoreError};
use crate::error::ApiError;
use crate::models::{Course, CourseSession, SessionView, TimeSlot, WeeklyWindow, Weekday};

/// What a session would occupy if it were saved.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCandidate {
    /// Set for persisted sessions so they never conflict with themselves.
    pub session_id: Option<i64>,
    pub window: WeeklyWindow,
    pub classroom_id: Option<i64>,
    pub teacher_id: Option<i64>,
}

impl SessionCandidate {
    pub fn new(course: &Course, window: WeeklyWindow, classroom_id: Option<i64>) -> Self {
        Self {
            session_id: None,
            window,
            classroom_id,
            teacher_id: course.teacher_id,
        }
    }

    pub fn existing(course: &Course, session: &CourseSession, slot: &TimeSlot) -> Self {
        Self {
            session_id: Some(session.id),
            window: slot.window(),
            classroom_id: session.classroom_id,
            teacher_id: course.teacher_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleConflict {
    #[error("Solapamiento detectado: la aula ya está ocupada en esa franja.")]
    RoomOccupied {
        classroom_id: i64,
        session_ids: Vec<i64>,
    },
    #[error("Solapamiento detectado: el docente tiene otra clase en esa franja.")]
    TeacherBusy {
        teacher_id: i64,
        session_ids: Vec<i64>,
    },
}

impl ScheduleConflict {
    pub fn session_ids(&self) -> &[i64] {
        match self {
            ScheduleConflict::RoomOccupied { session_ids, .. }
            | ScheduleConflict::TeacherBusy { session_ids, .. } => session_ids,
        }
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Rango horario inválido: la hora de inicio debe ser anterior a la hora de fin.")]
    InvertedRange,
    #[error(transparent)]
    Conflict(#[from] ScheduleConflict),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn overlapping(existing: Vec<SessionView>, candidate: &SessionCandidate) -> Vec<i64> {
    existing
        .into_iter()
        .filter(|s| Some(s.id) != candidate.session_id)
        .filter(|s| s.window().overlaps(&candidate.window))
        .map(|s| s.id)
        .collect()
}

/// Room first, then teacher; read only.
pub fn find_conflict(
    repo: &Repo<'_>,
    candidate: &SessionCandidate,
) -> Result<Option<ScheduleConflict>, StoreError> {
    if let Some(classroom_id) = candidate.classroom_id {
        let same_room = repo.active_sessions_in_room_on_day(classroom_id, candidate.window.day)?;
        let session_ids = overlapping(same_room, candidate);
        if !session_ids.is_empty() {
            debug!(classroom_id, ?session_ids, window = %candidate.window, "room conflict");
            return Ok(Some(ScheduleConflict::RoomOccupied {
                classroom_id,
                session_ids,
            }));
        }
    }

    if let Some(teacher_id) = candidate.teacher_id {
        let same_teacher =
            repo.active_sessions_for_teacher_on_day(teacher_id, candidate.window.day)?;
        let session_ids = overlapping(same_teacher, candidate);
        if !session_ids.is_empty() {
            debug!(teacher_id, ?session_ids, window = %candidate.window, "teacher conflict");
            return Ok(Some(ScheduleConflict::TeacherBusy {
                teacher_id,
                session_ids,
            }));
        }
    }

    Ok(None)
}

/// Full check run before a session is written.
pub fn validate_session(
    repo: &Repo<'_>,
    candidate: &SessionCandidate,
) -> Result<(), ValidationError> {
    if !candidate.window.is_ordered() {
        return Err(ValidationError::InvertedRange);
    }
    match find_conflict(repo, candidate)? {
        Some(conflict) => Err(conflict.into()),
        None => Ok(()),
    }
}

pub fn validate_day(value: u8) -> Result<Weekday, ApiError> {
    Weekday::from_index(value)
        .ok_or_else(|| ApiError::BadRequest("day_of_week must be between 0 and 6".into()))
}

pub fn validate_time_range(start: NaiveTime, end: NaiveTime) -> Result<(), ApiError> {
    if start < end {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "start_time must be before end_time".into(),
        ))
    }
}

pub fn validate_capacity(value: Option<u32>) -> Result<Option<u32>, ApiError> {
    match value {
        Some(0) => Err(ApiError::BadRequest("capacity must be positive".into())),
        other => Ok(other),
    }
}
