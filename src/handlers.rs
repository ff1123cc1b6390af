use axum::extract::{Path, Query, State};
use axum::{Json, http::StatusCode, response::IntoResponse};
use axum_extra::extract::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use chrono::Utc;
use http::header;
use rusqlite::Connection;
use serde::Deserialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::accounts;
use crate::auth::{Role, resolve_role};
use crate::db::{NewSession, Repo};
use crate::error::ApiError;
use crate::models::{
    Classroom, Course, CourseSession, NewClassroom, NewCourse, NewUser, Notification, SessionView,
    TimeSlot, User, UserRole, WeeklyWindow, hhmm,
};
use crate::validation::{
    SessionCandidate, validate_capacity, validate_day, validate_session, validate_time_range,
};
use crate::AppState;

type BearerHeader = Option<TypedHeader<Authorization<Bearer>>>;

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TimeSlotRequest {
    #[schema(minimum = 0, maximum = 6, example = 0)]
    pub day_of_week: u8,
    #[schema(example = "08:00")]
    pub start_time: String,
    #[schema(example = "10:00")]
    pub end_time: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SessionRequest {
    #[schema(minimum = 0, maximum = 6, example = 0)]
    pub day_of_week: u8,
    #[schema(example = "08:00")]
    pub start_time: String,
    #[schema(example = "10:00")]
    pub end_time: String,
    pub classroom_id: Option<i64>,
    pub recurrence: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateSessionRequest {
    pub course_id: i64,
    /// Set when re-checking an existing session so it is not compared with itself.
    pub session_id: Option<i64>,
    #[schema(minimum = 0, maximum = 6, example = 0)]
    pub day_of_week: u8,
    #[schema(example = "08:00")]
    pub start_time: String,
    #[schema(example = "10:00")]
    pub end_time: String,
    pub classroom_id: Option<i64>,
}

fn authorize(
    state: &AppState,
    conn: &Connection,
    auth: BearerHeader,
    query: &TokenQuery,
) -> Result<Role, ApiError> {
    let auth_header = auth.map(|TypedHeader(a)| a);
    resolve_role(
        &state.settings,
        &Repo::new(conn),
        auth_header,
        query.token.as_deref(),
    )
}

fn parse_window(day: u8, start: &str, end: &str) -> Result<WeeklyWindow, ApiError> {
    let day = validate_day(day)?;
    let start = hhmm::parse(start)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid start_time: {start}")))?;
    let end = hhmm::parse(end)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid end_time: {end}")))?;
    validate_time_range(start, end)?;
    Ok(WeeklyWindow::new(day, start, end))
}

#[utoipa::path(get, path = "/", tag = "schedule")]
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Estudify Schedule API",
        "endpoints": {
            "/timeslots": "Weekly time slots",
            "/classrooms": "Classrooms",
            "/courses": "Courses",
            "/courses/{id}/sessions": "Sessions of a course (GET, POST)",
            "/courses/{id}/sessions.ical": "Download a course's weekly timetable as iCal",
            "/sessions/validate": "Check a placement for room/teacher conflicts",
            "/sessions/{id}": "Move or cancel a session (PUT, DELETE)",
            "/users": "Create users"
        }
    }))
}

#[utoipa::path(get, path = "/healthz/live", tag = "schedule")]
pub async fn healthz_live() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[utoipa::path(
    get,
    path = "/healthz/ready",
    responses((status = 200, description = "Database reachable"), (status = 500)),
    tag = "schedule"
)]
pub async fn healthz_ready(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let conn = state.db.lock()?;
    Repo::new(&conn).ping()?;
    Ok(Json(serde_json::json!({"status": "ok"})))
}

#[utoipa::path(
    get,
    path = "/timeslots",
    responses((status = 200, body = [TimeSlot]), (status = 401)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn list_timeslots(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Vec<TimeSlot>>, ApiError> {
    let conn = state.db.lock()?;
    authorize(&state, &conn, auth, &query)?;
    Ok(Json(Repo::new(&conn).list_timeslots()?))
}

#[utoipa::path(
    post,
    path = "/timeslots",
    request_body = TimeSlotRequest,
    responses(
        (status = 201, description = "Created", body = TimeSlot),
        (status = 200, description = "Already existed", body = TimeSlot),
        (status = 400), (status = 401), (status = 403)
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn create_timeslot(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Json(body): Json<TimeSlotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.db.lock()?;
    let role = authorize(&state, &conn, auth, &query)?;
    Role::require(role.can_manage_catalog(), "manage time slots")?;

    let window = parse_window(body.day_of_week, &body.start_time, &body.end_time)?;
    let (slot, created) = Repo::new(&conn).get_or_create_timeslot(&window)?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(slot)))
}

#[utoipa::path(
    delete,
    path = "/timeslots/{id}",
    params(("id" = i64, Path, description = "Time slot id")),
    responses((status = 204), (status = 404), (status = 409, description = "Referenced by sessions")),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn delete_timeslot(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let conn = state.db.lock()?;
    let role = authorize(&state, &conn, auth, &query)?;
    Role::require(role.can_manage_catalog(), "manage time slots")?;
    Repo::new(&conn).delete_timeslot(id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/classrooms",
    responses((status = 200, body = [Classroom]), (status = 401)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn list_classrooms(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Vec<Classroom>>, ApiError> {
    let conn = state.db.lock()?;
    authorize(&state, &conn, auth, &query)?;
    Ok(Json(Repo::new(&conn).list_classrooms()?))
}

#[utoipa::path(
    post,
    path = "/classrooms",
    request_body = NewClassroom,
    responses((status = 201, body = Classroom), (status = 400), (status = 401), (status = 403)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn create_classroom(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Json(body): Json<NewClassroom>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.db.lock()?;
    let role = authorize(&state, &conn, auth, &query)?;
    Role::require(role.can_manage_catalog(), "manage classrooms")?;

    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }
    validate_capacity(body.capacity)?;
    let room = Repo::new(&conn).create_classroom(&body)?;
    Ok((StatusCode::CREATED, Json(room)))
}

#[utoipa::path(
    delete,
    path = "/classrooms/{id}",
    params(("id" = i64, Path, description = "Classroom id")),
    responses((status = 204), (status = 404)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn delete_classroom(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let conn = state.db.lock()?;
    let role = authorize(&state, &conn, auth, &query)?;
    Role::require(role.can_manage_catalog(), "manage classrooms")?;
    Repo::new(&conn).delete_classroom(id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/users",
    request_body = NewUser,
    responses((status = 201, body = User), (status = 401), (status = 403), (status = 409)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "users"
)]
pub async fn create_user(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Json(body): Json<NewUser>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.db.lock()?;
    let role = authorize(&state, &conn, auth, &query)?;
    Role::require(role.can_manage_catalog(), "create users")?;

    if body.username.trim().is_empty() {
        return Err(ApiError::BadRequest("username is required".into()));
    }
    let onboarding = accounts::create_user(&Repo::new(&conn), &body)?;
    if let Err(err) = &onboarding.profile {
        warn!(user_id = onboarding.user.id, error = %err, "profile creation failed");
    }
    if let Err(err) = &onboarding.welcome {
        warn!(user_id = onboarding.user.id, error = %err, "welcome notification failed");
    }
    info!(user_id = onboarding.user.id, role = onboarding.user.role.as_str(), "user created");
    Ok((StatusCode::CREATED, Json(onboarding.user)))
}

#[utoipa::path(
    get,
    path = "/users/{id}/notifications",
    params(("id" = i64, Path, description = "User id")),
    responses((status = 200, body = [Notification]), (status = 401), (status = 403), (status = 404)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "users"
)]
pub async fn list_user_notifications(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let conn = state.db.lock()?;
    let role = authorize(&state, &conn, auth, &query)?;
    Role::require(role.can_view_user(id), "view these notifications")?;
    let repo = Repo::new(&conn);
    repo.get_user(id)?;
    Ok(Json(repo.list_notifications(id)?))
}

#[utoipa::path(
    get,
    path = "/courses",
    responses((status = 200, body = [Course]), (status = 401)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "courses"
)]
pub async fn list_courses(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Vec<Course>>, ApiError> {
    let conn = state.db.lock()?;
    authorize(&state, &conn, auth, &query)?;
    Ok(Json(Repo::new(&conn).list_courses()?))
}

#[utoipa::path(
    post,
    path = "/courses",
    request_body = NewCourse,
    responses((status = 201, body = Course), (status = 400), (status = 401), (status = 403), (status = 409)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "courses"
)]
pub async fn create_course(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Json(body): Json<NewCourse>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.db.lock()?;
    let role = authorize(&state, &conn, auth, &query)?;
    Role::require(role.can_manage_catalog(), "create courses")?;

    let repo = Repo::new(&conn);
    if let Some(teacher_id) = body.teacher_id {
        let teacher = repo.get_user(teacher_id)?;
        if teacher.role != UserRole::Teacher {
            return Err(ApiError::BadRequest(format!(
                "user {teacher_id} is not a teacher"
            )));
        }
    }
    let course = repo.create_course(&body)?;
    Ok((StatusCode::CREATED, Json(course)))
}

#[utoipa::path(
    get,
    path = "/courses/{id}/sessions",
    params(("id" = i64, Path, description = "Course id")),
    responses((status = 200, body = [SessionView]), (status = 401), (status = 404)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn list_course_sessions(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    let conn = state.db.lock()?;
    authorize(&state, &conn, auth, &query)?;
    let repo = Repo::new(&conn);
    repo.get_course(id)?;
    Ok(Json(repo.list_sessions_for_course(id)?))
}

#[utoipa::path(
    get,
    path = "/courses/{id}/sessions.ical",
    params(("id" = i64, Path, description = "Course id")),
    responses(
        (status = 200, description = "iCal file", content_type = "text/calendar"),
        (status = 401), (status = 404, description = "Unknown course or no sessions")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn course_sessions_ical(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let (course, sessions) = {
        let conn = state.db.lock()?;
        authorize(&state, &conn, auth, &query)?;
        let repo = Repo::new(&conn);
        (repo.get_course(id)?, repo.list_sessions_for_course(id)?)
    };
    if sessions.is_empty() {
        return Err(ApiError::NotFound("No sessions found".into()));
    }

    let (today, tzid) = match state.settings.timezone.parse::<chrono_tz::Tz>() {
        Ok(tz) => (Utc::now().with_timezone(&tz).date_naive(), tz.name().to_string()),
        Err(err) => {
            warn!(timezone = %state.settings.timezone, error = %err, "unknown timezone, using UTC");
            (Utc::now().date_naive(), "UTC".to_string())
        }
    };

    let body = state
        .exporter
        .generate(&course.name, &sessions, today, &tzid);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/calendar".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=course_{}.ics", course.id),
            ),
        ],
        body,
    ))
}

#[utoipa::path(
    post,
    path = "/courses/{id}/sessions",
    params(("id" = i64, Path, description = "Course id")),
    request_body = SessionRequest,
    responses(
        (status = 201, body = SessionView),
        (status = 400), (status = 401), (status = 403), (status = 404),
        (status = 409, description = "Room or teacher conflict")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn create_course_session(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Path(course_id): Path<i64>,
    Json(body): Json<SessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut conn = state.db.lock()?;
    let role = authorize(&state, &conn, auth, &query)?;
    let window = parse_window(body.day_of_week, &body.start_time, &body.end_time)?;

    let tx = conn.transaction()?;
    let repo = Repo::new(&tx);
    let course = repo.get_course(course_id)?;
    Role::require(role.can_schedule_course(&course), "schedule this course")?;
    if let Some(classroom_id) = body.classroom_id {
        repo.get_classroom(classroom_id)?;
    }

    validate_session(&repo, &SessionCandidate::new(&course, window, body.classroom_id))?;
    let (slot, _) = repo.get_or_create_timeslot(&window)?;
    let session = repo.insert_session(&NewSession {
        course_id,
        timeslot_id: slot.id,
        classroom_id: body.classroom_id,
        recurrence: body.recurrence.unwrap_or_else(|| "weekly".to_string()),
        notes: body.notes.unwrap_or_default(),
    })?;
    let view = repo.get_session_view(session.id)?;
    tx.commit()?;

    info!(session_id = view.id, course_id, window = %window, "session scheduled");
    Ok((StatusCode::CREATED, Json(view)))
}

#[utoipa::path(
    post,
    path = "/sessions/validate",
    request_body = ValidateSessionRequest,
    responses(
        (status = 200, description = "No conflict"),
        (status = 400), (status = 401), (status = 404),
        (status = 409, description = "Room or teacher conflict")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn validate_session_placement(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Json(body): Json<ValidateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.db.lock()?;
    authorize(&state, &conn, auth, &query)?;
    let window = parse_window(body.day_of_week, &body.start_time, &body.end_time)?;

    let repo = Repo::new(&conn);
    let course = repo.get_course(body.course_id)?;
    let candidate = SessionCandidate {
        session_id: body.session_id,
        ..SessionCandidate::new(&course, window, body.classroom_id)
    };
    validate_session(&repo, &candidate)?;
    Ok(Json(serde_json::json!({"ok": true})))
}

#[utoipa::path(
    put,
    path = "/sessions/{id}",
    params(("id" = i64, Path, description = "Session id")),
    request_body = SessionRequest,
    responses(
        (status = 200, body = SessionView),
        (status = 400), (status = 401), (status = 403), (status = 404),
        (status = 409, description = "Room or teacher conflict")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn update_session(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Path(id): Path<i64>,
    Json(body): Json<SessionRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let mut conn = state.db.lock()?;
    let role = authorize(&state, &conn, auth, &query)?;
    let window = parse_window(body.day_of_week, &body.start_time, &body.end_time)?;

    let tx = conn.transaction()?;
    let repo = Repo::new(&tx);
    let existing = repo.get_session(id)?;
    let course = repo.get_course(existing.course_id)?;
    Role::require(role.can_schedule_course(&course), "reschedule this course")?;
    if let Some(classroom_id) = body.classroom_id {
        repo.get_classroom(classroom_id)?;
    }

    let candidate = SessionCandidate {
        session_id: Some(id),
        ..SessionCandidate::new(&course, window, body.classroom_id)
    };
    validate_session(&repo, &candidate)?;
    let (slot, _) = repo.get_or_create_timeslot(&window)?;
    repo.update_session(&CourseSession {
        timeslot_id: slot.id,
        classroom_id: body.classroom_id,
        recurrence: body.recurrence.unwrap_or(existing.recurrence.clone()),
        notes: body.notes.unwrap_or(existing.notes.clone()),
        ..existing
    })?;
    let view = repo.get_session_view(id)?;
    tx.commit()?;

    info!(session_id = id, window = %window, "session rescheduled");
    Ok(Json(view))
}

#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    params(("id" = i64, Path, description = "Session id")),
    responses((status = 204), (status = 401), (status = 403), (status = 404)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn delete_session(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let conn = state.db.lock()?;
    let role = authorize(&state, &conn, auth, &query)?;
    let repo = Repo::new(&conn);
    let session = repo.get_session(id)?;
    let course = repo.get_course(session.course_id)?;
    Role::require(role.can_schedule_course(&course), "cancel this session")?;
    repo.deactivate_session(id)?;
    info!(session_id = id, "session deactivated");
    Ok(StatusCode::NO_CONTENT)
}
