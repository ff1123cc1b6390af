use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::handlers::{SessionRequest, TimeSlotRequest, ValidateSessionRequest};
use crate::models::{
    Classroom, Course, NewClassroom, NewCourse, NewUser, Notification, SessionView, TimeSlot,
    User, UserRole,
};

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
        components.add_security_scheme(
            "query_token",
            SecurityScheme::ApiKey(ApiKey::Query(ApiKeyValue::new("token"))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz_live,
        crate::handlers::healthz_ready,
        crate::handlers::list_timeslots,
        crate::handlers::create_timeslot,
        crate::handlers::delete_timeslot,
        crate::handlers::list_classrooms,
        crate::handlers::create_classroom,
        crate::handlers::delete_classroom,
        crate::handlers::create_user,
        crate::handlers::list_user_notifications,
        crate::handlers::list_courses,
        crate::handlers::create_course,
        crate::handlers::list_course_sessions,
        crate::handlers::course_sessions_ical,
        crate::handlers::create_course_session,
        crate::handlers::validate_session_placement,
        crate::handlers::update_session,
        crate::handlers::delete_session
    ),
    components(schemas(
        TimeSlot,
        Classroom,
        Course,
        User,
        UserRole,
        Notification,
        SessionView,
        NewClassroom,
        NewCourse,
        NewUser,
        TimeSlotRequest,
        SessionRequest,
        ValidateSessionRequest
    )),
    tags(
        (name = "schedule", description = "Service status"),
        (name = "catalog", description = "Time slots and classrooms"),
        (name = "courses", description = "Course catalog"),
        (name = "sessions", description = "Course sessions and conflict checks"),
        (name = "users", description = "User onboarding")
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_session_routes() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/courses/{id}/sessions"));
        assert!(paths.iter().any(|p| p.as_str() == "/sessions/validate"));
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("bearer_auth"));
    }
}
