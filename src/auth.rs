use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;

use crate::db::Repo;
use crate::error::ApiError;
use crate::models::{Course, UserRole};
use crate::settings::Settings;

/// Who is calling, resolved once per request and handed to the checks below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher { user_id: i64 },
    Student { user_id: i64 },
}

impl Role {
    pub fn user_id(self) -> Option<i64> {
        match self {
            Role::Admin => None,
            Role::Teacher { user_id } | Role::Student { user_id } => Some(user_id),
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Rooms, slots, courses and users.
    pub fn can_manage_catalog(self) -> bool {
        self.is_admin()
    }

    /// Admins schedule anything; teachers only their own courses.
    pub fn can_schedule_course(self, course: &Course) -> bool {
        match self {
            Role::Admin => true,
            Role::Teacher { user_id } => course.teacher_id == Some(user_id),
            Role::Student { .. } => false,
        }
    }

    pub fn can_view_user(self, user_id: i64) -> bool {
        self.is_admin() || self.user_id() == Some(user_id)
    }

    pub fn require(allowed: bool, action: &str) -> Result<(), ApiError> {
        if allowed {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!("Not allowed to {action}")))
        }
    }
}

pub fn resolve_role(
    settings: &Settings,
    repo: &Repo<'_>,
    auth: Option<Authorization<Bearer>>,
    query_token: Option<&str>,
) -> Result<Role, ApiError> {
    let provided_token = auth
        .map(|a| a.token().to_string())
        .or_else(|| query_token.map(|s| s.to_string()));
    let Some(token) = provided_token else {
        return Err(ApiError::Unauthorized(
            "Invalid authentication token".into(),
        ));
    };
    if token == settings.auth_token {
        return Ok(Role::Admin);
    }
    match repo.find_user_by_token(&token)? {
        Some(user) => Ok(match user.role {
            UserRole::Admin => Role::Admin,
            UserRole::Teacher => Role::Teacher { user_id: user.id },
            UserRole::Student => Role::Student { user_id: user.id },
        }),
        None => Err(ApiError::Unauthorized(
            "Invalid authentication token".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::models::NewUser;

    fn settings() -> Settings {
        Settings {
            database_path: ":memory:".to_string(),
            debug: false,
            auth_token: "secret".to_string(),
            enable_swagger: true,
            port: 8080,
            timezone: "America/Bogota".to_string(),
        }
    }

    fn course(teacher_id: Option<i64>) -> Course {
        Course {
            id: 1,
            name: "Matemáticas".into(),
            code: "MAT".into(),
            academic_year: 2025,
            semester: 1,
            teacher_id,
            legacy_schedule: None,
            legacy_classroom: None,
        }
    }

    #[test]
    fn test_admin_token_header() {
        let conn = open_in_memory().unwrap();
        let auth = Authorization::bearer("secret").unwrap();
        let role = resolve_role(&settings(), &Repo::new(&conn), Some(auth), None).unwrap();
        assert_eq!(role, Role::Admin);
    }

    #[test]
    fn test_user_token_query() {
        let conn = open_in_memory().unwrap();
        let repo = Repo::new(&conn);
        let user = repo
            .insert_user(&NewUser {
                username: "profe".into(),
                full_name: String::new(),
                email: String::new(),
                role: UserRole::Teacher,
                api_token: Some("teacher-token".into()),
            })
            .unwrap();

        let role = resolve_role(&settings(), &repo, None, Some("teacher-token")).unwrap();
        assert_eq!(role, Role::Teacher { user_id: user.id });
        assert!(resolve_role(&settings(), &repo, None, Some("bad")).is_err());
        assert!(resolve_role(&settings(), &repo, None, None).is_err());
    }

    #[test]
    fn test_capabilities() {
        let teacher = Role::Teacher { user_id: 7 };
        let student = Role::Student { user_id: 9 };

        assert!(Role::Admin.can_manage_catalog());
        assert!(!teacher.can_manage_catalog());
        assert!(teacher.can_schedule_course(&course(Some(7))));
        assert!(!teacher.can_schedule_course(&course(Some(8))));
        assert!(!teacher.can_schedule_course(&course(None)));
        assert!(!student.can_schedule_course(&course(Some(9))));
        assert!(student.can_view_user(9));
        assert!(!student.can_view_user(7));
        assert!(Role::require(false, "x").is_err());
    }
}
