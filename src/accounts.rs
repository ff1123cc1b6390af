//! User onboarding. Profile creation and the welcome notification are
//! explicit follow-up steps whose results are returned to the caller.

use crate::db::{Repo, StoreError};
use crate::models::{NewUser, Notification, Profile, User};

pub const WELCOME_TITLE: &str = "Bienvenido a Estudify";
pub const WELCOME_MESSAGE: &str = "Tu cuenta ha sido creada correctamente. ¡Bienvenido!";

#[derive(Debug)]
pub struct Onboarding {
    pub user: User,
    pub profile: Result<Profile, StoreError>,
    pub welcome: Result<Notification, StoreError>,
}

pub fn enqueue_welcome(repo: &Repo<'_>, user: &User) -> Result<Notification, StoreError> {
    repo.enqueue_notification(user.id, WELCOME_TITLE, WELCOME_MESSAGE, "welcome")
}

/// Fails only when the user row itself cannot be written.
pub fn create_user(repo: &Repo<'_>, new: &NewUser) -> Result<Onboarding, StoreError> {
    let user = repo.insert_user(new)?;
    let profile = repo.ensure_profile(user.id);
    let welcome = enqueue_welcome(repo, &user);
    Ok(Onboarding {
        user,
        profile,
        welcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Table, open_in_memory};
    use crate::models::UserRole;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.into(),
            full_name: "Luis Gómez".into(),
            email: "luis@example.com".into(),
            role: UserRole::Student,
            api_token: None,
        }
    }

    #[test]
    fn test_create_user_runs_follow_ups() {
        let conn = open_in_memory().unwrap();
        let repo = Repo::new(&conn);

        let onboarding = create_user(&repo, &new_user("luis")).unwrap();

        let profile = onboarding.profile.unwrap();
        assert_eq!(profile.user_id, onboarding.user.id);
        let welcome = onboarding.welcome.unwrap();
        assert_eq!(welcome.title, WELCOME_TITLE);
        assert_eq!(repo.count(Table::Profiles).unwrap(), 1);
        assert_eq!(repo.list_notifications(onboarding.user.id).unwrap().len(), 1);
    }

    #[test]
    fn test_ensure_profile_is_idempotent() {
        let conn = open_in_memory().unwrap();
        let repo = Repo::new(&conn);
        let onboarding = create_user(&repo, &new_user("ana")).unwrap();

        let again = repo.ensure_profile(onboarding.user.id).unwrap();
        assert_eq!(Some(again.id), onboarding.profile.ok().map(|p| p.id));
        assert_eq!(repo.count(Table::Profiles).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_user_fails_before_follow_ups() {
        let conn = open_in_memory().unwrap();
        let repo = Repo::new(&conn);
        create_user(&repo, &new_user("dup")).unwrap();

        assert!(matches!(
            create_user(&repo, &new_user("dup")),
            Err(StoreError::Duplicate(_))
        ));
        assert_eq!(repo.count(Table::Notifications).unwrap(), 1);
    }
}
