use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub database_path: String,
    pub debug: bool,
    /// Bearer token that resolves to the administrator role.
    pub auth_token: String,
    pub enable_swagger: bool,
    pub port: u16,
    /// IANA name used to anchor iCal exports on the school's current week.
    pub timezone: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            // Load from environment variables with APP_ prefix
            .add_source(Environment::with_prefix("APP").try_parsing(true))
            .set_default("database_path", "estudify.sqlite3")?
            .set_default("debug", false)?
            .set_default("auth_token", "default-token-change-me")?
            .set_default("enable_swagger", true)?
            .set_default("port", 8080)?
            .set_default("timezone", "America/Bogota")?
            .build()?;

        config.try_deserialize()
    }

    pub fn log_filter(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    fn clear_env() {
        for key in [
            "APP_DATABASE_PATH",
            "APP_DEBUG",
            "APP_AUTH_TOKEN",
            "APP_ENABLE_SWAGGER",
            "APP_PORT",
            "APP_TIMEZONE",
        ] {
            // SAFETY: tests touching the environment run serially.
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.port, 8080);
        assert!(settings.enable_swagger);
        assert_eq!(settings.timezone, "America/Bogota");
        assert_eq!(settings.log_filter(), "info");
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        // SAFETY: tests touching the environment run serially.
        unsafe {
            std::env::set_var("APP_PORT", "9090");
            std::env::set_var("APP_DEBUG", "true");
            std::env::set_var("APP_DATABASE_PATH", "/tmp/estudify-test.sqlite3");
        }
        let settings = Settings::from_env().unwrap();
        clear_env();

        assert_eq!(settings.port, 9090);
        assert!(settings.debug);
        assert_eq!(settings.database_path, "/tmp/estudify-test.sqlite3");
        assert_eq!(settings.log_filter(), "debug");
    }
}
