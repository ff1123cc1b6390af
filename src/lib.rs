pub mod accounts;
pub mod auth;
pub mod backfill;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ical;
pub mod models;
pub mod openapi;
pub mod parser;
pub mod settings;
pub mod validation;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use handlers::{
    course_sessions_ical, create_classroom, create_course, create_course_session,
    create_timeslot, create_user, delete_classroom, delete_session, delete_timeslot,
    healthz_live, healthz_ready, list_classrooms, list_course_sessions, list_courses,
    list_timeslots, list_user_notifications, root, update_session, validate_session_placement,
};
use tower_http::LatencyUnit;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::db::ScheduleDb;
use crate::ical::ICalExporter;
use crate::openapi::ApiDoc;
use crate::settings::Settings;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub db: Arc<ScheduleDb>,
    pub exporter: Arc<ICalExporter>,
}

impl AppState {
    pub fn new(settings: Settings, db: ScheduleDb) -> Self {
        Self {
            settings,
            db: Arc::new(db),
            exporter: Arc::new(ICalExporter::new()),
        }
    }
}

/// Installs the fmt subscriber shared by both binaries.
pub fn init_tracing(settings: &Settings) {
    tracing_subscriber::fmt()
        .with_env_filter(settings.log_filter())
        .without_time()
        .init();
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    init_tracing(&settings);

    let db = ScheduleDb::open(&settings.database_path)?;
    info!(path = %settings.database_path, "database ready");
    let state = AppState::new(settings, db);

    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
    info!("Starting Estudify Schedule API on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    let mut router = Router::new()
        .route("/", get(root))
        .route("/healthz/live", get(healthz_live))
        .route("/healthz/ready", get(healthz_ready))
        .route("/timeslots", get(list_timeslots).post(create_timeslot))
        .route("/timeslots/{id}", delete(delete_timeslot))
        .route("/classrooms", get(list_classrooms).post(create_classroom))
        .route("/classrooms/{id}", delete(delete_classroom))
        .route("/users", post(create_user))
        .route("/users/{id}/notifications", get(list_user_notifications))
        .route("/courses", get(list_courses).post(create_course))
        .route(
            "/courses/{id}/sessions",
            get(list_course_sessions).post(create_course_session),
        )
        .route("/courses/{id}/sessions.ical", get(course_sessions_ical))
        .route("/sessions/validate", post(validate_session_placement))
        .route("/sessions/{id}", put(update_session).delete(delete_session))
        .with_state(state.clone());

    if state.settings.enable_swagger {
        let openapi = ApiDoc::openapi();
        let swagger = SwaggerUi::new("/docs").url("/openapi.json", openapi);
        router = router.merge(swagger);
    }

    router.layer(trace_layer)
}
