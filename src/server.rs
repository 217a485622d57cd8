use crate::config::Config;
use crate::data::{DAYS_PER_WEEK, GroupId, Lesson, TeacherId, WeekType};
use crate::error::{GenerationError, StartupError};
use crate::store::{self, InMemoryLessonStore, LessonQuery, LessonStore, Owner};
use crate::tracker::{GenerationRequest, GenerationStatus, JobTracker};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<JobTracker>,
    pub store: Arc<dyn LessonStore>,
}

impl IntoResponse for GenerationError {
    fn into_response(self) -> Response {
        let status = match &self {
            GenerationError::Validation(_) => StatusCode::BAD_REQUEST,
            GenerationError::Conflict { .. } => StatusCode::CONFLICT,
            GenerationError::NotFound(_) => StatusCode::NOT_FOUND,
            GenerationError::Catalog(_)
            | GenerationError::Store(_)
            | GenerationError::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "success": false, "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub job_id: Uuid,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub generation: GenerationStatus,
}

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub success: bool,
    pub lessons: Vec<Lesson>,
}

/// Schedule view filters. `day_of_week` counts from 0 (Monday).
#[derive(Debug, Deserialize)]
pub struct ScheduleParams {
    pub semester: u8,
    pub academic_year: Option<String>,
    pub day_of_week: Option<u8>,
    pub week_type: Option<String>,
}

async fn generate_handler(
    State(state): State<AppState>,
    request: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, GenerationError> {
    let Json(request) =
        request.map_err(|rejection| GenerationError::Validation(rejection.body_text()))?;
    let semester = request.semester;
    let academic_year = request
        .academic_year
        .clone()
        .unwrap_or_else(|| state.tracker.settings().default_academic_year.clone());
    let job_id = state.tracker.submit(request)?;
    Ok(Json(GenerateResponse {
        success: true,
        job_id,
        message: format!("Schedule generation started for semester {semester} of {academic_year}"),
    }))
}

async fn status_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>, GenerationError> {
    let job_id = Uuid::parse_str(&job_id).map_err(|_| GenerationError::NotFound(job_id))?;
    Ok(Json(StatusResponse {
        success: true,
        generation: state.tracker.get_status(job_id)?,
    }))
}

fn schedule(
    state: &AppState,
    owner: Owner,
    params: ScheduleParams,
) -> Result<Json<ScheduleResponse>, GenerationError> {
    let day_of_week = match params.day_of_week {
        Some(day) if day < DAYS_PER_WEEK => Some(day + 1),
        Some(day) => {
            return Err(GenerationError::Validation(format!(
                "day_of_week must be between 0 and {}, got {day}",
                DAYS_PER_WEEK - 1
            )));
        }
        None => None,
    };
    let week_type = match params.week_type.as_deref() {
        Some(text) => Some(WeekType::parse(text).ok_or_else(|| {
            GenerationError::Validation(format!("unknown week_type {text:?}"))
        })?),
        None => None,
    };
    let academic_year = params
        .academic_year
        .unwrap_or_else(|| state.tracker.settings().default_academic_year.clone());
    let filter = LessonQuery {
        owner,
        day_of_week,
        week_type,
    };
    let lessons = store::query(state.store.as_ref(), params.semester, &academic_year, &filter)?;
    Ok(Json(ScheduleResponse {
        success: true,
        lessons,
    }))
}

async fn group_schedule_handler(
    State(state): State<AppState>,
    Path(group_id): Path<GroupId>,
    Query(params): Query<ScheduleParams>,
) -> Result<Json<ScheduleResponse>, GenerationError> {
    schedule(&state, Owner::Group(group_id), params)
}

async fn teacher_schedule_handler(
    State(state): State<AppState>,
    Path(teacher_id): Path<TeacherId>,
    Query(params): Query<ScheduleParams>,
) -> Result<Json<ScheduleResponse>, GenerationError> {
    schedule(&state, Owner::Teacher(teacher_id), params)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "UP", "version": env!("CARGO_PKG_VERSION") }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/agent/generate", post(generate_handler))
        .route("/api/agent/status/:job_id", get(status_handler))
        .route("/api/schedule/group/:group_id", get(group_schedule_handler))
        .route("/api/schedule/teacher/:teacher_id", get(teacher_schedule_handler))
        .with_state(state)
}

pub async fn run_server(config: Config) -> Result<(), StartupError> {
    let catalog = config.catalog_source()?;
    let store: Arc<dyn LessonStore> = Arc::new(InMemoryLessonStore::new());
    let tracker = Arc::new(JobTracker::new(
        catalog,
        Arc::clone(&store),
        config.tracker_settings(),
    ));

    let gc_tracker = Arc::clone(&tracker);
    let gc_every = Duration::from_secs(config.gc_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(gc_every);
        loop {
            ticker.tick().await;
            gc_tracker.collect_garbage();
        }
    });

    let app = router(AppState { tracker, store });
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("Server running at http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
