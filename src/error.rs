use crate::data::{BuildingId, ClassroomId, CourseLoadId, GroupId, TeacherId};
use thiserror::Error;
use uuid::Uuid;

/// Failures while fetching or validating the domain catalog. Every variant is
/// fatal for the run that hit it.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("could not decode {what}: {message}")]
    Decode { what: String, message: String },

    #[error("course load {course_load_id} references group {group_id}, which does not exist")]
    MissingGroup {
        course_load_id: CourseLoadId,
        group_id: GroupId,
    },

    #[error("course load {course_load_id} references teacher {teacher_id}, which does not exist")]
    MissingTeacher {
        course_load_id: CourseLoadId,
        teacher_id: TeacherId,
    },

    #[error("classroom {classroom_id} references building {building_id}, which does not exist")]
    MissingBuilding {
        classroom_id: ClassroomId,
        building_id: BuildingId,
    },

    #[error("persisted lesson references course load {course_load_id} occurrence {occurrence}, which no longer exists")]
    StaleLesson {
        course_load_id: CourseLoadId,
        occurrence: u8,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("refusing to persist lesson for {discipline_name} on day {day_of_week}")]
    InvalidDay {
        discipline_name: String,
        day_of_week: u8,
    },
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid generation request: {0}")]
    Validation(String),

    #[error("generation for semester {semester} of {academic_year} is already running as job {job_id}")]
    Conflict {
        semester: u8,
        academic_year: String,
        job_id: Uuid,
    },

    #[error("generation job {0} not found")]
    NotFound(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("could not commit schedule: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Failed(String),
}

/// Errors that stop the service from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("could not bind listener: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not load catalog: {0}")]
    Catalog(#[from] CatalogError),
}
