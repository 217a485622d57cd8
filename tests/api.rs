//! HTTP round trips through the router, using `tower::ServiceExt::oneshot`
//! against an in-memory catalog and lesson store.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::time::Duration;
use timetable_solver::catalog::{Catalog, CatalogData, CatalogSource, InMemoryCatalog};
use timetable_solver::error::CatalogError;
use timetable_solver::server::{AppState, router};
use timetable_solver::store::{InMemoryLessonStore, LessonStore};
use timetable_solver::tracker::{JobTracker, TrackerSettings};
use tower::ServiceExt;

fn catalog_data() -> CatalogData {
    serde_json::from_value(json!({
        "teachers": [{ "id": 1, "full_name": "Ivanova A." }],
        "groups": [{ "id": 1, "name": "G-1", "students_count": 25 }],
        "buildings": [{ "id": 1, "name": "Main" }],
        "classrooms": [{
            "id": 1, "name": "101", "building_id": 1, "capacity": 30,
            "classroom_type": "LECTURE", "has_projector": true
        }],
        "course_loads": [{
            "id": 1, "discipline_name": "Algebra", "teacher_id": 1, "group_id": 1,
            "semester": 1, "academic_year": "2025/2026",
            "hours_per_semester": 32, "lesson_type": "Лекция"
        }]
    }))
    .unwrap()
}

fn app_with(catalog: Arc<dyn CatalogSource>) -> Router {
    let store: Arc<dyn LessonStore> = Arc::new(InMemoryLessonStore::new());
    let tracker = Arc::new(JobTracker::new(
        catalog,
        Arc::clone(&store),
        TrackerSettings::default(),
    ));
    router(AppState { tracker, store })
}

fn app() -> Router {
    app_with(Arc::new(InMemoryCatalog::new(catalog_data())))
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(json!(null));
    (status, json)
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .uri(uri)
                .method("POST")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(json!(null));
    (status, json)
}

async fn wait_for_job(app: &Router, job_id: &str) -> Value {
    for _ in 0..500 {
        let (status, body) = get(app.clone(), &format!("/api/agent/status/{job_id}")).await;
        assert_eq!(status, StatusCode::OK);
        let state = body["generation"]["status"].as_str().unwrap_or_default();
        if state == "completed" || state == "failed" {
            return body["generation"].clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not finish");
}

/// Holds every catalog load until the test lets it through.
struct GatedCatalog {
    inner: InMemoryCatalog,
    gate: Mutex<Receiver<()>>,
}

impl CatalogSource for GatedCatalog {
    fn load(&self, semester: u8, academic_year: &str) -> Result<Catalog, CatalogError> {
        let _ = self.gate.lock().recv_timeout(Duration::from_secs(5));
        self.inner.load(semester, academic_year)
    }
}

fn gated_app() -> (Router, Sender<()>) {
    let (open, gate) = channel();
    let catalog = GatedCatalog {
        inner: InMemoryCatalog::new(catalog_data()),
        gate: Mutex::new(gate),
    };
    (app_with(Arc::new(catalog)), open)
}

#[tokio::test]
async fn health_is_up() {
    let (status, body) = get(app(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "UP");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn generate_then_poll_then_read_schedule() {
    let app = app();
    let (status, body) = post_json(app.clone(), "/api/agent/generate", json!({ "semester": 1 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let generation = wait_for_job(&app, &job_id).await;
    assert_eq!(generation["status"], "completed");
    assert_eq!(generation["best_score"], 0);
    assert_eq!(generation["progress_percentage"], 100);
    assert_eq!(generation["lessons_committed"], 1);
    assert_eq!(generation["academic_year"], "2025/2026");

    let (status, body) = get(app.clone(), "/api/schedule/group/1?semester=1").await;
    assert_eq!(status, StatusCode::OK);
    let lessons = body["lessons"].as_array().unwrap();
    assert_eq!(lessons.len(), 1);
    assert_eq!(lessons[0]["discipline_name"], "Algebra");
    assert_eq!(lessons[0]["classroom_name"], "101");
    assert_eq!(lessons[0]["building_name"], "Main");
    assert_eq!(lessons[0]["day_of_week"], 1);

    // Monday is day 0 on the wire
    let (_, monday) = get(app.clone(), "/api/schedule/teacher/1?semester=1&day_of_week=0").await;
    assert_eq!(monday["lessons"].as_array().unwrap().len(), 1);
    let (_, tuesday) = get(app.clone(), "/api/schedule/teacher/1?semester=1&day_of_week=1").await;
    assert!(tuesday["lessons"].as_array().unwrap().is_empty());
    let (_, odd) = get(app, "/api/schedule/teacher/1?semester=1&week_type=odd").await;
    assert_eq!(odd["lessons"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_requests_are_400() {
    let app = app();
    for body in [
        json!({ "semester": 0 }),
        json!({ "semester": 13 }),
        json!({ "semester": 1, "max_iterations": 0 }),
        json!({ "semester": 1, "academic_year": "2025" }),
        json!({ "semester": "fall" }),
        json!({}),
    ] {
        let (status, response) = post_json(app.clone(), "/api/agent/generate", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["success"], false);
        assert!(response["error"].is_string());
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/agent/generate")
                .method("POST")
                .header("content-type", "application/json")
                .body(Body::from("{\"semester\": 1"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, _) = get(app.clone(), "/api/schedule/group/1?semester=1&day_of_week=6").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get(app, "/api/schedule/group/1?semester=1&week_type=weekly").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_job_is_404() {
    let (status, body) = get(
        app(),
        "/api/agent/status/00000000-0000-4000-8000-000000000000",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let (status, _) = get(app(), "/api/agent/status/not-a-job").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn second_run_for_a_busy_semester_is_409() {
    let (app, open) = gated_app();
    let (status, body) = post_json(app.clone(), "/api/agent/generate", json!({ "semester": 1 })).await;
    assert_eq!(status, StatusCode::OK);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let (status, body) = post_json(
        app.clone(),
        "/api/agent/generate",
        json!({ "semester": 1, "academic_year": "2025/2026", "skip_stage2": true }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains(&job_id));

    open.send(()).unwrap();
    let generation = wait_for_job(&app, &job_id).await;
    assert_eq!(generation["status"], "completed");

    open.send(()).unwrap();
    let (status, _) = post_json(app, "/api/agent/generate", json!({ "semester": 1 })).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn demo_catalog_generates() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/catalog.json");
    let catalog = InMemoryCatalog::from_file(&path).unwrap();
    let app = app_with(Arc::new(catalog));
    let (status, body) = post_json(
        app.clone(),
        "/api/agent/generate",
        json!({ "semester": 1, "max_iterations": 20 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let generation = wait_for_job(&app, body["job_id"].as_str().unwrap()).await;
    assert_eq!(generation["status"], "completed");
    assert!(generation["lessons_committed"].as_u64().unwrap() > 0);
    assert!(generation["last_reasoning"].is_string());
}
