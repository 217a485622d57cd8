//! Job tracker: accepts generation requests, runs them in the background and
//! keeps their status for polling.
//!
//! At most one job runs per (semester, academic year). The pair is reserved
//! when a job is accepted and released when its worker finishes, fails or
//! panics. Finished jobs are kept for the retention window, reported stale
//! after it, and dropped by `collect_garbage`.

use crate::catalog::CatalogSource;
use crate::data::{Unplaced, UnmetSoftConstraint};
use crate::error::GenerationError;
use crate::optimizer::{self, OptimizerSettings, Outcome, Progress, StageMode};
use crate::problem::{Problem, Timetable};
use crate::store::LessonStore;
use chrono::{DateTime, TimeDelta, Utc};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub const MAX_SEMESTER: i64 = 12;
pub const MAX_ITERATIONS_LIMIT: i64 = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub semester: i64,
    #[serde(default)]
    pub academic_year: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<i64>,
    #[serde(default)]
    pub skip_stage1: bool,
    #[serde(default)]
    pub skip_stage2: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    LoadingCatalog,
    Optimizing,
    Committing,
    Done,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationStatus {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub stage: Stage,
    pub mode: StageMode,
    pub semester: u8,
    pub academic_year: String,
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub current_score: Option<u64>,
    pub best_score: Option<u64>,
    pub progress_percentage: u8,
    pub last_reasoning: Option<String>,
    pub error: Option<String>,
    pub unplaced: Vec<Unplaced>,
    pub unmet_soft_constraints: Vec<UnmetSoftConstraint>,
    pub lessons_committed: usize,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stale: bool,
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub default_academic_year: String,
    pub default_max_iterations: u32,
    /// Search knobs; `max_iterations` is taken from each request.
    pub optimizer: OptimizerSettings,
    pub daily_cap: Option<u8>,
    pub retention: TimeDelta,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            default_academic_year: "2025/2026".to_string(),
            default_max_iterations: 100,
            optimizer: OptimizerSettings::default(),
            daily_cap: Some(4),
            retention: TimeDelta::hours(1),
        }
    }
}

/// A request that passed validation.
#[derive(Debug, Clone)]
struct Job {
    semester: u8,
    academic_year: String,
    max_iterations: u32,
    mode: StageMode,
}

type PairKey = (u8, String);

#[derive(Default)]
struct TrackerState {
    jobs: HashMap<Uuid, GenerationStatus>,
    active: HashMap<PairKey, Uuid>,
}

pub struct JobTracker {
    catalog: Arc<dyn CatalogSource>,
    store: Arc<dyn LessonStore>,
    settings: TrackerSettings,
    state: Mutex<TrackerState>,
}

/// Holds a (semester, academic year) pair for one job; dropping it frees the
/// pair.
struct Reservation {
    tracker: Arc<JobTracker>,
    key: PairKey,
    job_id: Uuid,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut state = self.tracker.state.lock();
        if state.active.get(&self.key) == Some(&self.job_id) {
            state.active.remove(&self.key);
        }
    }
}

struct Committed {
    outcome: Outcome,
    lessons: usize,
}

fn is_academic_year(value: &str) -> bool {
    let Some((first, second)) = value.split_once('/') else {
        return false;
    };
    if first.len() != 4 || second.len() != 4 {
        return false;
    }
    match (first.parse::<u32>(), second.parse::<u32>()) {
        (Ok(first), Ok(second)) => second == first + 1,
        _ => false,
    }
}

impl JobTracker {
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        store: Arc<dyn LessonStore>,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            catalog,
            store,
            settings,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    fn validate(&self, request: GenerationRequest) -> Result<Job, GenerationError> {
        if !(1..=MAX_SEMESTER).contains(&request.semester) {
            return Err(GenerationError::Validation(format!(
                "semester must be between 1 and {MAX_SEMESTER}, got {}",
                request.semester
            )));
        }
        let max_iterations = match request.max_iterations {
            None => self.settings.default_max_iterations,
            Some(n) if (1..=MAX_ITERATIONS_LIMIT).contains(&n) => n as u32,
            Some(n) => {
                return Err(GenerationError::Validation(format!(
                    "max_iterations must be between 1 and {MAX_ITERATIONS_LIMIT}, got {n}"
                )));
            }
        };
        let academic_year = request
            .academic_year
            .map(|year| year.trim().to_string())
            .unwrap_or_else(|| self.settings.default_academic_year.clone());
        if !is_academic_year(&academic_year) {
            return Err(GenerationError::Validation(format!(
                "academic_year must look like 2025/2026, got {academic_year:?}"
            )));
        }
        Ok(Job {
            semester: request.semester as u8,
            academic_year,
            max_iterations,
            mode: StageMode::from_flags(request.skip_stage1, request.skip_stage2),
        })
    }

    /// Validates the request, reserves its pair and starts the run on a
    /// blocking worker. Returns as soon as the job is registered.
    pub fn submit(self: &Arc<Self>, request: GenerationRequest) -> Result<Uuid, GenerationError> {
        let job = self.validate(request)?;
        let job_id = Uuid::new_v4();
        let key = (job.semester, job.academic_year.clone());

        {
            let mut state = self.state.lock();
            if let Some(running) = state.active.get(&key) {
                return Err(GenerationError::Conflict {
                    semester: job.semester,
                    academic_year: job.academic_year,
                    job_id: *running,
                });
            }
            state.active.insert(key.clone(), job_id);
            state.jobs.insert(
                job_id,
                GenerationStatus {
                    job_id,
                    status: JobStatus::Pending,
                    stage: Stage::Queued,
                    mode: job.mode,
                    semester: job.semester,
                    academic_year: job.academic_year.clone(),
                    current_iteration: 0,
                    max_iterations: job.max_iterations,
                    current_score: None,
                    best_score: None,
                    progress_percentage: 0,
                    last_reasoning: None,
                    error: None,
                    unplaced: Vec::new(),
                    unmet_soft_constraints: Vec::new(),
                    lessons_committed: 0,
                    created_at: Utc::now(),
                    finished_at: None,
                    stale: false,
                },
            );
        }
        let reservation = Reservation {
            tracker: Arc::clone(self),
            key,
            job_id,
        };
        info!(
            "accepted job {job_id}: semester {} of {}, {:?}, up to {} iterations",
            job.semester, job.academic_year, job.mode, job.max_iterations
        );

        let tracker = Arc::clone(self);
        let worker = tokio::task::spawn_blocking(move || tracker.run(job_id, job, reservation));
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = worker.await {
                error!("job {job_id} worker died: {err}");
                tracker.finish(
                    job_id,
                    Err(GenerationError::Failed("generation worker panicked".to_string())),
                );
            }
        });
        Ok(job_id)
    }

    pub fn get_status(&self, job_id: Uuid) -> Result<GenerationStatus, GenerationError> {
        let state = self.state.lock();
        let mut status = state
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| GenerationError::NotFound(job_id.to_string()))?;
        status.stale = self.is_expired(&status, Utc::now());
        Ok(status)
    }

    /// Drops finished jobs older than the retention window. Returns how many
    /// were dropped.
    pub fn collect_garbage(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock();
        let before = state.jobs.len();
        state.jobs.retain(|_, status| !self.is_expired(status, now));
        let dropped = before - state.jobs.len();
        if dropped > 0 {
            info!("dropped {dropped} expired generation jobs");
        }
        dropped
    }

    fn is_expired(&self, status: &GenerationStatus, now: DateTime<Utc>) -> bool {
        status.status.is_terminal()
            && status
                .finished_at
                .is_some_and(|finished| finished + self.settings.retention <= now)
    }

    fn update(&self, job_id: Uuid, apply: impl FnOnce(&mut GenerationStatus)) {
        if let Some(status) = self.state.lock().jobs.get_mut(&job_id) {
            apply(status);
        }
    }

    fn run(&self, job_id: Uuid, job: Job, reservation: Reservation) {
        self.update(job_id, |status| {
            status.status = JobStatus::Running;
            status.stage = Stage::LoadingCatalog;
        });
        let result = self.generate(job_id, &job);
        drop(reservation);
        self.finish(job_id, result);
    }

    fn generate(&self, job_id: Uuid, job: &Job) -> Result<Committed, GenerationError> {
        let catalog = self.catalog.load(job.semester, &job.academic_year)?;
        let problem = Problem::build(catalog, self.settings.daily_cap);
        info!(
            "job {job_id}: {} occurrences from {} requests, {} classrooms",
            problem.occurrences.len(),
            problem.requests.len(),
            problem.catalog.classrooms.len()
        );

        let initial = if job.mode.needs_persisted() {
            let persisted = self.store.lessons(job.semester, &job.academic_year)?;
            if !job.mode.runs_stage1() && persisted.is_empty() {
                return Err(GenerationError::Failed(format!(
                    "stage 1 skipped but semester {} of {} has no schedule to reuse",
                    job.semester, job.academic_year
                )));
            }
            problem.timetable_from_lessons(&persisted)?
        } else {
            Timetable::empty(problem.occurrences.len())
        };

        self.update(job_id, |status| status.stage = Stage::Optimizing);
        let settings = OptimizerSettings {
            max_iterations: job.max_iterations,
            ..self.settings.optimizer.clone()
        };
        let outcome = optimizer::optimize(&problem, job.mode, &settings, initial, |progress| {
            self.record_progress(job_id, progress)
        });

        self.update(job_id, |status| status.stage = Stage::Committing);
        let lessons = problem.lessons(&outcome.timetable, job.mode.rooms_required());
        let count = lessons.len();
        self.store
            .replace(job.semester, &job.academic_year, lessons)?;
        Ok(Committed {
            outcome,
            lessons: count,
        })
    }

    fn record_progress(&self, job_id: Uuid, progress: &Progress) {
        self.update(job_id, |status| {
            status.current_iteration = progress.iteration;
            status.current_score = Some(progress.current_score);
            status.best_score = Some(progress.best_score);
            status.progress_percentage =
                (u64::from(progress.iteration) * 100 / u64::from(progress.max_iterations.max(1)))
                    .min(99) as u8;
            status.last_reasoning = Some(progress.reasoning.clone());
        });
    }

    fn finish(&self, job_id: Uuid, result: Result<Committed, GenerationError>) {
        self.update(job_id, |status| {
            if status.status.is_terminal() {
                return;
            }
            status.finished_at = Some(Utc::now());
            match result {
                Ok(Committed { outcome, lessons }) => {
                    info!(
                        "job {job_id} completed: {lessons} lessons, score {}",
                        outcome.report.score
                    );
                    status.status = JobStatus::Completed;
                    status.stage = Stage::Done;
                    status.current_iteration = outcome.iterations;
                    status.current_score = Some(outcome.report.score);
                    status.best_score = Some(outcome.report.score);
                    status.progress_percentage = 100;
                    status.last_reasoning = Some(outcome.reasoning);
                    status.unplaced = outcome.unplaced;
                    status.unmet_soft_constraints = outcome.unmet;
                    status.lessons_committed = lessons;
                }
                Err(err) => {
                    warn!("job {job_id} failed: {err}");
                    status.status = JobStatus::Failed;
                    status.error = Some(err.to_string());
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::catalog::tests::{base_data, load, room};
    use crate::store::InMemoryLessonStore;
    use std::time::Duration;

    fn tracker_with(
        data: crate::catalog::CatalogData,
        settings: TrackerSettings,
    ) -> (Arc<JobTracker>, Arc<InMemoryLessonStore>) {
        let store = Arc::new(InMemoryLessonStore::new());
        let tracker = Arc::new(JobTracker::new(
            Arc::new(InMemoryCatalog::new(data)),
            store.clone(),
            settings,
        ));
        (tracker, store)
    }

    fn request(skip_stage1: bool, skip_stage2: bool) -> GenerationRequest {
        GenerationRequest {
            semester: 1,
            skip_stage1,
            skip_stage2,
            ..GenerationRequest::default()
        }
    }

    async fn wait_for(tracker: &JobTracker, job_id: Uuid) -> GenerationStatus {
        for _ in 0..500 {
            let status = tracker.get_status(job_id).unwrap();
            if status.status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[tokio::test]
    async fn completes_and_commits() {
        let (tracker, store) = tracker_with(base_data(), TrackerSettings::default());
        let job_id = tracker.submit(request(false, false)).unwrap();
        let status = wait_for(&tracker, job_id).await;

        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.best_score, Some(0));
        assert_eq!(status.progress_percentage, 100);
        assert_eq!(status.lessons_committed, 1);
        assert!(!status.stale);
        let lessons = store.lessons(1, "2025/2026").unwrap();
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0].classroom_id, Some(1));
        assert_eq!(lessons[0].building_name.as_deref(), Some("Main"));
    }

    #[tokio::test]
    async fn validation_errors() {
        let (tracker, _) = tracker_with(base_data(), TrackerSettings::default());
        let bad = [
            GenerationRequest {
                semester: 0,
                ..GenerationRequest::default()
            },
            GenerationRequest {
                semester: 1,
                max_iterations: Some(0),
                ..GenerationRequest::default()
            },
            GenerationRequest {
                semester: 1,
                max_iterations: Some(-5),
                ..GenerationRequest::default()
            },
            GenerationRequest {
                semester: 1,
                academic_year: Some("2025-2026".to_string()),
                ..GenerationRequest::default()
            },
        ];
        for request in bad {
            assert!(matches!(
                tracker.submit(request),
                Err(GenerationError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn busy_pair_is_a_conflict() {
        let (tracker, _) = tracker_with(base_data(), TrackerSettings::default());
        let held = Reservation {
            tracker: Arc::clone(&tracker),
            key: (1, "2025/2026".to_string()),
            job_id: Uuid::new_v4(),
        };
        tracker
            .state
            .lock()
            .active
            .insert(held.key.clone(), held.job_id);

        let err = tracker.submit(request(false, false)).unwrap_err();
        assert!(matches!(err, GenerationError::Conflict { job_id, .. } if job_id == held.job_id));

        // another pair is not affected
        let other = GenerationRequest {
            semester: 2,
            ..GenerationRequest::default()
        };
        assert!(tracker.submit(other).is_ok());

        drop(held);
        assert!(tracker.submit(request(false, false)).is_ok());
    }

    #[tokio::test]
    async fn pair_is_free_again_after_completion() {
        let (tracker, _) = tracker_with(base_data(), TrackerSettings::default());
        let first = tracker.submit(request(false, false)).unwrap();
        wait_for(&tracker, first).await;
        let second = tracker.submit(request(false, false)).unwrap();
        assert_eq!(wait_for(&tracker, second).await.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (tracker, _) = tracker_with(base_data(), TrackerSettings::default());
        assert!(matches!(
            tracker.get_status(Uuid::new_v4()),
            Err(GenerationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn catalog_error_fails_the_job_and_commits_nothing() {
        let mut data = base_data();
        data.course_loads.push(load(2, 1, 99, 32));
        let (tracker, store) = tracker_with(data, TrackerSettings::default());
        let job_id = tracker.submit(request(false, false)).unwrap();
        let status = wait_for(&tracker, job_id).await;

        assert_eq!(status.status, JobStatus::Failed);
        assert!(status.error.unwrap().contains("group 99"));
        assert!(store.lessons(1, "2025/2026").unwrap().is_empty());
        // the pair is released on failure too
        assert!(tracker.submit(request(false, false)).is_ok());
    }

    #[tokio::test]
    async fn skipping_stage1_without_a_schedule_fails() {
        let (tracker, _) = tracker_with(base_data(), TrackerSettings::default());
        let job_id = tracker.submit(request(true, false)).unwrap();
        let status = wait_for(&tracker, job_id).await;
        assert_eq!(status.status, JobStatus::Failed);
        assert!(status.error.unwrap().contains("no schedule to reuse"));
    }

    #[tokio::test]
    async fn skipping_both_stages_recommits_the_same_lessons() {
        let mut data = base_data();
        data.course_loads = vec![load(1, 1, 1, 48), load(2, 2, 2, 64), load(3, 1, 2, 32)];
        data.classrooms = vec![room(1, 50, true), room(2, 25, false)];
        let (tracker, store) = tracker_with(data, TrackerSettings::default());

        let first = tracker.submit(request(false, false)).unwrap();
        assert_eq!(wait_for(&tracker, first).await.status, JobStatus::Completed);
        let before = store.lessons(1, "2025/2026").unwrap();

        let again = tracker.submit(request(true, true)).unwrap();
        let status = wait_for(&tracker, again).await;
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(store.lessons(1, "2025/2026").unwrap(), before);
    }

    #[tokio::test]
    async fn skipping_stage2_keeps_classrooms() {
        let mut data = base_data();
        data.course_loads = vec![load(1, 1, 1, 64), load(2, 2, 2, 64)];
        data.classrooms = vec![room(1, 50, true), room(2, 60, true)];
        let (tracker, store) = tracker_with(data, TrackerSettings::default());

        let first = tracker.submit(request(false, false)).unwrap();
        wait_for(&tracker, first).await;
        let rooms_before: HashMap<(u32, u8), Option<u32>> = store
            .lessons(1, "2025/2026")
            .unwrap()
            .iter()
            .map(|l| ((l.course_load_id, l.occurrence), l.classroom_id))
            .collect();

        let again = tracker.submit(request(false, true)).unwrap();
        assert_eq!(wait_for(&tracker, again).await.status, JobStatus::Completed);
        let after = store.lessons(1, "2025/2026").unwrap();
        assert_eq!(after.len(), rooms_before.len());
        for lesson in after {
            assert_eq!(
                rooms_before[&(lesson.course_load_id, lesson.occurrence)],
                lesson.classroom_id
            );
        }
    }

    #[tokio::test]
    async fn expired_jobs_are_stale_then_collected() {
        let settings = TrackerSettings {
            retention: TimeDelta::zero(),
            ..TrackerSettings::default()
        };
        let (tracker, _) = tracker_with(base_data(), settings);
        let job_id = tracker.submit(request(false, false)).unwrap();
        let status = wait_for(&tracker, job_id).await;
        assert!(status.stale);

        assert_eq!(tracker.collect_garbage(), 1);
        assert!(tracker.get_status(job_id).is_err());
    }

    #[test]
    fn academic_year_format() {
        assert!(is_academic_year("2025/2026"));
        assert!(!is_academic_year("2025/2027"));
        assert!(!is_academic_year("25/26"));
        assert!(!is_academic_year("2025"));
    }
}
