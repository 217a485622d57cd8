use crate::catalog::{CatalogData, CatalogSource, HttpCatalog, InMemoryCatalog};
use crate::error::CatalogError;
use crate::optimizer::OptimizerSettings;
use crate::tracker::TrackerSettings;
use chrono::TimeDelta;
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Parser)]
#[command(name = "timetable_solver", about = "University timetable generation service")]
pub struct Config {
    /// Address the HTTP API listens on
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:8080")]
    pub bind: String,

    /// Default log filter (RUST_LOG takes precedence)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Base URL of the scheduling REST API the catalog is read from
    #[arg(long, env = "CATALOG_URL", conflicts_with = "catalog_file")]
    pub catalog_url: Option<String>,

    /// Bearer token sent to the catalog API
    #[arg(long, env = "CATALOG_TOKEN")]
    pub catalog_token: Option<String>,

    /// JSON file holding the whole catalog, for local runs
    #[arg(long, env = "CATALOG_FILE")]
    pub catalog_file: Option<PathBuf>,

    /// Academic year used when a request does not name one
    #[arg(long, env = "ACADEMIC_YEAR", default_value = "2025/2026")]
    pub academic_year: String,

    /// Iteration budget used when a request does not set one
    #[arg(long, default_value_t = 100)]
    pub max_iterations: u32,

    /// Iterations without improvement before a run stops (0 to disable)
    #[arg(long, default_value_t = 15)]
    pub stall_window: u32,

    /// Occurrences ruined per optimizer iteration
    #[arg(long, default_value_t = 8)]
    pub ruin_size: usize,

    /// Most lessons a teacher or group may have per day (0 to disable)
    #[arg(long, default_value_t = 4)]
    pub max_lessons_per_day: u8,

    /// Seed of the optimizer's random number generator
    #[arg(long, env = "SOLVER_SEED", default_value_t = 1234)]
    pub seed: u64,

    /// Seconds a finished job stays queryable
    #[arg(long, default_value_t = 3600)]
    pub job_retention_secs: u64,

    /// Seconds between sweeps of expired jobs
    #[arg(long, default_value_t = 60)]
    pub gc_interval_secs: u64,
}

impl Config {
    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            default_academic_year: self.academic_year.clone(),
            default_max_iterations: self.max_iterations,
            optimizer: OptimizerSettings {
                max_iterations: self.max_iterations,
                stall_window: self.stall_window,
                ruin_size: self.ruin_size,
                seed: self.seed,
            },
            daily_cap: (self.max_lessons_per_day > 0).then_some(self.max_lessons_per_day),
            retention: TimeDelta::seconds(self.job_retention_secs.min(i64::MAX as u64) as i64),
        }
    }

    pub fn catalog_source(&self) -> Result<Arc<dyn CatalogSource>, CatalogError> {
        if let Some(url) = &self.catalog_url {
            info!("reading catalog from {url}");
            return Ok(Arc::new(HttpCatalog::new(
                url.clone(),
                self.catalog_token.clone(),
            )));
        }
        if let Some(path) = &self.catalog_file {
            info!("reading catalog from {}", path.display());
            return Ok(Arc::new(InMemoryCatalog::from_file(path)?));
        }
        warn!("no catalog configured, every run will see an empty catalog");
        Ok(Arc::new(InMemoryCatalog::new(CatalogData::default())))
    }
}
