//! Domain catalog: the read-only snapshot a generation run works from.
//!
//! A [`CatalogSource`] produces a validated [`Catalog`] for one
//! (semester, academic year). Two sources exist: [`InMemoryCatalog`], which
//! holds a [`CatalogData`] document (optionally read from a JSON file), and
//! [`HttpCatalog`], which reads the REST API of the scheduling backend.
//!
//! Any dangling reference is fatal: a missing group or teacher would silently
//! drop a requirement from the optimization, so the run fails instead.

use crate::data::{
    Building, BuildingId, Classroom, ClassroomId, CourseLoad, Day, Group, GroupId, Slot, Teacher,
    TeacherId, TeacherPreference, is_valid_day, is_valid_slot,
};
use crate::error::CatalogError;
use itertools::Itertools;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Largest page the backend list endpoints serve.
const PAGE_SIZE: u32 = 100;

pub trait CatalogSource: Send + Sync {
    fn load(&self, semester: u8, academic_year: &str) -> Result<Catalog, CatalogError>;
}

/// Raw catalog document, as stored in a catalog file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogData {
    #[serde(default)]
    pub teachers: Vec<Teacher>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub buildings: Vec<Building>,
    #[serde(default)]
    pub classrooms: Vec<Classroom>,
    #[serde(default)]
    pub course_loads: Vec<CourseLoad>,
    #[serde(default)]
    pub preferences: Vec<TeacherPreference>,
}

/// Validated snapshot for one (semester, academic year).
#[derive(Debug, Clone)]
pub struct Catalog {
    pub semester: u8,
    pub academic_year: String,
    pub course_loads: Vec<CourseLoad>,
    pub teachers: HashMap<TeacherId, Teacher>,
    pub groups: HashMap<GroupId, Group>,
    pub buildings: HashMap<BuildingId, Building>,
    /// Active classrooms only, ordered by id.
    pub classrooms: Vec<Classroom>,
    pub preferences: Vec<TeacherPreference>,
}

impl Catalog {
    pub fn assemble(
        data: CatalogData,
        semester: u8,
        academic_year: &str,
    ) -> Result<Self, CatalogError> {
        let teachers: HashMap<TeacherId, Teacher> =
            data.teachers.into_iter().map(|t| (t.id, t)).collect();
        let groups: HashMap<GroupId, Group> = data.groups.into_iter().map(|g| (g.id, g)).collect();
        let buildings: HashMap<BuildingId, Building> =
            data.buildings.into_iter().map(|b| (b.id, b)).collect();

        let course_loads: Vec<CourseLoad> = data
            .course_loads
            .into_iter()
            .filter(|load| load.semester == semester && load.academic_year == academic_year)
            .sorted_by_key(|load| load.id)
            .collect();

        for load in &course_loads {
            if let Some(group_id) = load.group_id {
                if !groups.contains_key(&group_id) {
                    return Err(CatalogError::MissingGroup {
                        course_load_id: load.id,
                        group_id,
                    });
                }
            }
            if let Some(teacher_id) = load.teacher_id {
                if !teachers.contains_key(&teacher_id) {
                    return Err(CatalogError::MissingTeacher {
                        course_load_id: load.id,
                        teacher_id,
                    });
                }
            }
        }

        let mut classrooms: Vec<Classroom> = data
            .classrooms
            .into_iter()
            .filter(|room| room.is_active)
            .collect();
        classrooms.sort_by_key(|room| room.id);
        for room in &classrooms {
            if let Some(building_id) = room.building_id {
                if !buildings.contains_key(&building_id) {
                    return Err(CatalogError::MissingBuilding {
                        classroom_id: room.id,
                        building_id,
                    });
                }
            }
        }

        let referenced: Vec<TeacherId> = course_loads
            .iter()
            .filter_map(|load| load.teacher_id)
            .unique()
            .collect();
        let preferences: Vec<TeacherPreference> = data
            .preferences
            .into_iter()
            .filter(|pref| referenced.contains(&pref.teacher_id))
            .filter(|pref| {
                let valid = is_valid_day(pref.day_of_week) && is_valid_slot(pref.time_slot);
                if !valid {
                    warn!(
                        "dropping preference of teacher {} at day {} slot {}: outside Mon-Sat x 1-6",
                        pref.teacher_id, pref.day_of_week, pref.time_slot
                    );
                }
                valid
            })
            .collect();

        info!(
            "catalog for semester {} {}: {} course loads, {} classrooms, {} groups, {} preferences",
            semester,
            academic_year,
            course_loads.len(),
            classrooms.len(),
            groups.len(),
            preferences.len()
        );

        Ok(Catalog {
            semester,
            academic_year: academic_year.to_string(),
            course_loads,
            teachers,
            groups,
            buildings,
            classrooms,
            preferences,
        })
    }

    pub fn classroom(&self, id: ClassroomId) -> Option<&Classroom> {
        self.classrooms
            .binary_search_by_key(&id, |room| room.id)
            .ok()
            .map(|index| &self.classrooms[index])
    }

    pub fn building_name(&self, classroom: &Classroom) -> Option<String> {
        classroom
            .building_id
            .and_then(|id| self.buildings.get(&id))
            .map(|building| building.name.clone())
    }

    /// Teacher display name, preferring the catalog over the load's copy.
    pub fn teacher_name(&self, load: &CourseLoad) -> String {
        load.teacher_id
            .and_then(|id| self.teachers.get(&id))
            .map(|teacher| teacher.full_name.clone())
            .filter(|name| !name.is_empty())
            .or_else(|| load.teacher_name.clone())
            .unwrap_or_default()
    }

    pub fn group_name(&self, load: &CourseLoad) -> String {
        load.group_id
            .and_then(|id| self.groups.get(&id))
            .map(|group| group.name.clone())
            .filter(|name| !name.is_empty())
            .or_else(|| load.group_name.clone())
            .unwrap_or_default()
    }
}

/// Catalog held in memory; the file-backed source for local runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    data: RwLock<CatalogData>,
}

impl InMemoryCatalog {
    pub fn new(data: CatalogData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)?;
        let data: CatalogData = serde_json::from_str(&text)?;
        info!(
            "loaded catalog file {} ({} course loads)",
            path.display(),
            data.course_loads.len()
        );
        Ok(Self::new(data))
    }

    pub fn replace(&self, data: CatalogData) {
        *self.data.write() = data;
    }
}

impl CatalogSource for InMemoryCatalog {
    fn load(&self, semester: u8, academic_year: &str) -> Result<Catalog, CatalogError> {
        let data = self.data.read().clone();
        Catalog::assemble(data, semester, academic_year)
    }
}

#[derive(Debug, Deserialize)]
struct PreferenceRow {
    day_of_week: Day,
    time_slot: Slot,
    #[serde(default)]
    is_preferred: Option<bool>,
}

/// Catalog read from the backend REST API.
pub struct HttpCatalog {
    base_url: String,
    token: Option<String>,
    agent: ureq::Agent,
}

impl HttpCatalog {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(30)))
            .build();
        Self::with_agent(base_url, token, ureq::Agent::new_with_config(config))
    }

    /// Uses a caller-configured agent (proxy, TLS, timeouts).
    pub fn with_agent(base_url: impl Into<String>, token: Option<String>, agent: ureq::Agent) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            agent,
        }
    }

    /// GET a JSON document. `Ok(None)` means the resource does not exist.
    fn fetch(&self, path: &str, query: &[(&str, String)]) -> Result<Option<Value>, CatalogError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let mut request = self.agent.get(&url);
        for (key, value) in query {
            request = request.query(*key, value);
        }
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        match request.call() {
            Ok(mut response) => response
                .body_mut()
                .read_json::<Value>()
                .map(Some)
                .map_err(|e| CatalogError::Decode {
                    what: url.clone(),
                    message: e.to_string(),
                }),
            Err(ureq::Error::StatusCode(404)) => Ok(None),
            Err(e) => Err(CatalogError::Transport {
                url,
                message: e.to_string(),
            }),
        }
    }

    /// Reads every page of a list endpoint.
    ///
    /// Pages are requested until `total_pages` (or `total_count`) says the
    /// listing is complete. A response without either is a single page.
    /// Fewer items than the backend's `total_count` is a decode error, so a
    /// truncated listing never reaches the optimizer.
    fn fetch_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        key: &str,
    ) -> Result<Vec<T>, CatalogError> {
        let mut items = Vec::new();
        let mut page: u64 = 1;
        loop {
            let mut paged = query.to_vec();
            paged.push(("page", page.to_string()));
            paged.push(("page_size", PAGE_SIZE.to_string()));
            let value = self.fetch(path, &paged)?.ok_or_else(|| CatalogError::Transport {
                url: format!("{}{}", self.base_url, path),
                message: "not found".to_string(),
            })?;
            let total_pages = value.get("total_pages").and_then(Value::as_u64);
            let total_count = value.get("total_count").and_then(Value::as_u64);
            let batch: Vec<T> = decode_list(value, key, path)?;
            let received = batch.len();
            items.extend(batch);

            let more = received > 0
                && match (total_pages, total_count) {
                    (Some(pages), _) => page < pages,
                    (None, Some(count)) => (items.len() as u64) < count,
                    (None, None) => false,
                };
            if more {
                page += 1;
                continue;
            }
            if let Some(count) = total_count {
                if (items.len() as u64) < count {
                    return Err(CatalogError::Decode {
                        what: path.to_string(),
                        message: format!(
                            "backend reports {count} items but {} pages returned {}",
                            page,
                            items.len()
                        ),
                    });
                }
            }
            debug!("{}: {} items over {} pages", path, items.len(), page);
            return Ok(items);
        }
    }
}

/// Accepts a bare array or an object wrapping the array under `key` (or one
/// of the usual envelope names).
fn decode_list<T: DeserializeOwned>(value: Value, key: &str, what: &str) -> Result<Vec<T>, CatalogError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => [key, "items", "data", "results"]
            .iter()
            .find_map(|k| match map.remove(*k) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| CatalogError::Decode {
                what: what.to_string(),
                message: format!("no '{key}' list in response"),
            })?,
        other => {
            return Err(CatalogError::Decode {
                what: what.to_string(),
                message: format!("expected a list, got {other}"),
            });
        }
    };
    serde_json::from_value(Value::Array(items)).map_err(|e| CatalogError::Decode {
        what: what.to_string(),
        message: e.to_string(),
    })
}

impl CatalogSource for HttpCatalog {
    fn load(&self, semester: u8, academic_year: &str) -> Result<Catalog, CatalogError> {
        let query = [
            ("semester", semester.to_string()),
            ("academic_year", academic_year.to_string()),
        ];
        let course_loads: Vec<CourseLoad> =
            self.fetch_list("/api/course-loads", &query, "course_loads")?;
        let classrooms: Vec<Classroom> = self.fetch_list("/api/classrooms", &[], "classrooms")?;
        let buildings: Vec<Building> = self.fetch_list("/api/buildings", &[], "buildings")?;
        let groups: Vec<Group> = self.fetch_list("/api/groups", &[], "groups")?;

        let mut teachers = Vec::new();
        let mut preferences = Vec::new();
        let referenced = course_loads
            .iter()
            .filter(|load| load.semester == semester && load.academic_year == academic_year)
            .filter_map(|load| load.teacher_id.map(|id| (id, load.teacher_name.clone())))
            .unique_by(|(id, _)| *id);
        for (teacher_id, name) in referenced {
            let path = format!("/api/teachers/{teacher_id}/preferences");
            // A 404 leaves the teacher out; assembly then reports it as missing.
            let Some(value) = self.fetch(&path, &[])? else {
                warn!("teacher {} not found in backend", teacher_id);
                continue;
            };
            let priority = value
                .get("teacher_priority")
                .and_then(Value::as_u64)
                .and_then(|p| u8::try_from(p).ok());
            let full_name = name
                .or_else(|| value.get("teacher_name").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_default();
            let rows: Vec<PreferenceRow> = decode_list(value, "preferences", &path)?;
            preferences.extend(rows.into_iter().map(|row| TeacherPreference {
                teacher_id,
                day_of_week: row.day_of_week,
                time_slot: row.time_slot,
                is_preferred: row.is_preferred,
            }));
            teachers.push(Teacher {
                id: teacher_id,
                full_name,
                priority,
            });
        }

        Catalog::assemble(
            CatalogData {
                teachers,
                groups,
                buildings,
                classrooms,
                course_loads,
                preferences,
            },
            semester,
            academic_year,
        )
    }
}
