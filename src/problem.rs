//! The placement problem derived from a catalog.
//!
//! Course loads are expanded into lesson slot requests and those into
//! individual weekly occurrences, the unit both stages place.

use crate::catalog::Catalog;
use crate::data::{
    Cell, ClassroomId, CourseLoad, CourseLoadId, DAYS_PER_WEEK, Day, GroupId, Lesson, SLOTS_PER_DAY,
    Slot, TeacherId, Unplaced, WeekGrid, WeekType,
};
use crate::error::CatalogError;
use crate::requirements::ClassroomRequirements;
use log::{debug, warn};
use serde::Serialize;
use std::collections::HashMap;

/// Weeks in a semester.
pub const WEEKS_PER_SEMESTER: u32 = 16;
/// Academic hours in one lesson ("pair").
pub const HOURS_PER_LESSON: u32 = 2;
/// Upper bound on weekly occurrences of a single course load.
pub const MAX_WEEKLY_OCCURRENCES: u32 = DAYS_PER_WEEK as u32 * SLOTS_PER_DAY as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekTypePolicy {
    EveryWeek,
    /// Runs every other week; the assignor picks odd or even.
    Alternating,
}

impl WeekTypePolicy {
    pub fn week_types(self) -> &'static [WeekType] {
        match self {
            WeekTypePolicy::EveryWeek => &[WeekType::Both],
            WeekTypePolicy::Alternating => &WeekType::PARITIES,
        }
    }
}

/// How many lessons per week a course load needs.
///
/// One unit is one lesson every other week over the semester (16 hours);
/// two units make an every-week lesson. Returns (every-week occurrences,
/// whether one extra alternating occurrence is needed). A load with no
/// hours needs nothing; any other load gets at least one unit.
pub fn weekly_occurrences(hours_per_semester: u32) -> (u32, bool) {
    if hours_per_semester == 0 {
        return (0, false);
    }
    let unit_hours = HOURS_PER_LESSON * WEEKS_PER_SEMESTER / 2;
    let units = ((hours_per_semester + unit_hours / 2) / unit_hours)
        .clamp(1, MAX_WEEKLY_OCCURRENCES * 2);
    let every_week = units / 2;
    let alternating = units % 2 == 1 && every_week < MAX_WEEKLY_OCCURRENCES;
    (every_week, alternating)
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonSlotRequest {
    pub id: usize,
    pub course_load_id: CourseLoadId,
    #[serde(skip)]
    pub load_index: usize,
    pub teacher_id: TeacherId,
    pub group_id: GroupId,
    pub group_size: u32,
    pub lesson_type: String,
    pub required_weekly_occurrences: u32,
    pub week_type_policy: WeekTypePolicy,
    pub requirements: ClassroomRequirements,
    /// Index within the course load of this request's first occurrence.
    pub first_occurrence: u8,
}

/// One weekly occurrence of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OccurrenceKey {
    pub request: usize,
    /// Index within the course load.
    pub occurrence: u8,
}

/// Multiplier on a teacher's preference misses by staffing priority.
///
/// External part-timers (1) have the least room to move their other
/// commitments, full-time staff (4) the most. Unknown priority weighs as
/// full-time staff.
pub fn priority_weight(priority: Option<u8>) -> u32 {
    match priority {
        Some(1) => 16,
        Some(2) => 6,
        Some(3) => 3,
        _ => 1,
    }
}

/// Teacher preferences indexed for constant-time cost lookups.
#[derive(Debug, Clone, Default)]
pub struct PreferenceTable {
    table: HashMap<TeacherId, [[Option<bool>; SLOTS_PER_DAY as usize]; DAYS_PER_WEEK as usize]>,
    weights: HashMap<TeacherId, u32>,
}

impl PreferenceTable {
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let mut table = PreferenceTable::default();
        for pref in &catalog.preferences {
            let grid = table.table.entry(pref.teacher_id).or_default();
            grid[usize::from(pref.day_of_week - 1)][usize::from(pref.time_slot - 1)] =
                pref.is_preferred;
        }
        table.weights = catalog
            .teachers
            .values()
            .map(|teacher| (teacher.id, priority_weight(teacher.priority)))
            .filter(|(_, weight)| *weight > 1)
            .collect();
        table
    }

    /// 0 preferred, 1 unset, 3 not preferred. Teachers without any stated
    /// preference cost nothing anywhere.
    pub fn cost(&self, teacher: TeacherId, day: Day, slot: Slot) -> u32 {
        let Some(grid) = self.table.get(&teacher) else {
            return 0;
        };
        match grid
            .get(usize::from(day.wrapping_sub(1)))
            .and_then(|row| row.get(usize::from(slot.wrapping_sub(1))))
        {
            Some(Some(true)) => 0,
            Some(None) => 1,
            Some(Some(false)) => 3,
            None => 3,
        }
    }

    pub fn weight(&self, teacher: TeacherId) -> u32 {
        self.weights.get(&teacher).copied().unwrap_or(1)
    }

    /// `cost` scaled by the teacher's priority weight.
    pub fn weighted_cost(&self, teacher: TeacherId, day: Day, slot: Slot) -> u32 {
        self.cost(teacher, day, slot) * self.weight(teacher)
    }
}

pub struct Problem {
    pub catalog: Catalog,
    pub requests: Vec<LessonSlotRequest>,
    pub occurrences: Vec<OccurrenceKey>,
    /// Eligible rooms per request, smallest capacity first.
    pub eligible_rooms: Vec<Vec<ClassroomId>>,
    pub preferences: PreferenceTable,
    /// Course loads that cannot be expanded at all.
    pub rejected: Vec<Unplaced>,
    /// Hard cap on lessons per day for a teacher or a group.
    pub daily_cap: Option<u8>,
    index: HashMap<(CourseLoadId, u8), usize>,
}

impl Problem {
    pub fn build(catalog: Catalog, daily_cap: Option<u8>) -> Self {
        let mut requests = Vec::new();
        let mut rejected = Vec::new();

        for (load_index, load) in catalog.course_loads.iter().enumerate() {
            let (Some(teacher_id), Some(group_id)) = (load.teacher_id, load.group_id) else {
                warn!(
                    "course load {} ({}) has no teacher or group; it cannot be scheduled",
                    load.id, load.discipline_name
                );
                rejected.push(Unplaced {
                    course_load_id: load.id,
                    discipline_name: load.discipline_name.clone(),
                    occurrence: None,
                    reason: "missing teacher or group".to_string(),
                });
                continue;
            };
            let group_size = catalog.groups.get(&group_id).map_or(0, |g| g.size);
            let requirements = load
                .classroom_requirements
                .as_deref()
                .map(ClassroomRequirements::parse)
                .unwrap_or_default();

            let (every_week, alternating) = weekly_occurrences(load.hours_per_semester);
            debug!(
                "load {} ({} h): {} every-week + {} alternating occurrences",
                load.id,
                load.hours_per_semester,
                every_week,
                u8::from(alternating)
            );
            let make = |id: usize, count: u32, policy: WeekTypePolicy, first: u32| LessonSlotRequest {
                id,
                course_load_id: load.id,
                load_index,
                teacher_id,
                group_id,
                group_size,
                lesson_type: load.lesson_type.clone(),
                required_weekly_occurrences: count,
                week_type_policy: policy,
                requirements: requirements.clone(),
                first_occurrence: first as u8,
            };
            if every_week > 0 {
                let request = make(requests.len(), every_week, WeekTypePolicy::EveryWeek, 0);
                requests.push(request);
            }
            if alternating {
                let request = make(requests.len(), 1, WeekTypePolicy::Alternating, every_week);
                requests.push(request);
            }
        }

        let mut occurrences = Vec::new();
        let mut index = HashMap::new();
        for request in &requests {
            for k in 0..request.required_weekly_occurrences {
                let occurrence = request.first_occurrence + k as u8;
                index.insert((request.course_load_id, occurrence), occurrences.len());
                occurrences.push(OccurrenceKey {
                    request: request.id,
                    occurrence,
                });
            }
        }

        let eligible_rooms = requests
            .iter()
            .map(|request| {
                let mut rooms: Vec<_> = catalog
                    .classrooms
                    .iter()
                    .filter(|room| {
                        room.capacity >= request.group_size && request.requirements.admits(room)
                    })
                    .collect();
                rooms.sort_by_key(|room| (room.capacity, room.id));
                rooms.into_iter().map(|room| room.id).collect()
            })
            .collect();

        Problem {
            preferences: PreferenceTable::from_catalog(&catalog),
            catalog,
            requests,
            occurrences,
            eligible_rooms,
            rejected,
            daily_cap,
            index,
        }
    }

    pub fn request_of(&self, occurrence: usize) -> &LessonSlotRequest {
        &self.requests[self.occurrences[occurrence].request]
    }

    pub fn load_of(&self, occurrence: usize) -> &CourseLoad {
        &self.catalog.course_loads[self.request_of(occurrence).load_index]
    }

    pub fn rooms_for(&self, occurrence: usize) -> &[ClassroomId] {
        &self.eligible_rooms[self.occurrences[occurrence].request]
    }

    pub fn occurrence_index(&self, course_load_id: CourseLoadId, occurrence: u8) -> Option<usize> {
        self.index.get(&(course_load_id, occurrence)).copied()
    }

    /// Priority-weighted preference cost of placing `occurrence` at `cell`.
    pub fn cost_at(&self, occurrence: usize, cell: &Cell) -> u32 {
        let request = self.request_of(occurrence);
        self.preferences
            .weighted_cost(request.teacher_id, cell.day_of_week, cell.time_slot)
    }

    /// Unweighted preference cost: 0, 1 or 3.
    pub fn miss_at(&self, occurrence: usize, cell: &Cell) -> u32 {
        let request = self.request_of(occurrence);
        self.preferences
            .cost(request.teacher_id, cell.day_of_week, cell.time_slot)
    }

    pub fn describe(&self, occurrence: usize, reason: impl Into<String>) -> Unplaced {
        let load = self.load_of(occurrence);
        Unplaced {
            course_load_id: load.id,
            discipline_name: load.discipline_name.clone(),
            occurrence: Some(self.occurrences[occurrence].occurrence),
            reason: reason.into(),
        }
    }

    /// Seeds a timetable from persisted lessons. A lesson whose course load
    /// or occurrence no longer exists is a stale catalog reference.
    pub fn timetable_from_lessons(&self, lessons: &[Lesson]) -> Result<Timetable, CatalogError> {
        let mut timetable = Timetable::empty(self.occurrences.len());
        for lesson in lessons {
            let index = self
                .occurrence_index(lesson.course_load_id, lesson.occurrence)
                .ok_or(CatalogError::StaleLesson {
                    course_load_id: lesson.course_load_id,
                    occurrence: lesson.occurrence,
                })?;
            timetable.times[index] = Some(lesson.cell());
            timetable.rooms[index] = lesson.classroom_id;
        }
        Ok(timetable)
    }

    /// Resolves the timetable into persisted lessons.
    ///
    /// With `require_room` only occurrences holding both a time and a room
    /// become lessons.
    pub fn lessons(&self, timetable: &Timetable, require_room: bool) -> Vec<Lesson> {
        let mut lessons = Vec::new();
        for (index, key) in self.occurrences.iter().enumerate() {
            let Some(cell) = timetable.times[index] else {
                continue;
            };
            let room_id = timetable.rooms[index];
            if require_room && room_id.is_none() {
                continue;
            }
            let request = &self.requests[key.request];
            let load = self.load_of(index);
            let room = room_id.and_then(|id| self.catalog.classroom(id));
            lessons.push(Lesson {
                course_load_id: load.id,
                occurrence: key.occurrence,
                discipline_name: load.discipline_name.clone(),
                lesson_type: load.lesson_type.clone(),
                teacher_id: request.teacher_id,
                teacher_name: self.catalog.teacher_name(load),
                group_id: request.group_id,
                group_name: self.catalog.group_name(load),
                classroom_id: room_id,
                classroom_name: room.map(|r| r.name.clone()),
                building_name: room.and_then(|r| self.catalog.building_name(r)),
                day_of_week: cell.day_of_week,
                time_slot: cell.time_slot,
                week_type: cell.week_type,
                semester: self.catalog.semester,
                academic_year: self.catalog.academic_year.clone(),
            });
        }
        lessons
    }
}

/// Time and room per occurrence, indexed like `Problem::occurrences`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timetable {
    pub times: Vec<Option<Cell>>,
    pub rooms: Vec<Option<ClassroomId>>,
}

impl Timetable {
    pub fn empty(len: usize) -> Self {
        Self {
            times: vec![None; len],
            rooms: vec![None; len],
        }
    }
}

/// Who is busy when.
#[derive(Debug, Clone, Default)]
pub struct Occupancy {
    pub teachers: HashMap<TeacherId, WeekGrid>,
    pub groups: HashMap<GroupId, WeekGrid>,
    pub rooms: HashMap<ClassroomId, WeekGrid>,
}

impl Occupancy {
    /// Teacher and group occupancy of every timed occurrence, plus the rooms
    /// in `pinned` for those occurrences.
    pub fn of_times(
        problem: &Problem,
        timetable: &Timetable,
        pinned: &HashMap<usize, ClassroomId>,
    ) -> Self {
        let mut occupancy = Occupancy::default();
        for (index, cell) in timetable.times.iter().enumerate() {
            if let Some(cell) = cell {
                occupancy.occupy(problem, index, cell, pinned.get(&index).copied());
            }
        }
        occupancy
    }

    pub fn occupy(
        &mut self,
        problem: &Problem,
        occurrence: usize,
        cell: &Cell,
        room: Option<ClassroomId>,
    ) {
        let request = problem.request_of(occurrence);
        self.teachers
            .entry(request.teacher_id)
            .or_default()
            .occupy(cell);
        self.groups.entry(request.group_id).or_default().occupy(cell);
        if let Some(room) = room {
            self.rooms.entry(room).or_default().occupy(cell);
        }
    }

    pub fn release(
        &mut self,
        problem: &Problem,
        occurrence: usize,
        cell: &Cell,
        room: Option<ClassroomId>,
    ) {
        let request = problem.request_of(occurrence);
        if let Some(grid) = self.teachers.get_mut(&request.teacher_id) {
            grid.release(cell);
        }
        if let Some(grid) = self.groups.get_mut(&request.group_id) {
            grid.release(cell);
        }
        if let Some(grid) = room.and_then(|room| self.rooms.get_mut(&room)) {
            grid.release(cell);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::{base_data, load};
    use crate::data::TeacherPreference;

    #[test]
    fn weekly_occurrences_follow_semester_hours() {
        assert_eq!(weekly_occurrences(32), (1, false));
        assert_eq!(weekly_occurrences(68), (2, false));
        assert_eq!(weekly_occurrences(48), (1, true));
        assert_eq!(weekly_occurrences(16), (0, true));
        assert_eq!(weekly_occurrences(4), (0, true));
        assert_eq!(weekly_occurrences(0), (0, false));
        assert_eq!(weekly_occurrences(10_000), (36, false));
    }

    #[test]
    fn build_expands_loads_into_requests_and_occurrences() {
        let mut data = base_data();
        data.course_loads = vec![load(1, 1, 1, 48), load(2, 2, 2, 64)];
        let catalog = Catalog::assemble(data, 1, "2025/2026").unwrap();
        let problem = Problem::build(catalog, Some(4));

        assert_eq!(problem.requests.len(), 3);
        assert_eq!(problem.requests[0].week_type_policy, WeekTypePolicy::EveryWeek);
        assert_eq!(problem.requests[1].week_type_policy, WeekTypePolicy::Alternating);
        assert_eq!(problem.requests[1].first_occurrence, 1);
        assert_eq!(problem.occurrences.len(), 4);
        assert_eq!(problem.occurrence_index(1, 1), Some(1));
        assert_eq!(problem.occurrence_index(2, 1), Some(3));
        assert_eq!(problem.occurrence_index(2, 2), None);
    }

    #[test]
    fn loads_without_teacher_are_rejected() {
        let mut data = base_data();
        let mut orphan = load(2, 1, 1, 32);
        orphan.teacher_id = None;
        data.course_loads.push(orphan);
        let catalog = Catalog::assemble(data, 1, "2025/2026").unwrap();
        let problem = Problem::build(catalog, None);
        assert_eq!(problem.requests.len(), 1);
        assert_eq!(problem.rejected.len(), 1);
        assert_eq!(problem.rejected[0].course_load_id, 2);
    }

    #[test]
    fn zero_hour_loads_place_nothing() {
        let mut data = base_data();
        data.course_loads.push(load(2, 2, 2, 0));
        let catalog = Catalog::assemble(data, 1, "2025/2026").unwrap();
        let problem = Problem::build(catalog, None);
        assert_eq!(problem.requests.len(), 1);
        assert_eq!(problem.occurrences.len(), 1);
        assert_eq!(problem.occurrence_index(2, 0), None);
        assert!(problem.rejected.is_empty());
    }

    #[test]
    fn eligible_rooms_are_smallest_first() {
        let mut data = base_data();
        data.classrooms = vec![
            crate::catalog::tests::room(1, 120, true),
            crate::catalog::tests::room(2, 35, true),
            crate::catalog::tests::room(3, 25, true),
            crate::catalog::tests::room(4, 40, false),
        ];
        data.course_loads[0].classroom_requirements = Some("projector".to_string());
        let catalog = Catalog::assemble(data, 1, "2025/2026").unwrap();
        let problem = Problem::build(catalog, None);
        assert_eq!(problem.eligible_rooms[0], vec![2, 1]);
    }

    #[test]
    fn preference_costs() {
        let mut data = base_data();
        data.preferences = vec![
            TeacherPreference {
                teacher_id: 1,
                day_of_week: 1,
                time_slot: 1,
                is_preferred: Some(true),
            },
            TeacherPreference {
                teacher_id: 1,
                day_of_week: 1,
                time_slot: 2,
                is_preferred: Some(false),
            },
        ];
        let catalog = Catalog::assemble(data, 1, "2025/2026").unwrap();
        let table = PreferenceTable::from_catalog(&catalog);
        assert_eq!(table.cost(1, 1, 1), 0);
        assert_eq!(table.cost(1, 1, 2), 3);
        assert_eq!(table.cost(1, 2, 2), 1);
        assert_eq!(table.cost(2, 1, 2), 0);
    }

    #[test]
    fn preference_cost_scales_with_teacher_priority() {
        let mut data = base_data();
        data.teachers[0].priority = Some(1);
        data.teachers[1].priority = Some(4);
        data.preferences = vec![
            TeacherPreference {
                teacher_id: 1,
                day_of_week: 1,
                time_slot: 2,
                is_preferred: Some(false),
            },
            TeacherPreference {
                teacher_id: 2,
                day_of_week: 1,
                time_slot: 2,
                is_preferred: Some(false),
            },
        ];
        data.course_loads.push(load(2, 2, 2, 32));
        let catalog = Catalog::assemble(data, 1, "2025/2026").unwrap();
        let table = PreferenceTable::from_catalog(&catalog);
        assert_eq!(table.weighted_cost(1, 1, 2), 48);
        assert_eq!(table.weighted_cost(1, 1, 3), 16);
        assert_eq!(table.weighted_cost(2, 1, 2), 3);
        assert_eq!(table.cost(1, 1, 2), 3);
        assert_eq!(priority_weight(None), 1);
        assert_eq!(priority_weight(Some(3)), 3);
    }
}
