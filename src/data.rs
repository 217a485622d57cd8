use serde::{Deserialize, Serialize};
use std::fmt;

// Type aliases for clarity
pub type CourseLoadId = u32;
pub type TeacherId = u32;
pub type GroupId = u32;
pub type ClassroomId = u32;
pub type BuildingId = u32;
pub type Day = u8;
pub type Slot = u8;

/// Monday..Saturday. Sunday is never scheduled.
pub const DAYS_PER_WEEK: Day = 6;
/// Six fixed lecture periods per day.
pub const SLOTS_PER_DAY: Slot = 6;

const DAY_NAMES: [&str; DAYS_PER_WEEK as usize] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

pub fn day_name(day: Day) -> &'static str {
    DAY_NAMES
        .get(usize::from(day.wrapping_sub(1)))
        .copied()
        .unwrap_or("???")
}

pub fn is_valid_day(day: Day) -> bool {
    (1..=DAYS_PER_WEEK).contains(&day)
}

pub fn is_valid_slot(slot: Slot) -> bool {
    (1..=SLOTS_PER_DAY).contains(&slot)
}

/// Which weeks of the semester a lesson runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekType {
    Odd,
    Even,
    Both,
}

impl WeekType {
    /// The two single-parity week types.
    pub const PARITIES: [WeekType; 2] = [WeekType::Odd, WeekType::Even];

    fn mask(self) -> u8 {
        match self {
            WeekType::Odd => 0b01,
            WeekType::Even => 0b10,
            WeekType::Both => 0b11,
        }
    }

    pub fn overlaps(self, other: WeekType) -> bool {
        self.mask() & other.mask() != 0
    }

    pub fn parse(value: &str) -> Option<WeekType> {
        match value.trim().to_ascii_lowercase().as_str() {
            "odd" => Some(WeekType::Odd),
            "even" => Some(WeekType::Even),
            "both" | "all" | "every" => Some(WeekType::Both),
            _ => None,
        }
    }
}

impl fmt::Display for WeekType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WeekType::Odd => "odd",
            WeekType::Even => "even",
            WeekType::Both => "both",
        };
        f.write_str(name)
    }
}

/// One (day, slot, week type) position in the weekly grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub day_of_week: Day,
    pub time_slot: Slot,
    pub week_type: WeekType,
}

impl Cell {
    pub fn new(day_of_week: Day, time_slot: Slot, week_type: WeekType) -> Self {
        Self {
            day_of_week,
            time_slot,
            week_type,
        }
    }

    /// Two cells clash when they share day and slot and their weeks overlap.
    pub fn clashes(&self, other: &Cell) -> bool {
        self.day_of_week == other.day_of_week
            && self.time_slot == other.time_slot
            && self.week_type.overlaps(other.week_type)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} slot {} ({} weeks)",
            day_name(self.day_of_week),
            self.time_slot,
            self.week_type
        )
    }
}

/// Occupancy of one teacher, group or room over the week.
///
/// Each (day, slot) holds a two-bit parity mask; a `Both` lesson sets both
/// bits. Since placements never overlap, releasing a cell clears exactly the
/// bits its own lesson set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeekGrid([[u8; SLOTS_PER_DAY as usize]; DAYS_PER_WEEK as usize]);

impl WeekGrid {
    fn index(cell: &Cell) -> Option<(usize, usize)> {
        if is_valid_day(cell.day_of_week) && is_valid_slot(cell.time_slot) {
            Some((
                usize::from(cell.day_of_week - 1),
                usize::from(cell.time_slot - 1),
            ))
        } else {
            None
        }
    }

    pub fn is_free(&self, cell: &Cell) -> bool {
        match Self::index(cell) {
            Some((d, s)) => self.0[d][s] & cell.week_type.mask() == 0,
            None => false,
        }
    }

    pub fn occupy(&mut self, cell: &Cell) {
        if let Some((d, s)) = Self::index(cell) {
            self.0[d][s] |= cell.week_type.mask();
        }
    }

    pub fn release(&mut self, cell: &Cell) {
        if let Some((d, s)) = Self::index(cell) {
            self.0[d][s] &= !cell.week_type.mask();
        }
    }

    /// Lessons on `day` in weeks of the given parity.
    pub fn daily_load(&self, day: Day, parity: WeekType) -> usize {
        if !is_valid_day(day) {
            return 0;
        }
        self.0[usize::from(day - 1)]
            .iter()
            .filter(|mask| **mask & parity.mask() != 0)
            .count()
    }

    /// Widths of the empty runs between lessons on `day` in weeks of the
    /// given parity.
    pub fn idle_runs(&self, day: Day, parity: WeekType) -> Vec<u8> {
        if !is_valid_day(day) {
            return Vec::new();
        }
        let busy: Vec<u8> = (0..SLOTS_PER_DAY)
            .filter(|slot| self.0[usize::from(day - 1)][usize::from(*slot)] & parity.mask() != 0)
            .collect();
        busy.windows(2)
            .map(|pair| pair[1] - pair[0] - 1)
            .filter(|width| *width > 0)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Teacher {
    pub id: TeacherId,
    #[serde(default)]
    pub full_name: String,
    /// Staffing priority: 1 external part-timer, 2 master's student,
    /// 3 internal part-timer, 4 full-time staff.
    #[serde(default, alias = "teacher_priority")]
    pub priority: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Group {
    pub id: GroupId,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "students_count")]
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Building {
    pub id: BuildingId,
    #[serde(default)]
    pub name: String,
}

/// Equipment flags a classroom has or a lesson needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Equipment {
    pub projector: bool,
    pub computers: bool,
    pub whiteboard: bool,
}

impl Equipment {
    /// True when every flag set in `required` is also set here.
    pub fn covers(&self, required: &Equipment) -> bool {
        (!required.projector || self.projector)
            && (!required.computers || self.computers)
            && (!required.whiteboard || self.whiteboard)
    }

    pub fn is_empty(&self) -> bool {
        !(self.projector || self.computers || self.whiteboard)
    }
}

impl fmt::Display for Equipment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (self.projector, "projector"),
            (self.computers, "computers"),
            (self.whiteboard, "whiteboard"),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| *name)
        .collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join(", "))
        }
    }
}

fn default_true() -> bool {
    true
}

/// A physical room with a given capacity.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Classroom {
    pub id: ClassroomId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub building_id: Option<BuildingId>,
    pub capacity: u32,
    #[serde(default)]
    pub classroom_type: String,
    #[serde(default)]
    pub has_projector: bool,
    #[serde(default)]
    pub has_computers: bool,
    #[serde(default)]
    pub has_whiteboard: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Classroom {
    pub fn equipment(&self) -> Equipment {
        Equipment {
            projector: self.has_projector,
            computers: self.has_computers,
            whiteboard: self.has_whiteboard,
        }
    }
}

/// A discipline that must be taught to a group by a teacher for a number of
/// hours per semester.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CourseLoad {
    pub id: CourseLoadId,
    pub discipline_name: String,
    #[serde(default)]
    pub teacher_id: Option<TeacherId>,
    #[serde(default)]
    pub teacher_name: Option<String>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub group_name: Option<String>,
    pub semester: u8,
    pub academic_year: String,
    pub hours_per_semester: u32,
    pub lesson_type: String,
    #[serde(default)]
    pub classroom_requirements: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TeacherPreference {
    pub teacher_id: TeacherId,
    pub day_of_week: Day,
    pub time_slot: Slot,
    #[serde(default)]
    pub is_preferred: Option<bool>,
}

/// A persisted, fully resolved lesson.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Lesson {
    pub course_load_id: CourseLoadId,
    /// Index of this weekly occurrence within its course load.
    pub occurrence: u8,
    pub discipline_name: String,
    pub lesson_type: String,
    pub teacher_id: TeacherId,
    pub teacher_name: String,
    pub group_id: GroupId,
    pub group_name: String,
    pub classroom_id: Option<ClassroomId>,
    pub classroom_name: Option<String>,
    pub building_name: Option<String>,
    pub day_of_week: Day,
    pub time_slot: Slot,
    pub week_type: WeekType,
    pub semester: u8,
    pub academic_year: String,
}

impl Lesson {
    pub fn cell(&self) -> Cell {
        Cell::new(self.day_of_week, self.time_slot, self.week_type)
    }
}

/// Describes a soft constraint that was not met in the final schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmetSoftConstraint {
    pub constraint_type: String,
    pub description: String,
}

impl fmt::Display for UnmetSoftConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.constraint_type, self.description)
    }
}

/// A requirement that could not be placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unplaced {
    pub course_load_id: CourseLoadId,
    pub discipline_name: String,
    pub occurrence: Option<u8>,
    pub reason: String,
}

impl fmt::Display for Unplaced {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.occurrence {
            Some(occurrence) => write!(
                f,
                "{} (load {}, occurrence {}): {}",
                self.discipline_name, self.course_load_id, occurrence, self.reason
            ),
            None => write!(
                f,
                "{} (load {}): {}",
                self.discipline_name, self.course_load_id, self.reason
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn week_types_overlap_as_expected() {
        assert!(WeekType::Both.overlaps(WeekType::Odd));
        assert!(WeekType::Even.overlaps(WeekType::Both));
        assert!(!WeekType::Odd.overlaps(WeekType::Even));
        assert!(WeekType::Odd.overlaps(WeekType::Odd));
    }

    #[test]
    fn grid_keeps_odd_and_even_apart() {
        let mut grid = WeekGrid::default();
        let odd = Cell::new(2, 3, WeekType::Odd);
        grid.occupy(&odd);

        assert!(!grid.is_free(&odd));
        assert!(grid.is_free(&Cell::new(2, 3, WeekType::Even)));
        assert!(!grid.is_free(&Cell::new(2, 3, WeekType::Both)));
        assert_eq!(grid.daily_load(2, WeekType::Odd), 1);
        assert_eq!(grid.daily_load(2, WeekType::Even), 0);

        grid.release(&odd);
        assert!(grid.is_free(&Cell::new(2, 3, WeekType::Both)));
    }

    #[test]
    fn sunday_is_never_free() {
        let grid = WeekGrid::default();
        assert!(!grid.is_free(&Cell::new(0, 1, WeekType::Both)));
        assert!(!grid.is_free(&Cell::new(7, 1, WeekType::Both)));
    }

    #[test]
    fn equipment_cover_is_a_subset_check() {
        let room = Equipment {
            projector: true,
            computers: false,
            whiteboard: true,
        };
        let needs_projector = Equipment {
            projector: true,
            ..Equipment::default()
        };
        let needs_computers = Equipment {
            computers: true,
            ..Equipment::default()
        };
        assert!(room.covers(&needs_projector));
        assert!(!room.covers(&needs_computers));
        assert!(room.covers(&Equipment::default()));
    }

    #[test]
    fn group_size_accepts_students_count_alias() {
        let group: Group =
            serde_json::from_str(r#"{"id": 4, "name": "ИВТ-21", "students_count": 27}"#).unwrap();
        assert_eq!(group.size, 27);
    }
}
