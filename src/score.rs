//! Scoring model. Lower is better; 0 is a complete schedule that honours every
//! teacher preference and leaves no group idle between lessons.
//!
//! score = unplaced occurrences * UNPLACED_PENALTY + preference cost + gap cost
//!
//! Preference cost is weighted by teacher priority. Gap cost is charged per
//! run of empty slots between two lessons of a group on one day, counted
//! separately for odd and even weeks.

use crate::data::{Day, GroupId, Slot, Unplaced, UnmetSoftConstraint, WeekType, day_name};
use crate::problem::{Problem, Timetable};
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashMap;

pub const UNPLACED_PENALTY: u64 = 1000;
/// Cost of a gap of one, two, and three or more empty slots.
pub const GAP_COSTS: [u64; 3] = [1, 5, 15];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScoreReport {
    pub score: u64,
    pub preference_cost: u64,
    pub gap_cost: u64,
    /// Occurrences with no time.
    pub unplaced_times: Vec<usize>,
    /// Timed occurrences with no room; empty when rooms are not required.
    pub unplaced_rooms: Vec<usize>,
    /// Timed occurrences next to a gap in their group's day, ascending.
    pub gap_occurrences: Vec<usize>,
}

impl ScoreReport {
    pub fn unplaced_count(&self) -> usize {
        self.unplaced_times.len() + self.unplaced_rooms.len()
    }
}

/// Empty slots between two consecutive lessons of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    pub group_id: GroupId,
    pub day_of_week: Day,
    /// `Odd` or `Even`.
    pub parity: WeekType,
    /// Last slot before the gap and first slot after it.
    pub between: (Slot, Slot),
    pub before: usize,
    pub after: usize,
}

impl Gap {
    pub fn width(&self) -> u8 {
        self.between.1.saturating_sub(self.between.0 + 1)
    }

    pub fn cost(&self) -> u64 {
        gap_cost(self.width())
    }
}

/// Cost of one run of `width` empty slots.
pub fn gap_cost(width: u8) -> u64 {
    match width {
        0 => 0,
        n => GAP_COSTS[usize::from(n.min(3)) - 1],
    }
}

/// Gaps in every group's days, ordered by group, day, parity and slot.
pub fn gaps(problem: &Problem, timetable: &Timetable) -> Vec<Gap> {
    let mut days: HashMap<(GroupId, Day, WeekType), Vec<(Slot, usize)>> = HashMap::new();
    for (occurrence, cell) in timetable.times.iter().enumerate() {
        let Some(cell) = cell else {
            continue;
        };
        let group_id = problem.request_of(occurrence).group_id;
        for parity in WeekType::PARITIES {
            if cell.week_type.overlaps(parity) {
                days.entry((group_id, cell.day_of_week, parity))
                    .or_default()
                    .push((cell.time_slot, occurrence));
            }
        }
    }
    let mut found = Vec::new();
    let days = days.into_iter().sorted_by_key(|(key, _)| *key);
    for ((group_id, day_of_week, parity), mut lessons) in days {
        lessons.sort_unstable();
        for ((first, before), (second, after)) in lessons.into_iter().tuple_windows() {
            let gap = Gap {
                group_id,
                day_of_week,
                parity,
                between: (first, second),
                before,
                after,
            };
            if gap.width() > 0 {
                found.push(gap);
            }
        }
    }
    found
}

pub fn evaluate(problem: &Problem, timetable: &Timetable, rooms_required: bool) -> ScoreReport {
    let mut report = ScoreReport::default();
    for occurrence in 0..problem.occurrences.len() {
        match timetable.times[occurrence] {
            None => report.unplaced_times.push(occurrence),
            Some(cell) => {
                report.preference_cost += u64::from(problem.cost_at(occurrence, &cell));
                if rooms_required && timetable.rooms[occurrence].is_none() {
                    report.unplaced_rooms.push(occurrence);
                }
            }
        }
    }
    let found = gaps(problem, timetable);
    report.gap_cost = found.iter().map(Gap::cost).sum();
    report.gap_occurrences = found
        .iter()
        .flat_map(|gap| [gap.before, gap.after])
        .sorted_unstable()
        .dedup()
        .collect();
    report.score = report.unplaced_count() as u64 * UNPLACED_PENALTY
        + report.preference_cost
        + report.gap_cost;
    report
}

/// Preference misses of the timed occurrences, then group gaps.
pub fn unmet_soft_constraints(problem: &Problem, timetable: &Timetable) -> Vec<UnmetSoftConstraint> {
    let mut unmet = Vec::new();
    for (occurrence, cell) in timetable.times.iter().enumerate() {
        let Some(cell) = cell else {
            continue;
        };
        let miss = problem.miss_at(occurrence, cell);
        if miss == 0 {
            continue;
        }
        let load = problem.load_of(occurrence);
        let mut teacher = problem.catalog.teacher_name(load);
        if teacher.is_empty() {
            teacher = format!("teacher {}", problem.request_of(occurrence).teacher_id);
        }
        let constraint_type = if miss >= 3 {
            "Avoided Slot"
        } else {
            "Unpreferred Slot"
        };
        unmet.push(UnmetSoftConstraint {
            constraint_type: constraint_type.to_string(),
            description: format!(
                "{} teaches {} on {} slot {}",
                teacher,
                load.discipline_name,
                day_name(cell.day_of_week),
                cell.time_slot
            ),
        });
    }
    for gap in gaps(problem, timetable) {
        let group = problem.catalog.group_name(problem.load_of(gap.before));
        let group = if group.is_empty() {
            format!("group {}", gap.group_id)
        } else {
            group
        };
        unmet.push(UnmetSoftConstraint {
            constraint_type: "Group Gap".to_string(),
            description: format!(
                "{} idles {} slot(s) between slots {} and {} on {} in {} weeks",
                group,
                gap.width(),
                gap.between.0,
                gap.between.1,
                day_name(gap.day_of_week),
                gap.parity
            ),
        });
    }
    unmet
}

/// Every requirement left out of the schedule, with the reason.
pub fn unplaced(problem: &Problem, report: &ScoreReport, stage1_ran: bool) -> Vec<Unplaced> {
    let mut out = problem.rejected.clone();
    for &occurrence in &report.unplaced_times {
        let request = problem.request_of(occurrence);
        let reason = if stage1_ran {
            format!(
                "no free time slot for teacher {} and group {}",
                request.teacher_id, request.group_id
            )
        } else {
            "no persisted time slot to reuse".to_string()
        };
        out.push(problem.describe(occurrence, reason));
    }
    for &occurrence in &report.unplaced_rooms {
        let request = problem.request_of(occurrence);
        let reason = if problem.rooms_for(occurrence).is_empty() {
            format!(
                "no classroom with capacity >= {}, type {}, equipment {}",
                request.group_size,
                request.requirements.classroom_type.as_deref().unwrap_or("any"),
                request.requirements.equipment
            )
        } else {
            format!(
                "all {} eligible classrooms are booked at that time",
                problem.rooms_for(occurrence).len()
            )
        };
        out.push(problem.describe(occurrence, reason));
    }
    out
}

/// One-line summary for progress reporting.
pub fn summary(report: &ScoreReport) -> String {
    format!(
        "score {} ({} unplaced, preference cost {}, gap cost {})",
        report.score,
        report.unplaced_count(),
        report.preference_cost,
        report.gap_cost
    )
}
