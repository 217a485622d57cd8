//! Stage 1: time slot assignment.
//!
//! Places every pending occurrence into a (day, slot, week type) cell without
//! fixing a room. The hard constraints are teacher and group exclusivity, the
//! optional daily lesson cap, and, when rooms are pinned from an earlier run,
//! that room's exclusivity. Teacher preferences and the gaps a cell would
//! open or close in the group's day only shape the cost.

use crate::data::{Cell, ClassroomId, DAYS_PER_WEEK, SLOTS_PER_DAY, WeekGrid, WeekType};
use crate::problem::{LessonSlotRequest, Occupancy, Problem, Timetable};
use crate::score;
use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::cmp::Reverse;
use std::collections::HashMap;

fn grid_allows(grid: Option<&WeekGrid>, cell: &Cell, cap: Option<u8>) -> bool {
    let Some(grid) = grid else {
        return true;
    };
    if !grid.is_free(cell) {
        return false;
    }
    match cap {
        Some(cap) => WeekType::PARITIES
            .iter()
            .filter(|parity| cell.week_type.overlaps(**parity))
            .all(|parity| grid.daily_load(cell.day_of_week, *parity) < usize::from(cap)),
        None => true,
    }
}

fn is_legal(
    problem: &Problem,
    occupancy: &Occupancy,
    request: &LessonSlotRequest,
    cell: &Cell,
    pinned_room: Option<ClassroomId>,
) -> bool {
    grid_allows(
        occupancy.teachers.get(&request.teacher_id),
        cell,
        problem.daily_cap,
    ) && grid_allows(
        occupancy.groups.get(&request.group_id),
        cell,
        problem.daily_cap,
    ) && pinned_room
        .and_then(|room| occupancy.rooms.get(&room))
        .is_none_or(|grid| grid.is_free(cell))
}

/// Change in a group's gap cost if it took `cell`. Negative when the cell
/// fills a gap.
fn gap_delta(grid: Option<&WeekGrid>, cell: &Cell) -> i64 {
    let Some(grid) = grid else {
        return 0;
    };
    let mut after = grid.clone();
    after.occupy(cell);
    let day_cost = |grid: &WeekGrid, parity: WeekType| -> i64 {
        grid.idle_runs(cell.day_of_week, parity)
            .into_iter()
            .map(|width| score::gap_cost(width) as i64)
            .sum()
    };
    WeekType::PARITIES
        .iter()
        .filter(|parity| cell.week_type.overlaps(**parity))
        .map(|parity| day_cost(&after, *parity) - day_cost(grid, *parity))
        .sum()
}

/// Legal cells with their preference cost, ordered by (day, slot, week type).
pub fn legal_cells(
    problem: &Problem,
    occupancy: &Occupancy,
    occurrence: usize,
    pinned_room: Option<ClassroomId>,
) -> Vec<(Cell, u32)> {
    let request = problem.request_of(occurrence);
    let mut cells = Vec::new();
    for day in 1..=DAYS_PER_WEEK {
        for slot in 1..=SLOTS_PER_DAY {
            for week_type in request.week_type_policy.week_types() {
                let cell = Cell::new(day, slot, *week_type);
                if is_legal(problem, occupancy, request, &cell, pinned_room) {
                    cells.push((cell, problem.cost_at(occurrence, &cell)));
                }
            }
        }
    }
    cells
}

/// Places `pending` occurrences hardest-first and returns those that found
/// no legal cell.
///
/// The occurrence with the fewest legal cells goes next; among those, the
/// one whose teacher has the highest priority weight, then the lowest index.
/// Each takes its cheapest legal cell, where a cell costs its preference cost
/// plus the change in the group's gap cost. Ties go to the earliest cell, or
/// to a random one when `noise` is given.
pub fn assign_slots(
    problem: &Problem,
    timetable: &mut Timetable,
    occupancy: &mut Occupancy,
    mut pending: Vec<usize>,
    pinned_rooms: &HashMap<usize, ClassroomId>,
    mut noise: Option<&mut StdRng>,
) -> Vec<usize> {
    let mut unsatisfiable = Vec::new();
    debug!("stage 1: placing {} occurrences", pending.len());

    while !pending.is_empty() {
        let Some((position, cells)) = pending
            .iter()
            .enumerate()
            .map(|(position, &occurrence)| {
                let pinned = pinned_rooms.get(&occurrence).copied();
                (position, legal_cells(problem, occupancy, occurrence, pinned))
            })
            .min_by_key(|(position, cells)| {
                let teacher = problem.request_of(pending[*position]).teacher_id;
                (
                    cells.len(),
                    Reverse(problem.preferences.weight(teacher)),
                    pending[*position],
                )
            })
        else {
            break;
        };
        let occurrence = pending.swap_remove(position);

        let group_grid = occupancy.groups.get(&problem.request_of(occurrence).group_id);
        let ranked: Vec<(Cell, i64)> = cells
            .iter()
            .map(|(cell, cost)| (*cell, i64::from(*cost) + gap_delta(group_grid, cell)))
            .collect();
        let Some(best_cost) = ranked.iter().map(|(_, cost)| *cost).min() else {
            let request = problem.request_of(occurrence);
            warn!(
                "no legal cell for load {} occurrence {} (teacher {}, group {})",
                request.course_load_id,
                problem.occurrences[occurrence].occurrence,
                request.teacher_id,
                request.group_id
            );
            unsatisfiable.push(occurrence);
            continue;
        };
        let cheapest: Vec<Cell> = ranked
            .iter()
            .filter(|(_, cost)| *cost == best_cost)
            .map(|(cell, _)| *cell)
            .collect();
        let chosen = match noise.as_deref_mut() {
            Some(rng) => cheapest.choose(rng).copied(),
            None => cheapest.first().copied(),
        };
        let Some(cell) = chosen else {
            unsatisfiable.push(occurrence);
            continue;
        };

        trace!(
            "occurrence {} -> {} (cost {}, {} legal cells)",
            occurrence,
            cell,
            best_cost,
            cells.len()
        );
        timetable.times[occurrence] = Some(cell);
        occupancy.occupy(
            problem,
            occurrence,
            &cell,
            pinned_rooms.get(&occurrence).copied(),
        );
    }

    unsatisfiable.sort_unstable();
    unsatisfiable
}
