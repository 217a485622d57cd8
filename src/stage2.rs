//! Stage 2: room allocation.
//!
//! Given the time of every occurrence, assigns each a classroom that is big
//! enough, has the required type and equipment, and is free in every
//! overlapping week. Occurrences with the fewest eligible rooms go first and
//! take the smallest eligible free room, keeping big rooms for later.
//!
//! With the `ilp` feature, any (day, slot) the greedy pass could not fully
//! serve is re-solved exactly as a 0/1 assignment problem.

use crate::data::{ClassroomId, WeekGrid};
use crate::problem::{Problem, Timetable};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::HashMap;

/// Allocates rooms for every timed occurrence, replacing any previous rooms.
/// Returns timed occurrences left without a room.
pub fn allocate_rooms(
    problem: &Problem,
    timetable: &mut Timetable,
    noise: Option<&mut StdRng>,
) -> Vec<usize> {
    let unplaced = greedy(problem, timetable, noise);

    #[cfg(feature = "ilp")]
    let unplaced = if unplaced.is_empty() {
        unplaced
    } else {
        exact::repair(problem, timetable, unplaced)
    };

    if !unplaced.is_empty() {
        warn!("stage 2: {} occurrences without a room", unplaced.len());
    }
    unplaced
}

fn greedy(problem: &Problem, timetable: &mut Timetable, noise: Option<&mut StdRng>) -> Vec<usize> {
    timetable.rooms.iter_mut().for_each(|room| *room = None);

    let mut order: Vec<usize> = (0..problem.occurrences.len())
        .filter(|&occurrence| timetable.times[occurrence].is_some())
        .collect();
    if let Some(rng) = noise {
        order.shuffle(rng);
    }
    // stable: equal counts keep index order, or the shuffled order
    order.sort_by_key(|&occurrence| problem.rooms_for(occurrence).len());
    debug!("stage 2: allocating rooms for {} occurrences", order.len());

    let mut booked: HashMap<ClassroomId, WeekGrid> = HashMap::new();
    let mut unplaced = Vec::new();
    for occurrence in order {
        let Some(cell) = timetable.times[occurrence] else {
            continue;
        };
        let room = problem
            .rooms_for(occurrence)
            .iter()
            .copied()
            .find(|room| booked.get(room).is_none_or(|grid| grid.is_free(&cell)));
        match room {
            Some(room) => {
                booked.entry(room).or_default().occupy(&cell);
                timetable.rooms[occurrence] = Some(room);
            }
            None => unplaced.push(occurrence),
        }
    }
    unplaced.sort_unstable();
    unplaced
}

#[cfg(feature = "ilp")]
mod exact {
    use crate::data::{ClassroomId, WeekType};
    use crate::problem::{Problem, Timetable};
    use good_lp::{
        Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable, constraint,
        default_solver, variable,
    };
    use itertools::Itertools;
    use log::{debug, info, warn};

    /// Re-solves each (day, slot) holding an unplaced occurrence and keeps the
    /// exact answer when it places strictly more.
    pub(super) fn repair(
        problem: &Problem,
        timetable: &mut Timetable,
        unplaced: Vec<usize>,
    ) -> Vec<usize> {
        let by_slot = unplaced
            .iter()
            .filter_map(|&occurrence| {
                timetable.times[occurrence]
                    .map(|cell| ((cell.day_of_week, cell.time_slot), occurrence))
            })
            .into_group_map();

        let mut still_unplaced = Vec::new();
        for ((day, slot), missing) in by_slot.into_iter().sorted_by_key(|(key, _)| *key) {
            let members: Vec<usize> = (0..problem.occurrences.len())
                .filter(|&occurrence| {
                    timetable.times[occurrence]
                        .is_some_and(|cell| cell.day_of_week == day && cell.time_slot == slot)
                        && !problem.rooms_for(occurrence).is_empty()
                })
                .collect();
            let greedy_count = members
                .iter()
                .filter(|&&occurrence| timetable.rooms[occurrence].is_some())
                .count();

            match solve_slot(problem, timetable, &members) {
                Ok(rooms) => {
                    let exact_count = rooms.iter().flatten().count();
                    if exact_count > greedy_count {
                        info!(
                            "exact repair of day {} slot {}: {} -> {} rooms placed",
                            day, slot, greedy_count, exact_count
                        );
                        for (occurrence, room) in members.iter().zip(rooms) {
                            timetable.rooms[*occurrence] = room;
                        }
                    } else {
                        debug!("exact repair of day {} slot {} found no improvement", day, slot);
                    }
                }
                Err(e) => warn!("exact repair of day {} slot {} failed: {}", day, slot, e),
            }

            still_unplaced.extend(
                missing
                    .into_iter()
                    .chain(members)
                    .filter(|&occurrence| timetable.rooms[occurrence].is_none())
                    .unique(),
            );
        }
        still_unplaced.sort_unstable();
        still_unplaced
    }

    // x_or = 1 if occurrence o takes room r
    fn solve_slot(
        problem: &Problem,
        timetable: &Timetable,
        members: &[usize],
    ) -> Result<Vec<Option<ClassroomId>>, ResolutionError> {
        if members.is_empty() {
            return Ok(Vec::new());
        }
        let max_capacity = problem
            .catalog
            .classrooms
            .iter()
            .map(|room| room.capacity)
            .max()
            .unwrap_or(1)
            .max(1) as f64;

        let mut vars = ProblemVariables::new();
        let mut choices: Vec<(usize, ClassroomId, Variable, f64)> = Vec::new();
        for (position, &occurrence) in members.iter().enumerate() {
            let group_size = problem.request_of(occurrence).group_size;
            for &room in problem.rooms_for(occurrence) {
                let capacity = problem.catalog.classroom(room).map_or(0, |r| r.capacity);
                // a placed lesson is worth ~1, minus a small penalty for wasted seats
                let waste = capacity.saturating_sub(group_size) as f64 / max_capacity;
                choices.push((position, room, vars.add(variable().binary()), 1.0 - 0.01 * waste));
            }
        }

        let objective: Expression = choices
            .iter()
            .map(|(_, _, var, weight)| *weight * *var)
            .sum();
        let mut model = vars
            .maximise(objective)
            .using(default_solver)
            .set_option("threads", 1)
            .set_option("random_seed", 1234)
            .set_option("output_flag", false);

        // at most one room per occurrence
        for position in 0..members.len() {
            let taken: Expression = choices
                .iter()
                .filter(|(p, _, _, _)| *p == position)
                .map(|(_, _, var, _)| *var)
                .sum();
            model.add_constraint(constraint!(taken <= 1));
        }

        // no room double-booked in either week parity
        let by_room = choices
            .iter()
            .map(|(position, room, var, _)| (*room, (*position, *var)))
            .into_group_map();
        for (_, uses) in by_room {
            for parity in WeekType::PARITIES {
                let vars_in_parity: Vec<Variable> = uses
                    .iter()
                    .filter(|(position, _)| {
                        timetable.times[members[*position]]
                            .is_some_and(|cell| cell.week_type.overlaps(parity))
                    })
                    .map(|(_, var)| *var)
                    .collect();
                if vars_in_parity.len() > 1 {
                    let occupied: Expression = vars_in_parity.into_iter().sum();
                    model.add_constraint(constraint!(occupied <= 1));
                }
            }
        }

        let solution = model.solve()?;
        let mut rooms = vec![None; members.len()];
        for (position, room, var, _) in &choices {
            if solution.value(*var) > 0.5 {
                rooms[*position] = Some(*room);
            }
        }
        Ok(rooms)
    }
}
