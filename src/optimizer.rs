//! Optimizer loop.
//!
//! Iteration 1 is a deterministic construction: Stage 1, then Stage 2. Each
//! later iteration ruins a handful of "hot" occurrences (unplaced, sitting in
//! a cell their teacher does not prefer, or next to a gap in their group's
//! day) together with some occurrences
//! that share their teacher or group, re-places them with a noisy Stage 1 and
//! re-runs Stage 2. A candidate is kept when it scores no worse than the
//! current timetable. The loop stops at score 0, at the iteration budget, or
//! after `stall_window` iterations without a new best.

use crate::data::{ClassroomId, Unplaced, UnmetSoftConstraint};
use crate::problem::{Occupancy, Problem, Timetable};
use crate::score::{self, ScoreReport};
use crate::{stage1, stage2};
use itertools::Itertools;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    pub max_iterations: u32,
    /// Iterations without a new best before giving up; 0 never gives up.
    pub stall_window: u32,
    /// Hot occurrences ruined per iteration.
    pub ruin_size: usize,
    pub seed: u64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            stall_window: 15,
            ruin_size: 8,
            seed: 1234,
        }
    }
}

/// Which stages a run executes, from the request's skip flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageMode {
    Full,
    /// Stage 2 skipped: times are regenerated, prior rooms stay pinned.
    TimesOnly,
    /// Stage 1 skipped: persisted times are reused, rooms are reallocated.
    RoomsOnly,
    /// Both skipped: the persisted timetable is committed unchanged.
    Frozen,
}

impl StageMode {
    pub fn from_flags(skip_stage1: bool, skip_stage2: bool) -> Self {
        match (skip_stage1, skip_stage2) {
            (false, false) => StageMode::Full,
            (false, true) => StageMode::TimesOnly,
            (true, false) => StageMode::RoomsOnly,
            (true, true) => StageMode::Frozen,
        }
    }

    pub fn runs_stage1(self) -> bool {
        matches!(self, StageMode::Full | StageMode::TimesOnly)
    }

    pub fn runs_stage2(self) -> bool {
        matches!(self, StageMode::Full | StageMode::RoomsOnly)
    }

    /// Whether an occurrence without a room counts as unplaced.
    pub fn rooms_required(self) -> bool {
        self.runs_stage2()
    }

    /// Whether the run needs the persisted lessons as a starting point.
    pub fn needs_persisted(self) -> bool {
        self != StageMode::Full
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub iteration: u32,
    pub max_iterations: u32,
    pub current_score: u64,
    pub best_score: u64,
    pub reasoning: String,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub timetable: Timetable,
    pub report: ScoreReport,
    pub iterations: u32,
    pub unplaced: Vec<Unplaced>,
    pub unmet: Vec<UnmetSoftConstraint>,
    /// Closing summary: unplaced requirements and soft constraint misses.
    pub reasoning: String,
}

struct Search<'a> {
    problem: &'a Problem,
    mode: StageMode,
    settings: &'a OptimizerSettings,
    pinned: HashMap<usize, ClassroomId>,
    rng: StdRng,
}

/// Runs the loop from `initial`, which holds the persisted timetable for the
/// modes that reuse one and is ignored in `StageMode::Full`.
pub fn optimize(
    problem: &Problem,
    mode: StageMode,
    settings: &OptimizerSettings,
    initial: Timetable,
    mut on_progress: impl FnMut(&Progress),
) -> Outcome {
    let mut search = Search {
        problem,
        mode,
        settings,
        pinned: HashMap::new(),
        rng: StdRng::seed_from_u64(settings.seed),
    };
    if mode == StageMode::TimesOnly {
        search.pinned = initial
            .rooms
            .iter()
            .enumerate()
            .filter_map(|(occurrence, room)| room.map(|room| (occurrence, room)))
            .collect();
    }

    let mut current = search.construct(initial);
    let mut current_report = score::evaluate(problem, &current, mode.rooms_required());
    let mut best = current.clone();
    let mut best_report = current_report.clone();
    let mut iteration = 1;
    on_progress(&Progress {
        iteration,
        max_iterations: settings.max_iterations,
        current_score: current_report.score,
        best_score: best_report.score,
        reasoning: format!("initial construction: {}", score::summary(&current_report)),
    });

    let mut stall = 0;
    while mode != StageMode::Frozen
        && best_report.score > 0
        && iteration < settings.max_iterations
        && (settings.stall_window == 0 || stall < settings.stall_window)
    {
        iteration += 1;
        let (candidate, move_note) = search.perturb(&current, &current_report);
        let candidate_report = score::evaluate(problem, &candidate, mode.rooms_required());

        let accepted = candidate_report.score <= current_report.score;
        let verdict = if accepted { "accepted" } else { "rejected" };
        let reasoning = format!(
            "{move_note}: score {} -> {} {verdict}",
            current_report.score, candidate_report.score
        );
        debug!("iteration {iteration}: {reasoning}");
        if accepted {
            current = candidate;
            current_report = candidate_report;
        }
        if current_report.score < best_report.score {
            best = current.clone();
            best_report = current_report.clone();
            stall = 0;
        } else {
            stall += 1;
        }

        on_progress(&Progress {
            iteration,
            max_iterations: settings.max_iterations,
            current_score: current_report.score,
            best_score: best_report.score,
            reasoning,
        });
    }

    info!(
        "optimizer finished after {iteration} iterations with {}",
        score::summary(&best_report)
    );
    let unplaced = score::unplaced(problem, &best_report, mode.runs_stage1());
    let unmet = score::unmet_soft_constraints(problem, &best);
    let reasoning = closing_reasoning(&best_report, &unplaced, &unmet);
    Outcome {
        timetable: best,
        report: best_report,
        iterations: iteration,
        unplaced,
        unmet,
        reasoning,
    }
}

impl Search<'_> {
    fn construct(&mut self, initial: Timetable) -> Timetable {
        let problem = self.problem;
        let len = problem.occurrences.len();
        match self.mode {
            StageMode::Full => {
                let mut timetable = Timetable::empty(len);
                let mut occupancy = Occupancy::default();
                stage1::assign_slots(
                    problem,
                    &mut timetable,
                    &mut occupancy,
                    (0..len).collect(),
                    &self.pinned,
                    None,
                );
                stage2::allocate_rooms(problem, &mut timetable, None);
                timetable
            }
            StageMode::TimesOnly => {
                let mut timetable = Timetable {
                    times: vec![None; len],
                    rooms: initial.rooms,
                };
                let mut occupancy = Occupancy::default();
                stage1::assign_slots(
                    problem,
                    &mut timetable,
                    &mut occupancy,
                    (0..len).collect(),
                    &self.pinned,
                    None,
                );
                timetable
            }
            StageMode::RoomsOnly => {
                let mut timetable = initial;
                stage2::allocate_rooms(problem, &mut timetable, None);
                timetable
            }
            StageMode::Frozen => initial,
        }
    }

    /// One ruin-and-recreate move. Returns the candidate and a note on what
    /// was moved.
    fn perturb(&mut self, current: &Timetable, report: &ScoreReport) -> (Timetable, String) {
        let problem = self.problem;
        let mut candidate = current.clone();

        if !self.mode.runs_stage1() {
            stage2::allocate_rooms(problem, &mut candidate, Some(&mut self.rng));
            return (candidate, "reshuffled room order".to_string());
        }

        let hot = self.hot(current, report);
        let chosen: Vec<usize> = hot
            .choose_multiple(&mut self.rng, self.settings.ruin_size.max(1))
            .copied()
            .collect();
        let mut ruined = chosen.clone();
        for &occurrence in &chosen {
            let request = problem.request_of(occurrence);
            let mut neighbours: Vec<usize> = (0..problem.occurrences.len())
                .filter(|&other| other != occurrence && current.times[other].is_some())
                .filter(|&other| {
                    let peer = problem.request_of(other);
                    peer.teacher_id == request.teacher_id || peer.group_id == request.group_id
                })
                .collect();
            neighbours.shuffle(&mut self.rng);
            let share = self.rng.gen_range(0..=neighbours.len().min(self.settings.ruin_size));
            ruined.extend(neighbours.into_iter().take(share));
        }
        let ruined: Vec<usize> = ruined.into_iter().unique().collect();

        for &occurrence in &ruined {
            candidate.times[occurrence] = None;
        }
        let mut occupancy = Occupancy::of_times(problem, &candidate, &self.pinned);
        stage1::assign_slots(
            problem,
            &mut candidate,
            &mut occupancy,
            ruined.clone(),
            &self.pinned,
            Some(&mut self.rng),
        );
        if self.mode.runs_stage2() {
            stage2::allocate_rooms(problem, &mut candidate, Some(&mut self.rng));
        }

        let note = match chosen.first() {
            Some(&first) => format!(
                "re-placed {} occurrences around {} ({} hot)",
                ruined.len(),
                problem.load_of(first).discipline_name,
                hot.len()
            ),
            None => "nothing to re-place".to_string(),
        };
        (candidate, note)
    }

    fn hot(&self, current: &Timetable, report: &ScoreReport) -> Vec<usize> {
        let costly = current
            .times
            .iter()
            .enumerate()
            .filter_map(|(occurrence, cell)| cell.map(|cell| (occurrence, cell)))
            .filter(|(occurrence, cell)| self.problem.cost_at(*occurrence, cell) > 0)
            .map(|(occurrence, _)| occurrence);
        report
            .unplaced_times
            .iter()
            .chain(report.unplaced_rooms.iter())
            .chain(report.gap_occurrences.iter())
            .copied()
            .chain(costly)
            .unique()
            .collect()
    }
}

fn closing_reasoning(
    report: &ScoreReport,
    unplaced: &[Unplaced],
    unmet: &[UnmetSoftConstraint],
) -> String {
    if unplaced.is_empty() && unmet.is_empty() {
        return format!("all requirements placed, {}", score::summary(report));
    }
    let mut notes = vec![score::summary(report)];
    if !unplaced.is_empty() {
        notes.push(format!(
            "{} unplaced: {}",
            unplaced.len(),
            unplaced.iter().map(ToString::to_string).join("; ")
        ));
    }
    if !unmet.is_empty() {
        notes.push(format!(
            "{} soft constraint misses: {}",
            unmet.len(),
            unmet.iter().map(ToString::to_string).join("; ")
        ));
    }
    notes.join(". ")
}
