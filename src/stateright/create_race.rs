//! Stateright Model for the Create-or-Increment Race
//!
//! N workers each apply one INCREMENT to the same, initially absent, metric.
//! Every store call is a separate atomic step, so the checker explores every
//! interleaving of:
//!
//! ```text
//! increment_if_exists ──hit──▶ Applied
//!        │ miss
//!        ▼
//!      insert(1) ──ok──▶ Applied
//!        │ unique violation
//!        ▼
//! increment_if_exists ──hit──▶ Applied
//!        │ miss
//!        ▼
//!    Exhausted (retryable failure)
//! ```
//!
//! Properties:
//! - NO_LOST_INCREMENTS: stored value equals the number of applied workers
//! - ALL_APPLIED_AT_END: once every worker stops, all of them applied
//! - SINGLE_CREATE: at most one insert succeeds
//! - RETRY_NEVER_EXHAUSTED: the single retry always finds the row
//!
//! With `retry_after_violation` disabled a losing creator drops its event
//! and NO_LOST_INCREMENTS fails.

use stateright::{Model, Property};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerPhase {
    /// About to try the atomic increment
    Increment,
    /// Increment missed, about to insert
    Insert,
    /// Insert lost the race, about to retry the increment
    Retry,
    Applied,
    /// Event dropped without touching the row
    Lost,
    Exhausted,
}

impl WorkerPhase {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            WorkerPhase::Applied | WorkerPhase::Lost | WorkerPhase::Exhausted
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RaceState {
    /// Stored value, `None` while the row does not exist
    pub row: Option<u32>,
    pub workers: Vec<WorkerPhase>,
    pub successful_inserts: u32,
}

impl RaceState {
    pub fn applied(&self) -> u32 {
        self.workers
            .iter()
            .filter(|w| **w == WorkerPhase::Applied)
            .count() as u32
    }

    pub fn finished(&self) -> bool {
        self.workers.iter().all(|w| w.is_finished())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RaceAction {
    Step(usize),
}

pub struct CreateRaceModel {
    pub workers: usize,
    pub retry_after_violation: bool,
}

impl CreateRaceModel {
    pub fn new(workers: usize) -> Self {
        CreateRaceModel {
            workers,
            retry_after_violation: true,
        }
    }

    /// Model a consumer that gives up on a unique violation
    pub fn without_retry(workers: usize) -> Self {
        CreateRaceModel {
            workers,
            retry_after_violation: false,
        }
    }
}

impl Model for CreateRaceModel {
    type State = RaceState;
    type Action = RaceAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![RaceState {
            row: None,
            workers: vec![WorkerPhase::Increment; self.workers],
            successful_inserts: 0,
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for (i, phase) in state.workers.iter().enumerate() {
            if !phase.is_finished() {
                actions.push(RaceAction::Step(i));
            }
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let RaceAction::Step(i) = action;
        let mut next = state.clone();

        next.workers[i] = match state.workers[i] {
            WorkerPhase::Increment | WorkerPhase::Retry => match next.row.as_mut() {
                Some(value) => {
                    *value += 1;
                    WorkerPhase::Applied
                }
                None if state.workers[i] == WorkerPhase::Increment => WorkerPhase::Insert,
                None => WorkerPhase::Exhausted,
            },
            WorkerPhase::Insert => match next.row {
                None => {
                    next.row = Some(1);
                    next.successful_inserts += 1;
                    WorkerPhase::Applied
                }
                Some(_) if self.retry_after_violation => WorkerPhase::Retry,
                Some(_) => WorkerPhase::Lost,
            },
            _ => return None,
        };

        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("no_lost_increments", |_: &CreateRaceModel, state: &RaceState| {
                state.row.unwrap_or(0) == state.applied()
            }),
            Property::always("all_applied_at_end", |model: &CreateRaceModel, state: &RaceState| {
                !state.finished() || state.applied() as usize == model.workers
            }),
            Property::always("single_create", |_: &CreateRaceModel, state: &RaceState| {
                state.successful_inserts <= 1
            }),
            Property::always("retry_never_exhausted", |_: &CreateRaceModel, state: &RaceState| {
                !state.workers.contains(&WorkerPhase::Exhausted)
            }),
            Property::sometimes("create_race_reachable", |_: &CreateRaceModel, state: &RaceState| {
                state.workers.contains(&WorkerPhase::Retry)
                    || state.workers.contains(&WorkerPhase::Lost)
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateright::Checker;

    #[test]
    fn test_single_worker_creates() {
        let model = CreateRaceModel::new(1);
        let state = model.init_states().remove(0);
        let state = model.next_state(&state, RaceAction::Step(0)).unwrap();
        assert_eq!(state.workers[0], WorkerPhase::Insert);
        let state = model.next_state(&state, RaceAction::Step(0)).unwrap();
        assert_eq!(state.row, Some(1));
        assert!(state.finished());
        assert!(model.next_state(&state, RaceAction::Step(0)).is_none());
    }

    #[test]
    fn test_loser_retries_into_increment() {
        let model = CreateRaceModel::new(2);
        let mut state = model.init_states().remove(0);
        for step in [0, 1, 0, 1, 1] {
            state = model.next_state(&state, RaceAction::Step(step)).unwrap();
        }
        assert_eq!(state.row, Some(2));
        assert_eq!(state.successful_inserts, 1);
        assert!(state.finished());
    }

    #[test]
    fn stateright_create_race_model_check() {
        let checker = CreateRaceModel::new(3).checker().spawn_bfs().join();
        checker.assert_properties();
    }

    #[test]
    fn stateright_create_race_without_retry_loses_increments() {
        let checker = CreateRaceModel::without_retry(2).checker().spawn_bfs().join();
        assert!(checker.discovery("no_lost_increments").is_some());
        assert!(checker.discovery("single_create").is_none());
    }

    #[test]
    #[ignore] // Run with: cargo test stateright_create_race_wide -- --ignored --nocapture
    fn stateright_create_race_wide() {
        let checker = CreateRaceModel::new(5).checker().spawn_bfs().join();
        println!("States explored: {}", checker.unique_state_count());
        checker.assert_properties();
    }
}
