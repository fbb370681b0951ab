//! Stateright Model Checking
//!
//! Exhaustive state-space exploration of the aggregation protocol. The DST
//! harness in `metrics::dst` samples interleavings with faults; these models
//! enumerate all of them for a small number of workers.
//!
//! ## Available Models
//!
//! - `create_race`: concurrent first INCREMENTs of an absent metric
//!
//! ## Running Model Checks
//!
//! ```bash
//! cargo test stateright -- --nocapture
//!
//! # Wider configurations are #[ignore]d
//! cargo test stateright -- --ignored --nocapture
//! ```

pub mod create_race;

pub use create_race::{CreateRaceModel, RaceAction, RaceState, WorkerPhase};
