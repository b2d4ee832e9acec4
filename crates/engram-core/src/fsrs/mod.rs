//! FSRS memory scheduler
//!
//! 21-parameter spaced-repetition model with a personalizable forgetting
//! curve decay (w20).
//!
//! Core formula: `R = (1 + FACTOR * t / S)^(-w20)` where
//! `FACTOR = 0.9^(-1/w20) - 1`, so retrievability is exactly 0.9 when the
//! elapsed time equals the stability. The scheduler is a pure transformer
//! over per-entity state; it performs no I/O and holds no mutable state.

mod algorithm;
mod scheduler;

pub use algorithm::{
    forgetting_factor, initial_difficulty, initial_stability, mean_reversion_target,
    next_difficulty, retrievability, DEFAULT_WEIGHTS, MAX_DIFFICULTY, MIN_DIFFICULTY,
    MIN_STABILITY,
};

pub use scheduler::{FsrsParams, LearningState, MemoryState, Rating, Scheduler};
