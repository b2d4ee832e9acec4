//! Scheduler state machine
//!
//! Wraps the pure formulas in [`super::algorithm`] with typed state, rating
//! validation, and the time model. `Scheduler::review` is the only entry
//! point the learner uses: current state in, next state out.

use serde::{Deserialize, Serialize};

use super::algorithm::{
    self, DEFAULT_WEIGHTS, MAX_DIFFICULTY, MIN_DIFFICULTY,
};
use crate::error::{Error, Result};
use crate::time::TimePoint;

/// Review outcome rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Rating {
    /// Complete failure to recall
    Again = 1,
    /// Recalled with serious difficulty
    Hard = 2,
    /// Recalled correctly
    Good = 3,
    /// Recalled effortlessly
    Easy = 4,
}

impl Rating {
    /// Numeric value `1..=4`
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Parse a numeric rating, rejecting anything outside `1..=4`
    pub fn from_value(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Rating::Again),
            2 => Ok(Rating::Hard),
            3 => Ok(Rating::Good),
            4 => Ok(Rating::Easy),
            other => Err(Error::invalid("rating", format!("must be 1..=4, got {other}"))),
        }
    }
}

impl Default for Rating {
    fn default() -> Self {
        Rating::Good
    }
}

/// Lifecycle stage of a scheduled entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum LearningState {
    /// Never reviewed
    #[default]
    New = 0,
    /// Reviewed at least once, last outcome was a lapse or first exposure
    Learning = 1,
    /// In the long-term review cycle
    Review = 2,
}

impl LearningState {
    /// Numeric value `0..=2` as persisted
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Parse the persisted numeric value
    pub fn from_value(value: u8) -> Result<Self> {
        match value {
            0 => Ok(LearningState::New),
            1 => Ok(LearningState::Learning),
            2 => Ok(LearningState::Review),
            other => Err(Error::invalid("state", format!("must be 0..=2, got {other}"))),
        }
    }
}

/// Per-entity scheduling state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryState {
    /// Days after a review at which retrievability falls to 0.9
    pub stability: f64,
    /// Inherent recall cost, `1..=10`
    pub difficulty: f64,
    /// Time of the most recent review; set iff `reps >= 1`
    pub last_review: Option<TimePoint>,
    /// Number of reviews so far
    pub reps: u32,
    /// Lifecycle stage
    pub state: LearningState,
}

impl MemoryState {
    /// State of an entity that has never been reviewed
    pub fn new_card() -> Self {
        MemoryState {
            stability: 0.0,
            difficulty: 5.0,
            last_review: None,
            reps: 0,
            state: LearningState::New,
        }
    }

    /// Whether this entity has never been reviewed
    pub fn is_new(&self) -> bool {
        self.reps == 0
    }
}

impl Default for MemoryState {
    fn default() -> Self {
        Self::new_card()
    }
}

/// The 21 tunable scheduler weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FsrsParams(pub [f64; 21]);

impl FsrsParams {
    /// Validate every weight is finite
    pub fn validate(&self) -> Result<()> {
        for (i, w) in self.0.iter().enumerate() {
            if !w.is_finite() {
                return Err(Error::config("fsrs_params", format!("weight {i} is not finite")));
            }
        }
        Ok(())
    }
}

impl Default for FsrsParams {
    fn default() -> Self {
        FsrsParams(DEFAULT_WEIGHTS)
    }
}

/// Pure, reentrant scheduler over a fixed parameter vector
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    params: FsrsParams,
}

impl Scheduler {
    /// Build a scheduler with custom weights
    pub fn new(params: FsrsParams) -> Result<Self> {
        params.validate()?;
        Ok(Scheduler { params })
    }

    /// The weight vector in use
    pub fn params(&self) -> &FsrsParams {
        &self.params
    }

    /// Advance `state` by one review with `rating` at time `now`.
    ///
    /// Pure: the input state is untouched. Guarantees on the output:
    /// stability `>= 0.1`, difficulty in `[1, 10]`, `reps` incremented,
    /// `last_review = now`. A `now` earlier than the previous review is
    /// treated as zero elapsed time, not an error.
    pub fn review(&self, state: &MemoryState, rating: Rating, now: &TimePoint) -> Result<MemoryState> {
        self.validate_state(state)?;
        let w = &self.params.0;
        let r = rating.value();

        if state.is_new() {
            return Ok(MemoryState {
                stability: algorithm::initial_stability(w, r),
                difficulty: algorithm::initial_difficulty(w, r),
                last_review: Some(*now),
                reps: 1,
                state: LearningState::Learning,
            });
        }

        let elapsed = state
            .last_review
            .as_ref()
            .map(|prev| now.days_since(prev))
            .unwrap_or(0.0);

        let retr = algorithm::retrievability(w, elapsed, state.stability);
        let difficulty = algorithm::next_difficulty(w, state.difficulty, r);

        let stability = if elapsed < 1.0 {
            algorithm::same_period_stability(w, state.stability, r)
        } else if rating == Rating::Again {
            algorithm::next_forget_stability(w, difficulty, state.stability, retr)
        } else {
            algorithm::next_recall_stability(w, difficulty, state.stability, retr, r)
        };

        Ok(MemoryState {
            stability,
            difficulty,
            last_review: Some(*now),
            reps: state.reps + 1,
            state: if rating == Rating::Again {
                LearningState::Learning
            } else {
                LearningState::Review
            },
        })
    }

    /// Recall probability for `state` at time `now`.
    ///
    /// A never-reviewed entity is fully retrievable by definition.
    pub fn retrievability(&self, state: &MemoryState, now: &TimePoint) -> f64 {
        let Some(prev) = state.last_review.as_ref() else {
            return 1.0;
        };
        if state.is_new() || state.stability <= 0.0 {
            return 1.0;
        }
        algorithm::retrievability(&self.params.0, now.days_since(prev), state.stability)
    }

    fn validate_state(&self, state: &MemoryState) -> Result<()> {
        if !state.stability.is_finite() || state.stability < 0.0 {
            return Err(Error::invalid(
                "stability",
                format!("must be finite and >= 0, got {}", state.stability),
            ));
        }
        if state.reps > 0
            && (!state.difficulty.is_finite()
                || !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&state.difficulty))
        {
            return Err(Error::invalid(
                "difficulty",
                format!("must be finite and in [1, 10], got {}", state.difficulty),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(day: u32, hour: u32) -> TimePoint {
        TimePoint::round(day, hour).unwrap()
    }

    #[test]
    fn rating_range_is_closed() {
        assert!(Rating::from_value(0).is_err());
        assert!(Rating::from_value(5).is_err());
        assert_eq!(Rating::from_value(3).unwrap(), Rating::Good);
    }

    #[test]
    fn first_review_uses_initial_tables() {
        let scheduler = Scheduler::default();
        let next = scheduler
            .review(&MemoryState::new_card(), Rating::Easy, &day(1, 9))
            .unwrap();
        assert_eq!(next.stability, 8.2956);
        assert_eq!(next.difficulty, 1.0);
        assert_eq!(next.reps, 1);
        assert_eq!(next.state, LearningState::Learning);
        assert_eq!(next.last_review, Some(day(1, 9)));
    }

    #[test]
    fn reinforcement_grows_stability() {
        let scheduler = Scheduler::default();
        let first = scheduler
            .review(&MemoryState::new_card(), Rating::Easy, &day(1, 9))
            .unwrap();
        let second = scheduler.review(&first, Rating::Good, &day(2, 9)).unwrap();
        assert!(second.stability > first.stability);
        assert_eq!(second.reps, 2);
        assert_eq!(second.state, LearningState::Review);
    }

    #[test]
    fn lapse_shrinks_stability_and_returns_to_learning() {
        let scheduler = Scheduler::default();
        let first = scheduler
            .review(&MemoryState::new_card(), Rating::Easy, &day(1, 9))
            .unwrap();
        let second = scheduler.review(&first, Rating::Good, &day(2, 9)).unwrap();
        let third = scheduler.review(&second, Rating::Again, &day(12, 9)).unwrap();
        assert!(third.stability < second.stability);
        assert_eq!(third.state, LearningState::Learning);
    }

    #[test]
    fn stability_monotone_under_repeated_success() {
        let scheduler = Scheduler::default();
        let mut state = scheduler
            .review(&MemoryState::new_card(), Rating::Good, &day(1, 0))
            .unwrap();
        let mut last = state.stability;
        for d in 2..12 {
            state = scheduler.review(&state, Rating::Good, &day(d * 3, 0)).unwrap();
            assert!(state.stability >= last, "regressed at day {}", d * 3);
            last = state.stability;
        }
    }

    #[test]
    fn same_period_review_is_damped() {
        let scheduler = Scheduler::default();
        let first = scheduler
            .review(&MemoryState::new_card(), Rating::Good, &day(1, 9))
            .unwrap();
        // Three hours later: the damped branch, not the full recall formula
        let second = scheduler.review(&first, Rating::Good, &day(1, 12)).unwrap();
        assert!(second.stability >= 0.1);
        let full = scheduler.review(&first, Rating::Good, &day(3, 9)).unwrap();
        assert!(second.stability < full.stability);
    }

    #[test]
    fn clock_running_backwards_is_zero_elapsed() {
        let scheduler = Scheduler::default();
        let first = scheduler
            .review(&MemoryState::new_card(), Rating::Good, &day(5, 0))
            .unwrap();
        let earlier = scheduler.review(&first, Rating::Good, &day(2, 0));
        assert!(earlier.is_ok());
    }

    #[test]
    fn non_finite_state_is_rejected() {
        let scheduler = Scheduler::default();
        let mut bad = MemoryState::new_card();
        bad.stability = f64::NAN;
        assert!(matches!(
            scheduler.review(&bad, Rating::Good, &day(1, 0)),
            Err(Error::InvalidInput { field: "stability", .. })
        ));
    }

    #[test]
    fn retrievability_at_stability_is_ninety_percent() {
        let scheduler = Scheduler::default();
        let state = scheduler
            .review(&MemoryState::new_card(), Rating::Easy, &day(1, 0))
            .unwrap();
        // stability is 8.2956 days; probe at day 1 + 8.2956 ~ round (9, 7)
        // exact probe needs fractional days, so check the formula directly
        let r = algorithm::retrievability(&scheduler.params().0, state.stability, state.stability);
        assert!((r - 0.9).abs() < 1e-9);
    }

    #[test]
    fn mixed_time_representations_schedule() {
        let scheduler = Scheduler::default();
        let first = scheduler
            .review(&MemoryState::new_card(), Rating::Good, &day(1, 0))
            .unwrap();
        let wall = TimePoint::absolute("2026-04-01T00:00:00Z".parse().unwrap());
        // Round -> absolute mix: elapsed clamps to a sane non-negative value
        let next = scheduler.review(&first, Rating::Good, &wall).unwrap();
        assert!(next.stability >= first.stability || next.stability >= 0.1);
    }
}
