//! # Engram Core
//!
//! Per-agent, temporally-decaying semantic knowledge store for
//! conversational agents:
//!
//! - **Triples**: beliefs as subject-relation-object edges with emotional
//!   valence, partitioned per agent with strict owner isolation
//! - **FSRS scheduling**: 21-parameter spaced repetition over every entity,
//!   so retrieval favours recent, reinforced knowledge
//! - **Dual time**: wall-clock instants or discrete simulation rounds,
//!   caller-controlled; the core never reads a wall clock during a write
//! - **Pluggable persistence**: embedded SQLite by default, Postgres and
//!   MySQL behind cargo features
//! - **Context views**: first-person stance vs. third-party knowledge,
//!   formatted for downstream prompt construction
//! - **Privacy mode**: interaction-log content replaced by UUID handles
//!   unless content storage is opted into
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use engram_core::{AgentStore, Store, StoreConfig, TimePoint, TripleInput};
//!
//! # fn main() -> engram_core::Result<()> {
//! let store = Arc::new(Store::open(StoreConfig::new("sqlite://:memory:"))?);
//! let agents = AgentStore::new(store);
//!
//! agents.create_or_get("Alice")?;
//! agents.set_time("Alice", TimePoint::round(1, 9)?)?;
//! agents.absorb(
//!     "Alice",
//!     "I support UBI",
//!     "Alice",
//!     Some(&[TripleInput::with_sentiment("I", "support", "UBI", 0.8)]),
//! )?;
//!
//! let context = agents.get_context("Alice", "UBI")?;
//! assert!(context.starts_with("MY CURRENT STANCE: "));
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): compile SQLite into the binary
//! - `postgres`: networked PostgreSQL backend behind an r2d2 pool
//! - `mysql`: networked MySQL backend behind an r2d2 pool

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod agents;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod extract;
pub mod fsrs;
pub mod learner;
pub mod memory;
pub mod storage;
pub mod time;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use error::{Error, Result};

pub use time::TimePoint;

pub use fsrs::{FsrsParams, LearningState, MemoryState, Rating, Scheduler};

pub use memory::{ActionType, EdgeRecord, LogRecord, NodeRecord, Triple, TripleInput};

pub use config::{SentimentThresholds, StoreConfig};

pub use storage::{StanceRow, Store, StoreStats, StoreUri};

pub use learner::{LearnOutcome, LearnRequest};

pub use context::{format_context, sentiment_qualifier};

pub use agents::{Agent, AgentStore, FIRST_PERSON};

pub use extract::{
    Extraction, Extractor, FastExtractor, LanguageModel, LlmExtractor, ReactionTriple,
    SentimentTriple,
};

pub use export::{AgentGraph, GraphLink, GraphNode, HistoryDocument, HistoryMetadata, HistoryStep};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of scheduler weights
pub const FSRS_PARAM_COUNT: usize = 21;

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Agent, AgentStore, Error, Extraction, Extractor, LearnRequest, MemoryState, Rating,
        Result, Scheduler, Store, StoreConfig, TimePoint, Triple, TripleInput,
    };
}
