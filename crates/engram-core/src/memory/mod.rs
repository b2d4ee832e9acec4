//! Data model
//!
//! Record types for the three owner-partitioned entity kinds: nodes
//! (entities with scheduling state), edges (triples with sentiment), and the
//! append-only interaction log. Everything here is plain data; persistence
//! lives in [`crate::storage`].

mod triple;

pub use triple::{Triple, TripleInput};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fsrs::MemoryState;
use crate::time::TimePoint;

// ============================================================================
// ACTION TYPES
// ============================================================================

/// Direction of an interaction-log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Context retrieval
    Read,
    /// Knowledge ingestion
    Write,
}

impl ActionType {
    /// Persisted string form
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Read => "read",
            ActionType::Write => "write",
        }
    }

    /// Parse the persisted string form
    pub fn parse_name(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(ActionType::Read),
            "write" => Ok(ActionType::Write),
            other => Err(Error::invalid("action_type", format!("unknown action `{other}`"))),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// An entity with its scheduling state, keyed by `(owner, id)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    /// Owning agent
    pub owner: String,
    /// Entity identifier, e.g. `"I"`, `"Bob"`, `"UBI"`
    pub id: String,
    /// Spaced-repetition state
    #[serde(flatten)]
    pub memory: MemoryState,
    /// When the entity was first referenced
    pub created_at: TimePoint,
}

/// A sentiment-weighted triple, keyed by `(owner, source, target, relation)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRecord {
    /// Owning agent
    pub owner: String,
    /// Subject entity
    pub source: String,
    /// Relation label
    pub relation: String,
    /// Object entity
    pub target: String,
    /// Informational weight, written as 1.0
    pub weight: f64,
    /// Emotional valence in `[-1, 1]`
    pub sentiment: f64,
    /// When the triple was last written
    pub created_at: TimePoint,
}

/// One append-only interaction-log row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Monotonic id reflecting commit order
    pub id: i64,
    /// Owning agent
    pub agent: String,
    /// Read or write
    pub action: ActionType,
    /// Raw text, or a 128-bit handle when the store runs in privacy mode
    pub content_or_handle: String,
    /// JSON map of auxiliary data (rating, sentiment, author, clamp audit)
    pub annotations: serde_json::Value,
    /// When the interaction happened
    pub at: TimePoint,
}

// ============================================================================
// VALIDATION HELPERS
// ============================================================================

/// Reject an empty or whitespace-only identifier
pub fn validate_ident(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid(field, "must not be empty"));
    }
    Ok(())
}

/// Reject a non-finite sentiment; values outside `[-1, 1]` are legal input
/// and get clamped at write time
pub fn validate_sentiment(value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::invalid("sentiment", format!("must be finite, got {value}")));
    }
    Ok(())
}

/// Clamp a (finite) sentiment into `[-1, 1]`
pub fn clamp_sentiment(value: f64) -> f64 {
    value.clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_type_round_trip() {
        for action in [ActionType::Read, ActionType::Write] {
            assert_eq!(ActionType::parse_name(action.as_str()).unwrap(), action);
        }
        assert!(ActionType::parse_name("delete").is_err());
    }

    #[test]
    fn sentiment_is_clamped_not_rejected() {
        assert!(validate_sentiment(3.5).is_ok());
        assert_eq!(clamp_sentiment(3.5), 1.0);
        assert_eq!(clamp_sentiment(-2.0), -1.0);
        assert_eq!(clamp_sentiment(0.25), 0.25);
    }

    #[test]
    fn non_finite_sentiment_is_rejected() {
        assert!(validate_sentiment(f64::NAN).is_err());
        assert!(validate_sentiment(f64::INFINITY).is_err());
        assert!(validate_sentiment(f64::NEG_INFINITY).is_err());
    }

    #[test]
    fn empty_ident_is_rejected() {
        assert!(validate_ident("owner", "").is_err());
        assert!(validate_ident("owner", "   ").is_err());
        assert!(validate_ident("owner", "Alice").is_ok());
    }
}
