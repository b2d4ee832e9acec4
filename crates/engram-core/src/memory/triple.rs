//! Triples - the unit of knowledge
//!
//! A triple is a directed labelled relation `(source, relation, target)`
//! belonging to a single agent. [`TripleInput`] is the ingestion form that
//! callers hand to the compound operations; the optional sentiment is the
//! "fourth element" of a provided triple.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::validate_ident;

/// A bare `(source, relation, target)` triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Triple {
    /// Subject entity
    pub source: String,
    /// Relation label
    pub relation: String,
    /// Object entity
    pub target: String,
}

impl Triple {
    /// Build a triple from its parts
    pub fn new(
        source: impl Into<String>,
        relation: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Triple {
            source: source.into(),
            relation: relation.into(),
            target: target.into(),
        }
    }

    /// Reject empty components
    pub fn validate(&self) -> Result<()> {
        validate_ident("source", &self.source)?;
        validate_ident("relation", &self.relation)?;
        validate_ident("target", &self.target)?;
        Ok(())
    }
}

impl std::fmt::Display for Triple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.source, self.relation, self.target)
    }
}

/// A triple as supplied to the absorb operations, with optional sentiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripleInput {
    /// The triple itself
    #[serde(flatten)]
    pub triple: Triple,
    /// Emotional valence; neutral when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<f64>,
}

impl TripleInput {
    /// A triple with neutral sentiment
    pub fn plain(
        source: impl Into<String>,
        relation: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        TripleInput {
            triple: Triple::new(source, relation, target),
            sentiment: None,
        }
    }

    /// A triple with explicit sentiment
    pub fn with_sentiment(
        source: impl Into<String>,
        relation: impl Into<String>,
        target: impl Into<String>,
        sentiment: f64,
    ) -> Self {
        TripleInput {
            triple: Triple::new(source, relation, target),
            sentiment: Some(sentiment),
        }
    }
}

impl From<Triple> for TripleInput {
    fn from(triple: Triple) -> Self {
        TripleInput { triple, sentiment: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triple_displays_as_phrase() {
        let t = Triple::new("I", "support", "UBI");
        assert_eq!(t.to_string(), "I support UBI");
    }

    #[test]
    fn malformed_triple_is_rejected() {
        assert!(Triple::new("I", "", "UBI").validate().is_err());
        assert!(Triple::new("", "support", "UBI").validate().is_err());
        assert!(Triple::new("I", "support", "UBI").validate().is_ok());
    }
}
