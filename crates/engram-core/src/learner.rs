//! Triplet learner
//!
//! The single write path for knowledge: validate, advance both endpoints
//! through the scheduler, then commit nodes + edge + audit record in one
//! transaction. Retrying a failed call is safe because the edge upsert is
//! idempotent over its composite key; the extra audit row is acceptable
//! (logs are audit, not state).

use serde_json::json;
use uuid::Uuid;

use crate::error::Result;
use crate::fsrs::{MemoryState, Rating};
use crate::memory::{clamp_sentiment, validate_ident, validate_sentiment, ActionType, Triple};
use crate::storage::{EdgeSpec, LearnWriteSet, LogEntry, Store};
use crate::time::TimePoint;

/// One learn call: a triple, its review outcome, and when it happened
#[derive(Debug, Clone, PartialEq)]
pub struct LearnRequest {
    /// Subject entity
    pub source: String,
    /// Relation label
    pub relation: String,
    /// Object entity
    pub target: String,
    /// Review outcome for both endpoints
    pub rating: Rating,
    /// Emotional valence; clamped into `[-1, 1]` at write time
    pub sentiment: f64,
    /// Caller-supplied time of the write
    pub at: TimePoint,
    /// Who said it, recorded in the audit annotations
    pub author: Option<String>,
}

impl LearnRequest {
    /// A Good-rated, neutral-sentiment request
    pub fn new(
        source: impl Into<String>,
        relation: impl Into<String>,
        target: impl Into<String>,
        at: TimePoint,
    ) -> Self {
        LearnRequest {
            source: source.into(),
            relation: relation.into(),
            target: target.into(),
            rating: Rating::Good,
            sentiment: 0.0,
            at,
            author: None,
        }
    }

    /// Set the review outcome
    pub fn rating(mut self, rating: Rating) -> Self {
        self.rating = rating;
        self
    }

    /// Set the sentiment
    pub fn sentiment(mut self, sentiment: f64) -> Self {
        self.sentiment = sentiment;
        self
    }

    /// Record the author in the audit annotations
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// What a successful learn call produced
#[derive(Debug, Clone, PartialEq)]
pub struct LearnOutcome {
    /// New scheduling state of the source entity
    pub source: MemoryState,
    /// New scheduling state of the target entity
    pub target: MemoryState,
    /// Id of the appended audit record
    pub log_id: i64,
}

impl Store {
    /// Ingest one triple for `owner`, advancing the memory state of both
    /// endpoints.
    ///
    /// Runs as a single transaction: endpoint upserts, the edge upsert, and
    /// the audit record either all commit or none do.
    pub fn learn(&self, owner: &str, request: LearnRequest) -> Result<LearnOutcome> {
        validate_ident("owner", owner)?;
        let triple = Triple::new(
            request.source.clone(),
            request.relation.clone(),
            request.target.clone(),
        );
        triple.validate()?;
        validate_sentiment(request.sentiment)?;
        let sentiment = clamp_sentiment(request.sentiment);
        let clamped = sentiment != request.sentiment;
        if clamped {
            tracing::warn!(
                raw = request.sentiment,
                stored = sentiment,
                "sentiment clamped into [-1, 1]"
            );
        }

        let current_source = self
            .get_node(owner, &request.source)?
            .map(|n| n.memory)
            .unwrap_or_else(MemoryState::new_card);
        let next_source = self.scheduler().review(&current_source, request.rating, &request.at)?;

        // A reflexive edge touches one entity, not two
        let reflexive = request.source == request.target;
        let next_target = if reflexive {
            next_source.clone()
        } else {
            let current_target = self
                .get_node(owner, &request.target)?
                .map(|n| n.memory)
                .unwrap_or_else(MemoryState::new_card);
            self.scheduler().review(&current_target, request.rating, &request.at)?
        };

        let mut annotations = json!({
            "rating": request.rating.value(),
            "sentiment": sentiment,
            "source_reps": next_source.reps,
            "target_reps": next_target.reps,
        });
        if let Some(author) = &request.author {
            annotations["author"] = json!(author);
        }
        if clamped {
            annotations["sentiment_clamped"] = json!(true);
            annotations["sentiment_raw"] = json!(request.sentiment);
        }

        let stored = if self.stores_log_content() {
            triple.to_string()
        } else {
            Uuid::new_v4().to_string()
        };

        let mut nodes = vec![(request.source.clone(), next_source.clone())];
        if !reflexive {
            nodes.push((request.target.clone(), next_target.clone()));
        }

        let write = LearnWriteSet {
            owner: owner.to_string(),
            nodes,
            edge: EdgeSpec {
                source: request.source,
                relation: request.relation,
                target: request.target,
                sentiment,
            },
            log: LogEntry {
                action: ActionType::Write,
                stored,
                annotations,
            },
            at: request.at,
        };
        let log_id = self.backend().apply_learn(&write)?;
        tracing::debug!(owner, log_id, "learned triple");

        Ok(LearnOutcome {
            source: next_source,
            target: next_target,
            log_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::error::Error;
    use crate::fsrs::LearningState;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> Store {
        let path = dir.path().join("kg.db");
        Store::open(StoreConfig::new(format!("sqlite://{}", path.display()))).unwrap()
    }

    fn round(day: u32, hour: u32) -> TimePoint {
        TimePoint::round(day, hour).unwrap()
    }

    #[test]
    fn learn_creates_endpoints_edge_and_log() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let outcome = store
            .learn(
                "Alice",
                LearnRequest::new("I", "support", "UBI", round(1, 9))
                    .rating(Rating::Easy)
                    .sentiment(0.8),
            )
            .unwrap();
        assert_eq!(outcome.source.stability, 8.2956);
        assert_eq!(outcome.source.state, LearningState::Learning);

        let node = store.get_node("Alice", "I").unwrap().unwrap();
        assert_eq!(node.memory.reps, 1);
        let edge = store.get_edge("Alice", "I", "support", "UBI").unwrap().unwrap();
        assert_eq!(edge.sentiment, 0.8);
        assert_eq!(edge.weight, 1.0);

        let log = store.iter_log("Alice", None, None).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].annotations["rating"], 4);
        assert_eq!(log[0].annotations["source_reps"], 1);
    }

    #[test]
    fn out_of_range_sentiment_is_clamped_and_audited() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store
            .learn(
                "Alice",
                LearnRequest::new("I", "loves", "cake", round(1, 0)).sentiment(3.5),
            )
            .unwrap();

        let edge = store.get_edge("Alice", "I", "loves", "cake").unwrap().unwrap();
        assert_eq!(edge.sentiment, 1.0);

        let log = store.iter_log("Alice", None, None).unwrap();
        assert_eq!(log[0].annotations["sentiment_clamped"], true);
        assert_eq!(log[0].annotations["sentiment_raw"], 3.5);
    }

    #[test]
    fn non_finite_sentiment_is_rejected_before_any_write() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let err = store
            .learn(
                "Alice",
                LearnRequest::new("I", "fears", "NaN", round(1, 0)).sentiment(f64::NAN),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { field: "sentiment", .. }));
        assert!(store.get_node("Alice", "I").unwrap().is_none());
        assert!(store.iter_log("Alice", None, None).unwrap().is_empty());
    }

    #[test]
    fn repeated_learn_advances_reps_but_keeps_one_edge() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let request = LearnRequest::new("I", "support", "UBI", round(1, 9)).sentiment(0.4);
        store.learn("Alice", request.clone()).unwrap();
        store.learn("Alice", request).unwrap();

        let node = store.get_node("Alice", "I").unwrap().unwrap();
        assert_eq!(node.memory.reps, 2);
        assert_eq!(node.memory.last_review, Some(round(1, 9)));
        assert_eq!(store.list_edges("Alice").unwrap().len(), 1);
        assert_eq!(store.iter_log("Alice", None, None).unwrap().len(), 2);
    }

    #[test]
    fn reflexive_edge_schedules_the_entity_once() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store
            .learn("Alice", LearnRequest::new("I", "doubts", "I", round(1, 0)))
            .unwrap();
        let node = store.get_node("Alice", "I").unwrap().unwrap();
        assert_eq!(node.memory.reps, 1);
    }

    #[test]
    fn author_is_recorded_in_annotations() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store
            .learn(
                "Alice",
                LearnRequest::new("Bob", "said", "thing", round(1, 0)).author("Bob"),
            )
            .unwrap();
        let log = store.iter_log("Alice", None, None).unwrap();
        assert_eq!(log[0].annotations["author"], "Bob");
    }
}
