//! Agent registry and compound operations
//!
//! A mutex-guarded map of lightweight agent handles over one shared store.
//! Each handle carries the agent's current time, set explicitly by the
//! caller; the registry never reads a wall clock. Every per-agent operation
//! checks existence and fails typed when the agent is unknown, except
//! `create_or_get`, which creates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::error::{Error, Result};
use crate::extract::Extractor;
use crate::learner::LearnRequest;
use crate::memory::{validate_ident, ActionType, TripleInput};
use crate::storage::Store;
use crate::time::TimePoint;

/// First-person subject token
pub const FIRST_PERSON: &str = "I";

/// A lightweight per-agent handle: name plus current time
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    /// Agent name; doubles as the owner key in the store
    pub name: String,
    /// The agent's current time, caller-controlled
    pub now: TimePoint,
}

/// Registry of agents over a shared store
pub struct AgentStore {
    store: Arc<Store>,
    extractor: Option<Box<dyn Extractor>>,
    agents: Mutex<HashMap<String, Agent>>,
}

impl AgentStore {
    /// A registry with no extraction strategy installed; absorb operations
    /// then require caller-supplied triples
    pub fn new(store: Arc<Store>) -> Self {
        AgentStore {
            store,
            extractor: None,
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// Install an extraction strategy for triple-less absorbs
    pub fn with_extractor(mut self, extractor: Box<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// The shared store
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn agents(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Agent>>> {
        self.agents
            .lock()
            .map_err(|_| Error::ResourceUnavailable("agent registry lock poisoned".to_string()))
    }

    /// Create the agent if unknown, otherwise return the existing handle.
    /// Idempotent; a fresh agent starts at round `(1, 0)`.
    pub fn create_or_get(&self, name: &str) -> Result<Agent> {
        validate_ident("name", name)?;
        let mut agents = self.agents()?;
        let agent = agents.entry(name.to_string()).or_insert_with(|| Agent {
            name: name.to_string(),
            now: TimePoint::Round { day: 1, hour: 0 },
        });
        Ok(agent.clone())
    }

    /// Set the agent's current time
    pub fn set_time(&self, name: &str, now: TimePoint) -> Result<()> {
        if let Some((day, hour)) = now.round_parts() {
            // Revalidate: the tuple may come from deserialised data
            TimePoint::round(day, hour)?;
        }
        let mut agents = self.agents()?;
        let agent = agents
            .get_mut(name)
            .ok_or_else(|| Error::AgentNotFound(name.to_string()))?;
        agent.now = now;
        Ok(())
    }

    /// The agent's current time
    pub fn current_time(&self, name: &str) -> Result<TimePoint> {
        let agents = self.agents()?;
        agents
            .get(name)
            .map(|a| a.now)
            .ok_or_else(|| Error::AgentNotFound(name.to_string()))
    }

    /// Ingest what a conversation partner said.
    ///
    /// With `triples`, each is learned directly (optional fourth element as
    /// sentiment, Good rating). Without, the installed extraction strategy
    /// runs; with neither, the call fails typed rather than silently
    /// succeeding. One log record covers the utterance itself; in privacy
    /// mode its content is a generated handle and the raw text is discarded.
    pub fn absorb(
        &self,
        name: &str,
        content: &str,
        author: &str,
        triples: Option<&[TripleInput]>,
    ) -> Result<()> {
        let now = self.current_time(name)?;
        self.absorb_at(name, content, author, triples, &now, false)
    }

    /// The memory view for `name` on `topic`. Pure read: no scheduling
    /// state advances and nothing is logged.
    pub fn get_context(&self, name: &str, topic: &str) -> Result<String> {
        let now = self.current_time(name)?;
        self.store.build_context(name, topic, &now)
    }

    /// Absorb, then build the context, as one logical unit: when the absorb
    /// half fails no context is returned. The retrieval is audited with a
    /// Read record.
    pub fn process_and_get_context(
        &self,
        name: &str,
        topic: &str,
        text: &str,
        author: &str,
        triples: Option<&[TripleInput]>,
    ) -> Result<String> {
        let now = self.current_time(name)?;
        self.absorb_at(name, text, author, triples, &now, false)?;
        let context = self.store.build_context(name, topic, &now)?;
        self.store.log(
            name,
            ActionType::Read,
            topic,
            json!({ "topic": topic, "context_chars": context.len() }),
            &now,
            None,
        )?;
        Ok(context)
    }

    /// Write back what the agent itself said: every triple is rewritten
    /// with a first-person source before learning
    pub fn update_with_response(
        &self,
        name: &str,
        response: &str,
        triples: Option<&[TripleInput]>,
    ) -> Result<()> {
        let now = self.current_time(name)?;
        self.absorb_at(name, response, name, triples, &now, true)
    }

    fn absorb_at(
        &self,
        name: &str,
        content: &str,
        author: &str,
        triples: Option<&[TripleInput]>,
        now: &TimePoint,
        first_person: bool,
    ) -> Result<()> {
        validate_ident("author", author)?;

        let (count, mode) = match triples {
            Some(triples) => {
                for input in triples {
                    let source = if first_person {
                        FIRST_PERSON.to_string()
                    } else {
                        input.triple.source.clone()
                    };
                    let request = LearnRequest::new(
                        source,
                        input.triple.relation.clone(),
                        input.triple.target.clone(),
                        *now,
                    )
                    .sentiment(input.sentiment.unwrap_or(0.0))
                    .author(author);
                    self.store.learn(name, request)?;
                }
                (triples.len(), "provided")
            }
            None => {
                let Some(extractor) = self.extractor.as_deref() else {
                    return Err(Error::DependencyMissing(
                        "no extraction capability: supply triples or install a strategy"
                            .to_string(),
                    ));
                };
                let extraction = extractor.extract(content, author, name)?;
                let mut count = 0usize;

                for fact in &extraction.world_facts {
                    let source = if first_person {
                        FIRST_PERSON.to_string()
                    } else {
                        fact.source.clone()
                    };
                    let request =
                        LearnRequest::new(source, fact.relation.clone(), fact.target.clone(), *now)
                            .author(author);
                    self.store.learn(name, request)?;
                    count += 1;
                }
                for stance in &extraction.partner_stance {
                    let source = if first_person {
                        FIRST_PERSON.to_string()
                    } else {
                        stance.triple.source.clone()
                    };
                    let request = LearnRequest::new(
                        source,
                        stance.triple.relation.clone(),
                        stance.triple.target.clone(),
                        *now,
                    )
                    .sentiment(stance.sentiment)
                    .author(author);
                    self.store.learn(name, request)?;
                    count += 1;
                }
                for reaction in &extraction.self_reaction {
                    let request = LearnRequest::new(
                        FIRST_PERSON,
                        reaction.triple.relation.clone(),
                        reaction.triple.target.clone(),
                        *now,
                    )
                    .rating(reaction.rating)
                    .sentiment(reaction.sentiment)
                    .author(author);
                    self.store.learn(name, request)?;
                    count += 1;
                }
                (count, extractor.mode_tag())
            }
        };

        self.store.log(
            name,
            ActionType::Write,
            content,
            json!({ "author": author, "triples": count, "mode": mode }),
            now,
            None,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::extract::FastExtractor;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn open_agents(dir: &tempfile::TempDir) -> AgentStore {
        let path = dir.path().join("kg.db");
        let store = Store::open(StoreConfig::new(format!("sqlite://{}", path.display()))).unwrap();
        AgentStore::new(Arc::new(store))
    }

    fn round(day: u32, hour: u32) -> TimePoint {
        TimePoint::round(day, hour).unwrap()
    }

    #[test]
    fn create_or_get_is_idempotent() {
        let dir = tempdir().unwrap();
        let agents = open_agents(&dir);
        let first = agents.create_or_get("Alice").unwrap();
        agents.set_time("Alice", round(3, 7)).unwrap();
        let second = agents.create_or_get("Alice").unwrap();
        assert_eq!(first.name, second.name);
        assert_eq!(second.now, round(3, 7));
    }

    #[test]
    fn unknown_agent_fails_typed() {
        let dir = tempdir().unwrap();
        let agents = open_agents(&dir);
        assert!(matches!(
            agents.set_time("Ghost", round(1, 0)),
            Err(Error::AgentNotFound(_))
        ));
        assert!(matches!(
            agents.get_context("Ghost", "UBI"),
            Err(Error::AgentNotFound(_))
        ));
        assert!(matches!(
            agents.absorb("Ghost", "text", "Bob", None),
            Err(Error::AgentNotFound(_))
        ));
    }

    #[test]
    fn absorb_with_triples_learns_and_logs_a_handle() {
        let dir = tempdir().unwrap();
        let agents = open_agents(&dir);
        agents.create_or_get("Alice").unwrap();
        agents
            .absorb(
                "Alice",
                "secret text",
                "Bob",
                Some(&[TripleInput::plain("Bob", "said", "thing")]),
            )
            .unwrap();

        let store = agents.store();
        assert!(store.get_edge("Alice", "Bob", "said", "thing").unwrap().is_some());

        // Privacy mode: every content column is a UUID, never the raw text
        let log = store.iter_log("Alice", None, None).unwrap();
        assert!(!log.is_empty());
        for record in &log {
            assert_ne!(record.content_or_handle, "secret text");
            assert!(Uuid::parse_str(&record.content_or_handle).is_ok());
        }
        let utterance = log.last().unwrap();
        assert_eq!(utterance.annotations["author"], "Bob");
        assert_eq!(utterance.annotations["triples"], 1);
    }

    #[test]
    fn absorb_without_triples_or_extractor_fails_typed() {
        let dir = tempdir().unwrap();
        let agents = open_agents(&dir);
        agents.create_or_get("Alice").unwrap();
        assert!(matches!(
            agents.absorb("Alice", "some text", "Bob", None),
            Err(Error::DependencyMissing(_))
        ));
        // Nothing was written
        assert!(agents.store().iter_log("Alice", None, None).unwrap().is_empty());
    }

    #[test]
    fn absorb_through_the_fast_strategy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kg.db");
        let store = Store::open(StoreConfig::new(format!("sqlite://{}", path.display()))).unwrap();
        let thresholds = store.config().sentiment_thresholds;
        let agents =
            AgentStore::new(Arc::new(store)).with_extractor(Box::new(FastExtractor::new(thresholds)));

        agents.create_or_get("Alice").unwrap();
        agents.set_time("Alice", round(1, 9)).unwrap();
        agents.absorb("Alice", "UBI is a great benefit", "Bob", None).unwrap();

        let store = agents.store();
        assert!(store.get_edge("Alice", "Bob", "supports", "UBI").unwrap().is_some());
    }

    #[test]
    fn update_with_response_rewrites_source_to_first_person() {
        let dir = tempdir().unwrap();
        let agents = open_agents(&dir);
        agents.create_or_get("Alice").unwrap();
        agents.set_time("Alice", round(1, 9)).unwrap();
        agents
            .update_with_response(
                "Alice",
                "I think UBI is right",
                Some(&[TripleInput::with_sentiment("Alice", "supports", "UBI", 0.7)]),
            )
            .unwrap();

        let store = agents.store();
        // The caller's source is overridden
        assert!(store.get_edge("Alice", "I", "supports", "UBI").unwrap().is_some());
        assert!(store.get_edge("Alice", "Alice", "supports", "UBI").unwrap().is_none());
    }

    #[test]
    fn process_and_get_context_returns_fresh_view_and_read_audit() {
        let dir = tempdir().unwrap();
        let agents = open_agents(&dir);
        agents.create_or_get("Alice").unwrap();
        agents.set_time("Alice", round(1, 9)).unwrap();

        let context = agents
            .process_and_get_context(
                "Alice",
                "UBI",
                "what do you think?",
                "Bob",
                Some(&[TripleInput::with_sentiment("I", "support", "UBI", 0.8)]),
            )
            .unwrap();
        assert!(context.contains("I support UBI (very positively)"));

        let log = agents.store().iter_log("Alice", None, None).unwrap();
        let read = log.iter().find(|r| r.action == ActionType::Read).unwrap();
        assert_eq!(read.annotations["topic"], "UBI");
    }

    #[test]
    fn failed_absorb_yields_no_context() {
        let dir = tempdir().unwrap();
        let agents = open_agents(&dir);
        agents.create_or_get("Alice").unwrap();
        let result = agents.process_and_get_context(
            "Alice",
            "UBI",
            "text",
            "Bob",
            Some(&[TripleInput::plain("", "said", "thing")]),
        );
        assert!(matches!(result, Err(Error::InvalidInput { field: "source", .. })));
    }
}
