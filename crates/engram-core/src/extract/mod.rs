//! Extraction strategies
//!
//! Pluggable contract turning free text into triple groups. The store
//! functions without any strategy installed (callers supply triples); when
//! one is installed, the absorb operations fall back to it.
//!
//! Two concrete strategies ship here: a deterministic lexical one
//! ([`FastExtractor`]) and a language-model one ([`LlmExtractor`]) that is
//! generic over an out-of-crate [`LanguageModel`] collaborator.

mod fast;
mod llm;

pub use fast::FastExtractor;
pub use llm::{backoff_delay, LanguageModel, LlmExtractor};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fsrs::Rating;
use crate::memory::Triple;

/// A triple with the speaker's sentiment attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentTriple {
    /// The triple
    #[serde(flatten)]
    pub triple: Triple,
    /// Speaker sentiment toward the target
    pub sentiment: f64,
}

/// A first-person reaction triple with its review outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionTriple {
    /// The triple
    #[serde(flatten)]
    pub triple: Triple,
    /// How strongly the agent internalised it
    pub rating: Rating,
    /// The agent's own sentiment
    pub sentiment: f64,
}

/// Everything a strategy pulls out of one utterance
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Extraction {
    /// Impersonal facts about the world
    pub world_facts: Vec<Triple>,
    /// What the conversation partner asserted, with sentiment
    pub partner_stance: Vec<SentimentTriple>,
    /// The agent's own reaction
    pub self_reaction: Vec<ReactionTriple>,
    /// Which strategy produced this
    pub mode: String,
    /// Overall valence of the utterance
    pub overall_sentiment: f64,
    /// Entity identifiers mentioned
    pub entities: Vec<String>,
}

/// The strategy contract
pub trait Extractor: Send + Sync {
    /// Extract triple groups from `text` spoken by `author` toward
    /// `agent_name`
    fn extract(&self, text: &str, author: &str, agent_name: &str) -> Result<Extraction>;

    /// Short tag naming the strategy
    fn mode_tag(&self) -> &'static str;
}
