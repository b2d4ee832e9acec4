//! Fast lexical strategy
//!
//! Deterministic and dependency-free: entities are capitalised or all-caps
//! tokens, sentiment comes from a small polarity lexicon, and the relation
//! label is picked from the configured thresholds. Meant for tests,
//! simulations, and environments without a language model.

use std::collections::HashSet;

use crate::config::SentimentThresholds;
use crate::error::Result;
use crate::memory::Triple;

use super::{Extraction, Extractor, SentimentTriple};

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "excellent", "love", "like", "support", "agree", "wonderful", "right",
    "benefit", "helps", "fair", "important", "best", "favor", "happy", "hopeful", "progress",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "awful", "hate", "dislike", "oppose", "disagree", "wrong", "harm",
    "hurts", "unfair", "worst", "against", "angry", "afraid", "failure", "waste", "danger",
];

/// Words that start sentences without naming anything
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "i", "you", "we", "they", "he", "she", "it", "this", "that", "these",
    "those", "my", "your", "our", "their", "is", "are", "was", "were", "be", "been", "and",
    "or", "but", "if", "so", "what", "when", "how", "why", "yes", "no", "not", "do", "does",
];

/// Deterministic entity + lexicon-sentiment strategy
#[derive(Debug, Clone, Default)]
pub struct FastExtractor {
    thresholds: SentimentThresholds,
}

impl FastExtractor {
    /// Build with the configured relation thresholds
    pub fn new(thresholds: SentimentThresholds) -> Self {
        FastExtractor { thresholds }
    }

    /// Capitalised or all-caps tokens, first occurrence order, stopwords
    /// removed
    fn entities(text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for raw in text.split_whitespace() {
            let token: String = raw
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '-')
                .collect();
            if token.len() < 2 {
                continue;
            }
            let capitalised = token.chars().next().is_some_and(|c| c.is_uppercase());
            let acronym = token.len() >= 2 && token.chars().all(|c| c.is_uppercase() || c.is_numeric());
            if !capitalised && !acronym {
                continue;
            }
            if STOPWORDS.contains(&token.to_lowercase().as_str()) {
                continue;
            }
            if seen.insert(token.clone()) {
                out.push(token);
            }
        }
        out
    }

    /// Polarity score in `[-1, 1]` from lexicon hit counts
    fn sentiment(text: &str) -> f64 {
        let mut positive = 0u32;
        let mut negative = 0u32;
        for raw in text.split_whitespace() {
            let word: String = raw
                .chars()
                .filter(|c| c.is_alphabetic())
                .collect::<String>()
                .to_lowercase();
            if POSITIVE_WORDS.contains(&word.as_str()) {
                positive += 1;
            } else if NEGATIVE_WORDS.contains(&word.as_str()) {
                negative += 1;
            }
        }
        let total = positive + negative;
        if total == 0 {
            return 0.0;
        }
        (positive as f64 - negative as f64) / total as f64
    }

    /// Relation label for the measured polarity
    fn relation(&self, sentiment: f64) -> &'static str {
        if sentiment >= self.thresholds.support {
            "supports"
        } else if sentiment >= self.thresholds.like {
            "likes"
        } else if sentiment <= self.thresholds.oppose {
            "opposes"
        } else if sentiment <= self.thresholds.dislike {
            "dislikes"
        } else {
            "discusses"
        }
    }
}

impl Extractor for FastExtractor {
    fn extract(&self, text: &str, author: &str, agent_name: &str) -> Result<Extraction> {
        let mut entities = Self::entities(text);
        // The speakers themselves are not topics
        entities.retain(|e| e != author && e != agent_name);
        let overall_sentiment = Self::sentiment(text);
        let relation = self.relation(overall_sentiment);

        let partner_stance: Vec<SentimentTriple> = entities
            .iter()
            .map(|entity| SentimentTriple {
                triple: Triple::new(author, relation, entity.clone()),
                sentiment: overall_sentiment,
            })
            .collect();

        // Co-mentioned entities become world facts
        let world_facts: Vec<Triple> = entities
            .windows(2)
            .map(|pair| Triple::new(pair[0].clone(), "relates_to", pair[1].clone()))
            .collect();

        Ok(Extraction {
            world_facts,
            partner_stance,
            self_reaction: Vec::new(),
            mode: self.mode_tag().to_string(),
            overall_sentiment,
            entities,
        })
    }

    fn mode_tag(&self) -> &'static str {
        "fast"
    }
}
