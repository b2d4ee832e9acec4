//! Context builder
//!
//! Produces the memory view handed to a downstream language model. The
//! string layout is an external contract: a first-person stance section, a
//! third-party facts section, and an optional "what others think" section
//! for opinionated third-party rows.
//!
//! Topic matching is case-insensitive substring matching on entity
//! identifiers. An empty topic keeps only the stance recency window and
//! yields the empty-state facts sentinel.

use crate::error::Result;
use crate::memory::validate_ident;
use crate::storage::{StanceRow, Store, STANCE_CAP, WORLD_KNOWLEDGE_DEFAULT_LIMIT};
use crate::time::TimePoint;

/// Stance-section prefix
pub const STANCE_PREFIX: &str = "MY CURRENT STANCE: ";

/// Facts-section prefix
pub const FACTS_PREFIX: &str = "KNOWN FACTS: ";

/// Third-party opinion section prefix
pub const OTHERS_PREFIX: &str = "WHAT OTHERS THINK: ";

/// Shown when the agent holds no recent or matching stance
pub const EMPTY_STANCE: &str = "(I have no strong opinion yet)";

/// Shown when no third-party facts match the topic
pub const EMPTY_FACTS: &str = "(limited knowledge on this)";

/// Sentiment qualifier appended to a stance phrase, or empty for a
/// near-neutral edge
pub fn sentiment_qualifier(sentiment: f64) -> &'static str {
    if sentiment > 0.6 {
        " (very positively)"
    } else if sentiment > 0.3 {
        " (positively)"
    } else if sentiment > 0.1 {
        " (somewhat positively)"
    } else if sentiment < -0.6 {
        " (very negatively)"
    } else if sentiment < -0.3 {
        " (negatively)"
    } else if sentiment < -0.1 {
        " (somewhat negatively)"
    } else {
        ""
    }
}

fn stance_phrase(row: &StanceRow) -> String {
    format!(
        "{} {} {}{}",
        row.source,
        row.relation,
        row.target,
        sentiment_qualifier(row.sentiment)
    )
}

fn fact_phrase(row: &StanceRow) -> String {
    format!("{} {} {}", row.source, row.relation, row.target)
}

/// Assemble the contract string from the two query partitions
pub fn format_context(stance: &[StanceRow], world: &[StanceRow]) -> String {
    let mut out = String::from(STANCE_PREFIX);
    if stance.is_empty() {
        out.push_str(EMPTY_STANCE);
    } else {
        let phrases: Vec<String> = stance.iter().map(stance_phrase).collect();
        out.push_str(&phrases.join("; "));
    }

    out.push_str(". ");
    out.push_str(FACTS_PREFIX);
    if world.is_empty() {
        out.push_str(EMPTY_FACTS);
    } else {
        let phrases: Vec<String> = world.iter().map(fact_phrase).collect();
        out.push_str(&phrases.join("; "));
    }

    // Third-party rows with a real opinion get their own section
    let opinions: Vec<String> = world
        .iter()
        .filter(|row| row.sentiment.abs() > 0.1)
        .map(stance_phrase)
        .collect();
    if !opinions.is_empty() {
        out.push_str(". ");
        out.push_str(OTHERS_PREFIX);
        out.push_str(&opinions.join("; "));
    }

    out
}

impl Store {
    /// First-person edges for `owner`: topic matches on the target, or the
    /// edge falls inside the recency window. Newest first, capped at 8.
    pub fn agent_stance(
        &self,
        owner: &str,
        topic: &str,
        now: &TimePoint,
    ) -> Result<Vec<StanceRow>> {
        validate_ident("owner", owner)?;
        self.backend().agent_stance(
            owner,
            topic,
            now,
            self.config().stance_window_days(),
            STANCE_CAP,
        )
    }

    /// Third-party edges for `owner` matching the topic on either endpoint.
    /// Newest first; `limit` defaults to 10. An empty topic yields nothing.
    pub fn world_knowledge(
        &self,
        owner: &str,
        topic: &str,
        limit: Option<u32>,
    ) -> Result<Vec<StanceRow>> {
        validate_ident("owner", owner)?;
        self.backend()
            .world_knowledge(owner, topic, limit.unwrap_or(WORLD_KNOWLEDGE_DEFAULT_LIMIT))
    }

    /// The formatted memory view for `owner` on `topic` at `now`.
    ///
    /// Pure read: advances no scheduling state and appends no log record.
    pub fn build_context(&self, owner: &str, topic: &str, now: &TimePoint) -> Result<String> {
        let stance = self.agent_stance(owner, topic, now)?;
        let world = self.world_knowledge(owner, topic, None)?;
        Ok(format_context(&stance, &world))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(source: &str, relation: &str, target: &str, sentiment: f64) -> StanceRow {
        StanceRow {
            source: source.to_string(),
            relation: relation.to_string(),
            target: target.to_string(),
            sentiment,
        }
    }

    #[test]
    fn qualifier_bands() {
        assert_eq!(sentiment_qualifier(0.8), " (very positively)");
        assert_eq!(sentiment_qualifier(0.5), " (positively)");
        assert_eq!(sentiment_qualifier(0.2), " (somewhat positively)");
        assert_eq!(sentiment_qualifier(0.05), "");
        assert_eq!(sentiment_qualifier(-0.05), "");
        assert_eq!(sentiment_qualifier(-0.2), " (somewhat negatively)");
        assert_eq!(sentiment_qualifier(-0.5), " (negatively)");
        assert_eq!(sentiment_qualifier(-0.8), " (very negatively)");
    }

    #[test]
    fn qualifier_thresholds_are_exclusive() {
        assert_eq!(sentiment_qualifier(0.6), " (positively)");
        assert_eq!(sentiment_qualifier(0.3), " (somewhat positively)");
        assert_eq!(sentiment_qualifier(0.1), "");
        assert_eq!(sentiment_qualifier(-0.6), " (negatively)");
    }

    #[test]
    fn both_sections_populated() {
        let stance = vec![row("I", "support", "UBI", 0.8)];
        let world = vec![row("Bob", "opposes", "UBI", -0.6)];
        let context = format_context(&stance, &world);
        assert!(context.starts_with("MY CURRENT STANCE: I support UBI (very positively). "));
        assert!(context.contains("KNOWN FACTS: Bob opposes UBI"));
        assert!(context.contains("WHAT OTHERS THINK: Bob opposes UBI (negatively)"));
        assert_eq!(context.matches(FACTS_PREFIX).count(), 1);
        // Stance precedes world knowledge
        assert!(context.find("I support UBI").unwrap() < context.find("Bob opposes UBI").unwrap());
    }

    #[test]
    fn empty_sections_use_sentinels() {
        let context = format_context(&[], &[]);
        assert_eq!(
            context,
            "MY CURRENT STANCE: (I have no strong opinion yet). \
             KNOWN FACTS: (limited knowledge on this)"
        );
    }

    #[test]
    fn neutral_world_rows_skip_the_opinion_section() {
        let world = vec![row("Bob", "discusses", "UBI", 0.05)];
        let context = format_context(&[], &world);
        assert!(context.contains("KNOWN FACTS: Bob discusses UBI"));
        assert!(!context.contains(OTHERS_PREFIX));
    }

    #[test]
    fn multiple_phrases_join_with_semicolons() {
        let stance = vec![
            row("I", "support", "UBI", 0.8),
            row("I", "opposes", "tariffs", -0.4),
        ];
        let context = format_context(&stance, &[]);
        assert!(context.contains(
            "I support UBI (very positively); I opposes tariffs (negatively)"
        ));
    }
}
