//! Language-model strategy
//!
//! Generic over a caller-supplied [`LanguageModel`] collaborator; the crate
//! ships no model client of its own. The model is asked for a JSON document
//! matching [`Extraction`]; transient failures retry with exponential
//! backoff capped at 30 seconds, and exhaustion surfaces as a typed
//! extraction failure, never as an empty success.

use std::time::Duration;

use crate::error::{Error, Result};

use super::{Extraction, Extractor};

/// Default retry budget
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const BACKOFF_CAP_SECS: u64 = 30;

/// The out-of-crate collaborator: one blocking completion call
pub trait LanguageModel: Send + Sync {
    /// Complete `prompt`, returning the raw model output
    fn complete(&self, prompt: &str) -> std::result::Result<String, String>;
}

/// Delay before retry number `attempt` (zero-based): 1s, 2s, 4s, ... capped
/// at 30s
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(BACKOFF_CAP_SECS);
    Duration::from_secs(secs.min(BACKOFF_CAP_SECS))
}

/// Extraction through a language model with retry
pub struct LlmExtractor {
    model: Box<dyn LanguageModel>,
    max_retries: u32,
}

impl LlmExtractor {
    /// Wrap a model with the default retry budget.
    ///
    /// `None` means the underlying dependency is absent; that surfaces at
    /// construction, not at first use.
    pub fn from_model(model: Option<Box<dyn LanguageModel>>) -> Result<Self> {
        match model {
            Some(model) => Ok(LlmExtractor {
                model,
                max_retries: DEFAULT_MAX_RETRIES,
            }),
            None => Err(Error::DependencyMissing(
                "llm extraction requested but no language model is installed".to_string(),
            )),
        }
    }

    /// Override the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn prompt(text: &str, author: &str, agent_name: &str) -> String {
        format!(
            "Extract knowledge triples from the utterance below.\n\
             Speaker: {author}\nListener: {agent_name}\nUtterance: {text}\n\n\
             Reply with a single JSON object with keys worldFacts, \
             partnerStance, selfReaction, mode, overallSentiment, entities."
        )
    }

    fn parse(raw: &str) -> std::result::Result<Extraction, String> {
        // Models often wrap JSON in prose; take the outermost braces
        let start = raw.find('{').ok_or("no JSON object in model output")?;
        let end = raw.rfind('}').ok_or("no JSON object in model output")?;
        if end < start {
            return Err("malformed JSON braces in model output".to_string());
        }
        serde_json::from_str(&raw[start..=end]).map_err(|e| e.to_string())
    }
}

impl Extractor for LlmExtractor {
    fn extract(&self, text: &str, author: &str, agent_name: &str) -> Result<Extraction> {
        let prompt = Self::prompt(text, author, agent_name);
        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(attempt - 1);
                tracing::warn!(attempt, ?delay, error = %last_error, "extraction retry");
                std::thread::sleep(delay);
            }
            match self.model.complete(&prompt) {
                Ok(raw) => match Self::parse(&raw) {
                    Ok(mut extraction) => {
                        extraction.mode = self.mode_tag().to_string();
                        return Ok(extraction);
                    }
                    Err(e) => last_error = format!("unparseable output: {e}"),
                },
                Err(e) => last_error = e,
            }
        }

        Err(Error::Extraction(format!(
            "exhausted {} retries: {last_error}",
            self.max_retries
        )))
    }

    fn mode_tag(&self) -> &'static str {
        "llm"
    }
}
