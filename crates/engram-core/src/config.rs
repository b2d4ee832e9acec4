//! Store configuration
//!
//! One construction-time config object. Built directly, from `KG_`-prefixed
//! environment variables, or from a YAML/JSON file. Validation happens once
//! at construction; bad values surface as `ConfigurationInvalid` with the
//! offending field named.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fsrs::FsrsParams;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "KG_";

/// Thresholds the fast extraction strategy uses to map overall sentiment
/// onto a relation label
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SentimentThresholds {
    /// At or above: "supports"
    pub support: f64,
    /// At or below: "opposes"
    pub oppose: f64,
    /// At or above (below support): "likes"
    pub like: f64,
    /// At or below (above oppose): "dislikes"
    pub dislike: f64,
}

impl Default for SentimentThresholds {
    fn default() -> Self {
        SentimentThresholds {
            support: 0.5,
            oppose: -0.5,
            like: 0.2,
            dislike: -0.2,
        }
    }
}

impl SentimentThresholds {
    fn validate(&self) -> Result<()> {
        for (field, v) in [
            ("sentiment_thresholds.support", self.support),
            ("sentiment_thresholds.oppose", self.oppose),
            ("sentiment_thresholds.like", self.like),
            ("sentiment_thresholds.dislike", self.dislike),
        ] {
            if !v.is_finite() {
                return Err(Error::config("sentiment_thresholds", format!("{field} is not finite")));
            }
        }
        if self.oppose >= self.support || self.dislike >= self.like {
            return Err(Error::config(
                "sentiment_thresholds",
                "negative thresholds must sit below positive ones",
            ));
        }
        Ok(())
    }
}

/// Construction-time store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct StoreConfig {
    /// Backend and location, URL form; a bare filename is rewritten to the
    /// embedded-file form
    pub store_uri: String,
    /// When true, raw log text is stored; when false (default), a v4 UUID
    /// handle replaces it and the text is discarded
    pub store_log_content: bool,
    /// Resident pool connections (networked backends only)
    pub pool_size: u32,
    /// Extra connections the pool may open under load
    pub pool_overflow: u32,
    /// Seconds to wait for a pooled connection before failing
    pub pool_timeout_secs: u32,
    /// Seconds after which a pooled connection is recycled
    pub pool_recycle_secs: u32,
    /// Scheduler weight vector
    pub fsrs_params: FsrsParams,
    /// Fast-extractor relation thresholds
    pub sentiment_thresholds: SentimentThresholds,
    /// Recency window of the agent-stance query, in wall-clock minutes
    /// (round mode uses the equivalent fraction of a simulated day)
    pub stance_window_minutes: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            store_uri: String::new(),
            store_log_content: false,
            pool_size: 5,
            pool_overflow: 10,
            pool_timeout_secs: 30,
            pool_recycle_secs: 3600,
            fsrs_params: FsrsParams::default(),
            sentiment_thresholds: SentimentThresholds::default(),
            stance_window_minutes: 60,
        }
    }
}

impl StoreConfig {
    /// Config for a store at `uri` with every other key at its default
    pub fn new(uri: impl Into<String>) -> Self {
        StoreConfig {
            store_uri: uri.into(),
            ..Default::default()
        }
    }

    /// Read configuration from `KG_`-prefixed environment variables.
    ///
    /// Recognised: `KG_STORE_URI`, `KG_STORE_LOG_CONTENT`, `KG_POOL_SIZE`,
    /// `KG_POOL_OVERFLOW`, `KG_POOL_TIMEOUT_SECS`, `KG_POOL_RECYCLE_SECS`,
    /// `KG_STANCE_WINDOW_MINUTES`.
    pub fn from_env() -> Result<Self> {
        let mut config = StoreConfig::default();
        if let Some(uri) = env_var("STORE_URI") {
            config.store_uri = uri;
        }
        if let Some(v) = env_var("STORE_LOG_CONTENT") {
            config.store_log_content = parse_bool("store_log_content", &v)?;
        }
        if let Some(v) = env_var("POOL_SIZE") {
            config.pool_size = parse_u32("pool_size", &v)?;
        }
        if let Some(v) = env_var("POOL_OVERFLOW") {
            config.pool_overflow = parse_u32("pool_overflow", &v)?;
        }
        if let Some(v) = env_var("POOL_TIMEOUT_SECS") {
            config.pool_timeout_secs = parse_u32("pool_timeout_secs", &v)?;
        }
        if let Some(v) = env_var("POOL_RECYCLE_SECS") {
            config.pool_recycle_secs = parse_u32("pool_recycle_secs", &v)?;
        }
        if let Some(v) = env_var("STANCE_WINDOW_MINUTES") {
            config.stance_window_minutes = parse_u32("stance_window_minutes", &v)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML or JSON file, chosen by extension
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config("store_uri", format!("cannot read config file {}: {e}", path.display()))
        })?;
        let config: StoreConfig = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)
                .map_err(|e| Error::config("store_uri", format!("bad YAML config: {e}")))?,
            Some("json") => serde_json::from_str(&raw)
                .map_err(|e| Error::config("store_uri", format!("bad JSON config: {e}")))?,
            other => {
                return Err(Error::config(
                    "store_uri",
                    format!("unsupported config extension {other:?}; expected yaml, yml, or json"),
                ));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every field; called by the store at open
    pub fn validate(&self) -> Result<()> {
        if self.store_uri.trim().is_empty() {
            return Err(Error::config("store_uri", "must not be empty"));
        }
        if self.pool_size == 0 {
            return Err(Error::config("pool_size", "must be at least 1"));
        }
        if self.pool_timeout_secs == 0 {
            return Err(Error::config("pool_timeout_secs", "must be at least 1"));
        }
        if self.stance_window_minutes == 0 {
            return Err(Error::config("stance_window_minutes", "must be at least 1"));
        }
        self.fsrs_params.validate()?;
        self.sentiment_thresholds.validate()?;
        Ok(())
    }

    /// The stance recency window expressed in fractional days
    pub fn stance_window_days(&self) -> f64 {
        self.stance_window_minutes as f64 / (24.0 * 60.0)
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{suffix}")).ok().filter(|v| !v.is_empty())
}

fn parse_bool(field: &'static str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::config(field, format!("expected a boolean, got `{other}`"))),
    }
}

fn parse_u32(field: &'static str, raw: &str) -> Result<u32> {
    raw.parse::<u32>()
        .map_err(|_| Error::config(field, format!("expected an integer, got `{raw}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = StoreConfig::new("sqlite://test.db");
        assert!(!config.store_log_content);
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.pool_overflow, 10);
        assert_eq!(config.pool_timeout_secs, 30);
        assert_eq!(config.pool_recycle_secs, 3600);
        assert_eq!(config.stance_window_minutes, 60);
        config.validate().unwrap();
    }

    #[test]
    fn empty_uri_is_configuration_invalid() {
        let config = StoreConfig::default();
        assert!(matches!(
            config.validate(),
            Err(Error::ConfigurationInvalid { field: "store_uri", .. })
        ));
    }

    #[test]
    fn stance_window_in_days() {
        let config = StoreConfig::new("sqlite://x.db");
        assert!((config.stance_window_days() - 1.0 / 24.0).abs() < 1e-12);
    }

    #[test]
    fn yaml_round_trip() {
        let config = StoreConfig::new("sqlite://x.db");
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: StoreConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn bad_threshold_ordering_is_rejected() {
        let mut config = StoreConfig::new("sqlite://x.db");
        config.sentiment_thresholds.oppose = 0.9;
        assert!(matches!(
            config.validate(),
            Err(Error::ConfigurationInvalid { field: "sentiment_thresholds", .. })
        ));
    }

    #[test]
    fn bool_parsing() {
        assert!(parse_bool("store_log_content", "true").unwrap());
        assert!(!parse_bool("store_log_content", "0").unwrap());
        assert!(parse_bool("store_log_content", "maybe").is_err());
    }
}
