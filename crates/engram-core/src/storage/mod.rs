//! Storage layer
//!
//! A backend-agnostic engine facade over three owner-partitioned tables
//! (`kg_nodes`, `kg_edges`, `kg_logs`). The embedded SQLite backend is the
//! default; Postgres and MySQL backends sit behind cargo features and differ
//! only in SQL dialect and pooling. Schema creation is idempotent and
//! tolerates attaching to a store that already holds unrelated tables.

mod sqlite;

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgres")]
mod postgres;

pub use sqlite::SqliteBackend;

#[cfg(feature = "mysql")]
pub use mysql::MySqlBackend;
#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;

use serde_json::Value;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::fsrs::{MemoryState, Scheduler};
use crate::memory::{
    clamp_sentiment, validate_ident, validate_sentiment, ActionType, EdgeRecord, LogRecord,
    NodeRecord,
};
use crate::time::TimePoint;

/// Row cap of the agent-stance query
pub const STANCE_CAP: u32 = 8;

/// Default row cap of the world-knowledge query
pub const WORLD_KNOWLEDGE_DEFAULT_LIMIT: u32 = 10;

// ============================================================================
// URI PARSING
// ============================================================================

/// A parsed store location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUri {
    /// Embedded single-file store; `":memory:"` selects a process-private
    /// in-memory database
    Sqlite(String),
    /// Networked PostgreSQL, full connection URL
    Postgres(String),
    /// Networked MySQL, full connection URL
    MySql(String),
}

impl StoreUri {
    /// Parse a connection string.
    ///
    /// Accepts the URL forms `sqlite://PATH`, `postgres://...`,
    /// `postgresql://...`, `mysql://...`; a bare filename is rewritten to
    /// the embedded-file form.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::config("store_uri", "must not be empty"));
        }
        if let Some(path) = raw.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err(Error::config("store_uri", "sqlite:// needs a path"));
            }
            return Ok(StoreUri::Sqlite(path.to_string()));
        }
        if raw.starts_with("postgres://") || raw.starts_with("postgresql://") {
            return Ok(StoreUri::Postgres(raw.to_string()));
        }
        if raw.starts_with("mysql://") {
            return Ok(StoreUri::MySql(raw.to_string()));
        }
        if let Some((scheme, _)) = raw.split_once("://") {
            return Err(Error::config(
                "store_uri",
                format!("unsupported backend scheme `{scheme}`"),
            ));
        }
        // Legacy form: a bare filename means the embedded store
        Ok(StoreUri::Sqlite(raw.to_string()))
    }
}

// ============================================================================
// WRITE-SET TYPES
// ============================================================================

/// The edge portion of a write
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSpec {
    /// Subject entity
    pub source: String,
    /// Relation label
    pub relation: String,
    /// Object entity
    pub target: String,
    /// Clamped sentiment
    pub sentiment: f64,
}

/// One log row, with privacy already applied by the facade
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Read or write
    pub action: ActionType,
    /// What goes into `content_or_handle`
    pub stored: String,
    /// JSON annotations
    pub annotations: Value,
}

/// Everything one `learn` call writes, applied atomically by the backend
#[derive(Debug, Clone)]
pub struct LearnWriteSet {
    /// Owning agent
    pub owner: String,
    /// New scheduling state per touched entity (one entry when the edge is
    /// reflexive, two otherwise)
    pub nodes: Vec<(String, MemoryState)>,
    /// The triple being written
    pub edge: EdgeSpec,
    /// The audit record
    pub log: LogEntry,
    /// Caller-supplied time of the write
    pub at: TimePoint,
}

/// A stance or third-party row as the context builder consumes it
#[derive(Debug, Clone, PartialEq)]
pub struct StanceRow {
    /// Subject entity
    pub source: String,
    /// Relation label
    pub relation: String,
    /// Object entity
    pub target: String,
    /// Edge sentiment
    pub sentiment: f64,
}

/// Node/edge/log tallies for one owner
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Entity count
    pub nodes: u64,
    /// Triple count
    pub edges: u64,
    /// Interaction-log rows
    pub log_records: u64,
    /// Mean stability across entities, when any exist
    pub avg_stability: Option<f64>,
    /// Mean difficulty across entities, when any exist
    pub avg_difficulty: Option<f64>,
}

// ============================================================================
// BACKEND CONTRACT
// ============================================================================

/// The operation surface every backend implements.
///
/// Implementations serialise writers (internal mutex or the pool's
/// transaction isolation) and allow concurrent readers. All multi-row writes
/// are transactional: on any driver error the transaction rolls back and no
/// partial edge or endpoint survives.
pub trait StoreBackend: Send + Sync {
    /// Create tables and indexes if absent; adopt missing additive columns
    /// when attaching to an older store
    fn ensure_schema(&self) -> Result<()>;

    /// Insert the node if absent; when `state` is given, replace the
    /// scheduling fields; when absent, leave an existing row untouched
    fn upsert_node(
        &self,
        owner: &str,
        id: &str,
        state: Option<&MemoryState>,
        at: &TimePoint,
    ) -> Result<()>;

    /// Fetch one node
    fn get_node(&self, owner: &str, id: &str) -> Result<Option<NodeRecord>>;

    /// Apply one learn write-set in a single transaction, returning the id
    /// of the appended log row
    fn apply_learn(&self, write: &LearnWriteSet) -> Result<i64>;

    /// Upsert an edge, creating missing endpoints as new entities first;
    /// conflict on the composite key replaces the whole row
    fn add_edge(&self, owner: &str, edge: &EdgeSpec, at: &TimePoint) -> Result<()>;

    /// Fetch one edge by its composite key
    fn get_edge(
        &self,
        owner: &str,
        source: &str,
        relation: &str,
        target: &str,
    ) -> Result<Option<EdgeRecord>>;

    /// Append one log row, returning its monotonic id
    fn append_log(&self, owner: &str, entry: &LogEntry, at: &TimePoint) -> Result<i64>;

    /// Log rows for one owner in id order, optionally bounded
    fn iter_log(
        &self,
        owner: &str,
        since: Option<&TimePoint>,
        limit: Option<u32>,
    ) -> Result<Vec<LogRecord>>;

    /// First-person edges matching the topic or the recency window,
    /// newest first, capped
    fn agent_stance(
        &self,
        owner: &str,
        topic: &str,
        now: &TimePoint,
        window_days: f64,
        cap: u32,
    ) -> Result<Vec<StanceRow>>;

    /// Third-party edges matching the topic, newest first, capped
    fn world_knowledge(&self, owner: &str, topic: &str, limit: u32) -> Result<Vec<StanceRow>>;

    /// Every node of one owner
    fn list_nodes(&self, owner: &str) -> Result<Vec<NodeRecord>>;

    /// Every edge of one owner
    fn list_edges(&self, owner: &str) -> Result<Vec<EdgeRecord>>;

    /// Every owner with at least one node
    fn list_owners(&self) -> Result<Vec<String>>;

    /// Tallies for one owner
    fn stats(&self, owner: &str) -> Result<StoreStats>;
}

// ============================================================================
// STORE FACADE
// ============================================================================

/// The engine: a boxed backend plus the scheduler and privacy policy.
///
/// All methods take `&self`; the store is `Send + Sync` and callers may share
/// it behind an `Arc` across threads.
pub struct Store {
    backend: Box<dyn StoreBackend>,
    scheduler: Scheduler,
    config: StoreConfig,
}

impl Store {
    /// Open a store described by `config`.
    ///
    /// Validates the configuration, connects the backend, and bootstraps the
    /// schema. Selecting a networked backend that was compiled out surfaces
    /// `DependencyMissing`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let scheduler = Scheduler::new(config.fsrs_params.clone())?;
        let backend: Box<dyn StoreBackend> = match StoreUri::parse(&config.store_uri)? {
            StoreUri::Sqlite(path) => Box::new(SqliteBackend::open(&path)?),
            #[cfg(feature = "postgres")]
            StoreUri::Postgres(url) => Box::new(PostgresBackend::open(&url, &config)?),
            #[cfg(not(feature = "postgres"))]
            StoreUri::Postgres(_) => {
                return Err(Error::DependencyMissing(
                    "postgres backend requested but the `postgres` feature is not compiled in"
                        .to_string(),
                ));
            }
            #[cfg(feature = "mysql")]
            StoreUri::MySql(url) => Box::new(MySqlBackend::open(&url, &config)?),
            #[cfg(not(feature = "mysql"))]
            StoreUri::MySql(_) => {
                return Err(Error::DependencyMissing(
                    "mysql backend requested but the `mysql` feature is not compiled in".to_string(),
                ));
            }
        };
        backend.ensure_schema()?;
        tracing::info!(uri = %config.store_uri, log_content = config.store_log_content, "store opened");
        Ok(Store {
            backend,
            scheduler,
            config,
        })
    }

    /// Whether raw log text is stored (true) or replaced by handles (false)
    pub fn stores_log_content(&self) -> bool {
        self.config.store_log_content
    }

    /// The scheduler this store advances entities with
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The configuration the store was opened with
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn backend(&self) -> &dyn StoreBackend {
        self.backend.as_ref()
    }

    /// Insert or touch a node; see [`StoreBackend::upsert_node`]
    pub fn upsert_node(
        &self,
        owner: &str,
        id: &str,
        state: Option<&MemoryState>,
        at: &TimePoint,
    ) -> Result<()> {
        validate_ident("owner", owner)?;
        validate_ident("id", id)?;
        self.backend.upsert_node(owner, id, state, at)
    }

    /// Fetch one node
    pub fn get_node(&self, owner: &str, id: &str) -> Result<Option<NodeRecord>> {
        validate_ident("owner", owner)?;
        validate_ident("id", id)?;
        self.backend.get_node(owner, id)
    }

    /// Upsert an edge, clamping sentiment silently and ensuring both
    /// endpoints exist as nodes under the same owner
    pub fn add_edge(
        &self,
        owner: &str,
        source: &str,
        relation: &str,
        target: &str,
        sentiment: f64,
        at: &TimePoint,
    ) -> Result<()> {
        validate_ident("owner", owner)?;
        validate_ident("source", source)?;
        validate_ident("relation", relation)?;
        validate_ident("target", target)?;
        validate_sentiment(sentiment)?;
        let edge = EdgeSpec {
            source: source.to_string(),
            relation: relation.to_string(),
            target: target.to_string(),
            sentiment: clamp_sentiment(sentiment),
        };
        self.backend.add_edge(owner, &edge, at)
    }

    /// Fetch one edge by its composite key
    pub fn get_edge(
        &self,
        owner: &str,
        source: &str,
        relation: &str,
        target: &str,
    ) -> Result<Option<EdgeRecord>> {
        validate_ident("owner", owner)?;
        self.backend.get_edge(owner, source, relation, target)
    }

    /// Append an interaction-log record, applying the privacy mode.
    ///
    /// Returns the handle recorded in place of the content, or `None` when
    /// the store keeps raw text. A caller-provided handle is validated as a
    /// UUID and used verbatim; it is ignored when content storage is on.
    pub fn log(
        &self,
        owner: &str,
        action: ActionType,
        content: &str,
        annotations: Value,
        at: &TimePoint,
        provided_handle: Option<&str>,
    ) -> Result<Option<String>> {
        validate_ident("owner", owner)?;
        let (stored, handle) = if self.config.store_log_content {
            (content.to_string(), None)
        } else {
            let handle = match provided_handle {
                Some(raw) => Uuid::parse_str(raw)
                    .map_err(|e| Error::invalid("handle", format!("not a UUID: {e}")))?
                    .to_string(),
                None => Uuid::new_v4().to_string(),
            };
            (handle.clone(), Some(handle))
        };
        let entry = LogEntry {
            action,
            stored,
            annotations,
        };
        self.backend.append_log(owner, &entry, at)?;
        Ok(handle)
    }

    /// Log rows for one owner in commit order
    pub fn iter_log(
        &self,
        owner: &str,
        since: Option<&TimePoint>,
        limit: Option<u32>,
    ) -> Result<Vec<LogRecord>> {
        validate_ident("owner", owner)?;
        self.backend.iter_log(owner, since, limit)
    }

    /// Node/edge/log tallies for one owner
    pub fn stats(&self, owner: &str) -> Result<StoreStats> {
        validate_ident("owner", owner)?;
        self.backend.stats(owner)
    }

    /// Every node of one owner
    pub fn list_nodes(&self, owner: &str) -> Result<Vec<NodeRecord>> {
        validate_ident("owner", owner)?;
        self.backend.list_nodes(owner)
    }

    /// Every edge of one owner
    pub fn list_edges(&self, owner: &str) -> Result<Vec<EdgeRecord>> {
        validate_ident("owner", owner)?;
        self.backend.list_edges(owner)
    }

    /// Every owner with at least one node
    pub fn list_owners(&self) -> Result<Vec<String>> {
        self.backend.list_owners()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_forms() {
        assert_eq!(
            StoreUri::parse("sqlite:///tmp/kg.db").unwrap(),
            StoreUri::Sqlite("/tmp/kg.db".to_string())
        );
        assert_eq!(
            StoreUri::parse("postgres://u:p@host/db").unwrap(),
            StoreUri::Postgres("postgres://u:p@host/db".to_string())
        );
        assert_eq!(
            StoreUri::parse("postgresql://host/db").unwrap(),
            StoreUri::Postgres("postgresql://host/db".to_string())
        );
        assert_eq!(
            StoreUri::parse("mysql://host/db").unwrap(),
            StoreUri::MySql("mysql://host/db".to_string())
        );
    }

    #[test]
    fn bare_filename_is_rewritten_to_sqlite() {
        assert_eq!(
            StoreUri::parse("agents.db").unwrap(),
            StoreUri::Sqlite("agents.db".to_string())
        );
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(matches!(
            StoreUri::parse("redis://host"),
            Err(Error::ConfigurationInvalid { field: "store_uri", .. })
        ));
    }
}
