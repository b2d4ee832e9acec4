//! Embedded SQLite backend
//!
//! Separate reader/writer connections behind mutexes for interior
//! mutability, so the backend is `Send + Sync` and all methods take `&self`.
//! Writers serialise on the writer lock; readers share the reader lock.
//! Multi-row writes run inside a transaction and roll back as a unit.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};

use crate::error::{Error, Result};
use crate::fsrs::{LearningState, MemoryState};
use crate::memory::{ActionType, EdgeRecord, LogRecord, NodeRecord};
use crate::time::TimePoint;

use super::{EdgeSpec, LearnWriteSet, LogEntry, StanceRow, StoreBackend, StoreStats};

/// Base schema, created with "if not exists" semantics so the engine can
/// attach to a store that already holds unrelated tables
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kg_nodes (
    owner TEXT NOT NULL,
    id TEXT NOT NULL,
    stability REAL NOT NULL DEFAULT 0.0,
    difficulty REAL NOT NULL DEFAULT 5.0,
    last_review TEXT,
    reps INTEGER NOT NULL DEFAULT 0,
    state INTEGER NOT NULL DEFAULT 0,
    created_at TEXT,
    sim_day INTEGER,
    sim_hour INTEGER,
    PRIMARY KEY (owner, id)
);

CREATE INDEX IF NOT EXISTS idx_kg_nodes_owner_review ON kg_nodes(owner, last_review DESC);

CREATE TABLE IF NOT EXISTS kg_edges (
    owner TEXT NOT NULL,
    source TEXT NOT NULL,
    relation TEXT NOT NULL,
    target TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    sentiment REAL NOT NULL DEFAULT 0.0,
    created_at TEXT,
    sim_day INTEGER,
    sim_hour INTEGER,
    PRIMARY KEY (owner, source, target, relation),
    FOREIGN KEY (owner, source) REFERENCES kg_nodes(owner, id),
    FOREIGN KEY (owner, target) REFERENCES kg_nodes(owner, id)
);

CREATE INDEX IF NOT EXISTS idx_kg_edges_owner_source ON kg_edges(owner, source);
CREATE INDEX IF NOT EXISTS idx_kg_edges_owner_target ON kg_edges(owner, target);
CREATE INDEX IF NOT EXISTS idx_kg_edges_owner_created ON kg_edges(owner, created_at DESC);

CREATE TABLE IF NOT EXISTS kg_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent TEXT NOT NULL,
    action_type TEXT NOT NULL,
    content_or_handle TEXT NOT NULL,
    annotations TEXT NOT NULL DEFAULT '{}',
    timestamp TEXT,
    sim_day INTEGER,
    sim_hour INTEGER
);

CREATE INDEX IF NOT EXISTS idx_kg_logs_agent_time ON kg_logs(agent, timestamp);
"#;

/// Additive columns older stores may lack, adopted at open
const ADOPTED_COLUMNS: &[(&str, &str, &str)] = &[
    ("kg_nodes", "sim_day", "INTEGER"),
    ("kg_nodes", "sim_hour", "INTEGER"),
    ("kg_edges", "sim_day", "INTEGER"),
    ("kg_edges", "sim_hour", "INTEGER"),
    ("kg_logs", "sim_day", "INTEGER"),
    ("kg_logs", "sim_hour", "INTEGER"),
];

/// Embedded single-file (or in-memory) store
pub struct SqliteBackend {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open the store at `path`; `":memory:"` selects a process-private
    /// shared-cache in-memory database
    pub fn open(path: &str) -> Result<Self> {
        let target = if path == ":memory:" {
            // Shared cache keeps the reader and writer on the same database
            format!("file:engram-{}?mode=memory&cache=shared", uuid::Uuid::new_v4())
        } else {
            path.to_string()
        };

        let writer = Connection::open(&target)?;
        Self::configure_connection(&writer)?;
        let reader = Connection::open(&target)?;
        Self::configure_connection(&reader)?;

        Ok(SqliteBackend {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| Error::ResourceUnavailable("writer lock poisoned".to_string()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| Error::ResourceUnavailable("reader lock poisoned".to_string()))
    }

    /// Split a time point into its persisted columns:
    /// `(timestamp, sim_day, sim_hour)`
    fn time_columns(at: &TimePoint) -> (Option<String>, Option<i64>, Option<i64>) {
        match at {
            TimePoint::Absolute { instant } => (Some(instant.to_rfc3339()), None, None),
            TimePoint::Round { day, hour } => (None, Some(*day as i64), Some(*hour as i64)),
        }
    }

    fn parse_timestamp(value: &str, field_name: &str) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("invalid {field_name} timestamp '{value}': {e}"),
                    )),
                )
            })
    }

    fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<NodeRecord> {
        let last_review_ts: Option<String> = row.get("last_review")?;
        let created_ts: Option<String> = row.get("created_at")?;
        let sim_day: Option<i64> = row.get("sim_day")?;
        let sim_hour: Option<i64> = row.get("sim_hour")?;
        let reps: u32 = row.get("reps")?;
        let state_raw: u8 = row.get("state")?;

        let last_review_ts = match last_review_ts {
            Some(s) => Some(Self::parse_timestamp(&s, "last_review")?),
            None => None,
        };
        let created_ts = match created_ts {
            Some(s) => Some(Self::parse_timestamp(&s, "created_at")?),
            None => None,
        };
        let sim_day_u = sim_day.map(|v| v as u32);
        let sim_hour_u = sim_hour.map(|v| v as u32);

        // last_review is set iff the entity has been reviewed
        let last_review = if reps >= 1 {
            TimePoint::from_columns(last_review_ts, sim_day_u, sim_hour_u)
        } else {
            None
        };
        let created_at = TimePoint::from_columns(created_ts, sim_day_u, sim_hour_u)
            .ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Null,
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "node row has no time representation",
                    )),
                )
            })?;

        let state = LearningState::from_value(state_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Integer,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
            )
        })?;

        Ok(NodeRecord {
            owner: row.get("owner")?,
            id: row.get("id")?,
            memory: MemoryState {
                stability: row.get("stability")?,
                difficulty: row.get("difficulty")?,
                last_review,
                reps,
                state,
            },
            created_at,
        })
    }

    fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<EdgeRecord> {
        let created_ts: Option<String> = row.get("created_at")?;
        let created_ts = match created_ts {
            Some(s) => Some(Self::parse_timestamp(&s, "created_at")?),
            None => None,
        };
        let sim_day: Option<i64> = row.get("sim_day")?;
        let sim_hour: Option<i64> = row.get("sim_hour")?;
        let created_at = TimePoint::from_columns(
            created_ts,
            sim_day.map(|v| v as u32),
            sim_hour.map(|v| v as u32),
        )
        .ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Null,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "edge row has no time representation",
                )),
            )
        })?;

        Ok(EdgeRecord {
            owner: row.get("owner")?,
            source: row.get("source")?,
            relation: row.get("relation")?,
            target: row.get("target")?,
            weight: row.get("weight")?,
            sentiment: row.get("sentiment")?,
            created_at,
        })
    }

    fn row_to_log(row: &rusqlite::Row) -> rusqlite::Result<LogRecord> {
        let ts: Option<String> = row.get("timestamp")?;
        let ts = match ts {
            Some(s) => Some(Self::parse_timestamp(&s, "timestamp")?),
            None => None,
        };
        let sim_day: Option<i64> = row.get("sim_day")?;
        let sim_hour: Option<i64> = row.get("sim_hour")?;
        let at = TimePoint::from_columns(ts, sim_day.map(|v| v as u32), sim_hour.map(|v| v as u32))
            .ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Null,
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "log row has no time representation",
                    )),
                )
            })?;

        let action_raw: String = row.get("action_type")?;
        let action = ActionType::parse_name(&action_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
            )
        })?;

        let annotations_raw: String = row.get("annotations")?;
        let annotations =
            serde_json::from_str(&annotations_raw).unwrap_or(serde_json::Value::Null);

        Ok(LogRecord {
            id: row.get("id")?,
            agent: row.get("agent")?,
            action,
            content_or_handle: row.get("content_or_handle")?,
            annotations,
            at,
        })
    }

    /// Upsert a node inside an open transaction-ish scope. With `state`,
    /// replaces the scheduling fields; without, inserts a fresh New row only
    /// if absent.
    fn upsert_node_on(
        conn: &Connection,
        owner: &str,
        id: &str,
        state: Option<&MemoryState>,
        at: &TimePoint,
    ) -> Result<()> {
        let (created_ts, created_day, created_hour) = Self::time_columns(at);
        match state {
            Some(state) => {
                let review = state.last_review.unwrap_or(*at);
                let (review_ts, review_day, review_hour) = Self::time_columns(&review);
                // sim columns mirror the most recent touch
                let (sim_day, sim_hour) = match (review_day, review_hour) {
                    (Some(d), Some(h)) => (Some(d), Some(h)),
                    _ => (created_day, created_hour),
                };
                conn.execute(
                    "INSERT INTO kg_nodes
                        (owner, id, stability, difficulty, last_review, reps, state,
                         created_at, sim_day, sim_hour)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(owner, id) DO UPDATE SET
                        stability = excluded.stability,
                        difficulty = excluded.difficulty,
                        last_review = excluded.last_review,
                        reps = excluded.reps,
                        state = excluded.state,
                        sim_day = excluded.sim_day,
                        sim_hour = excluded.sim_hour",
                    params![
                        owner,
                        id,
                        state.stability,
                        state.difficulty,
                        review_ts,
                        state.reps,
                        state.state.value(),
                        created_ts,
                        sim_day,
                        sim_hour,
                    ],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT OR IGNORE INTO kg_nodes
                        (owner, id, stability, difficulty, last_review, reps, state,
                         created_at, sim_day, sim_hour)
                     VALUES (?1, ?2, 0.0, 5.0, NULL, 0, 0, ?3, ?4, ?5)",
                    params![owner, id, created_ts, created_day, created_hour],
                )?;
            }
        }
        Ok(())
    }

    fn insert_edge_on(conn: &Connection, owner: &str, edge: &EdgeSpec, at: &TimePoint) -> Result<()> {
        let (created_ts, sim_day, sim_hour) = Self::time_columns(at);
        // Composite-key conflict replaces the whole row: last write wins at
        // triple identity, created_at included
        conn.execute(
            "INSERT OR REPLACE INTO kg_edges
                (owner, source, relation, target, weight, sentiment,
                 created_at, sim_day, sim_hour)
             VALUES (?1, ?2, ?3, ?4, 1.0, ?5, ?6, ?7, ?8)",
            params![
                owner,
                edge.source,
                edge.relation,
                edge.target,
                edge.sentiment,
                created_ts,
                sim_day,
                sim_hour,
            ],
        )?;
        Ok(())
    }

    fn insert_log_on(conn: &Connection, owner: &str, entry: &LogEntry, at: &TimePoint) -> Result<i64> {
        let (ts, sim_day, sim_hour) = Self::time_columns(at);
        let annotations = serde_json::to_string(&entry.annotations)
            .map_err(|e| Error::storage("serialising log annotations", e))?;
        conn.execute(
            "INSERT INTO kg_logs
                (agent, action_type, content_or_handle, annotations, timestamp, sim_day, sim_hour)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                owner,
                entry.action.as_str(),
                entry.stored,
                annotations,
                ts,
                sim_day,
                sim_hour,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// `(clause, params)` matching rows within the recency window of `now`
    fn recency_clause(
        now: &TimePoint,
        window_days: f64,
        binds: &mut Vec<Box<dyn ToSql>>,
    ) -> String {
        match now {
            TimePoint::Absolute { instant } => {
                let cutoff = *instant
                    - chrono::Duration::milliseconds((window_days * 86_400_000.0) as i64);
                binds.push(Box::new(cutoff.to_rfc3339()));
                format!("(created_at IS NOT NULL AND created_at >= ?{})", binds.len())
            }
            TimePoint::Round { day, hour } => {
                let cutoff_hours = *day as f64 * 24.0 + *hour as f64 - window_days * 24.0;
                binds.push(Box::new(cutoff_hours));
                format!(
                    "(sim_day IS NOT NULL AND (sim_day * 24.0 + sim_hour) >= ?{})",
                    binds.len()
                )
            }
        }
    }
}

impl StoreBackend for SqliteBackend {
    fn ensure_schema(&self) -> Result<()> {
        let writer = self.writer()?;
        writer.execute_batch(SCHEMA)?;

        // Adopt additive columns when attaching to an older store
        for (table, column, sql_type) in ADOPTED_COLUMNS {
            let present: bool = writer
                .prepare(&format!("SELECT 1 FROM pragma_table_info('{table}') WHERE name = ?1"))?
                .query_row(params![column], |_| Ok(true))
                .optional()?
                .unwrap_or(false);
            if !present {
                tracing::info!(table, column, "adopting missing column");
                writer.execute_batch(&format!(
                    "ALTER TABLE {table} ADD COLUMN {column} {sql_type};"
                ))?;
            }
        }
        Ok(())
    }

    fn upsert_node(
        &self,
        owner: &str,
        id: &str,
        state: Option<&MemoryState>,
        at: &TimePoint,
    ) -> Result<()> {
        let writer = self.writer()?;
        Self::upsert_node_on(&writer, owner, id, state, at)
    }

    fn get_node(&self, owner: &str, id: &str) -> Result<Option<NodeRecord>> {
        let reader = self.reader()?;
        let node = reader
            .prepare("SELECT * FROM kg_nodes WHERE owner = ?1 AND id = ?2")?
            .query_row(params![owner, id], Self::row_to_node)
            .optional()?;
        Ok(node)
    }

    fn apply_learn(&self, write: &LearnWriteSet) -> Result<i64> {
        let mut writer = self.writer()?;
        let tx = writer
            .transaction()
            .map_err(|e| Error::storage("begin learn transaction", e))?;

        for (id, state) in &write.nodes {
            Self::upsert_node_on(&tx, &write.owner, id, Some(state), &write.at)?;
        }
        Self::insert_edge_on(&tx, &write.owner, &write.edge, &write.at)?;
        let log_id = Self::insert_log_on(&tx, &write.owner, &write.log, &write.at)?;

        tx.commit().map_err(|e| Error::storage("commit learn transaction", e))?;
        Ok(log_id)
    }

    fn add_edge(&self, owner: &str, edge: &EdgeSpec, at: &TimePoint) -> Result<()> {
        let mut writer = self.writer()?;
        let tx = writer
            .transaction()
            .map_err(|e| Error::storage("begin edge transaction", e))?;

        // Endpoints are created lazily on first reference
        Self::upsert_node_on(&tx, owner, &edge.source, None, at)?;
        Self::upsert_node_on(&tx, owner, &edge.target, None, at)?;
        Self::insert_edge_on(&tx, owner, edge, at)?;

        tx.commit().map_err(|e| Error::storage("commit edge transaction", e))?;
        Ok(())
    }

    fn get_edge(
        &self,
        owner: &str,
        source: &str,
        relation: &str,
        target: &str,
    ) -> Result<Option<EdgeRecord>> {
        let reader = self.reader()?;
        let edge = reader
            .prepare(
                "SELECT * FROM kg_edges
                 WHERE owner = ?1 AND source = ?2 AND relation = ?3 AND target = ?4",
            )?
            .query_row(params![owner, source, relation, target], Self::row_to_edge)
            .optional()?;
        Ok(edge)
    }

    fn append_log(&self, owner: &str, entry: &LogEntry, at: &TimePoint) -> Result<i64> {
        let writer = self.writer()?;
        Self::insert_log_on(&writer, owner, entry, at)
    }

    fn iter_log(
        &self,
        owner: &str,
        since: Option<&TimePoint>,
        limit: Option<u32>,
    ) -> Result<Vec<LogRecord>> {
        let mut sql = String::from("SELECT * FROM kg_logs WHERE agent = ?1");
        let mut binds: Vec<Box<dyn ToSql>> = vec![Box::new(owner.to_string())];

        if let Some(since) = since {
            match since {
                TimePoint::Absolute { instant } => {
                    binds.push(Box::new(instant.to_rfc3339()));
                    sql.push_str(&format!(" AND timestamp >= ?{}", binds.len()));
                }
                TimePoint::Round { day, hour } => {
                    binds.push(Box::new(*day as f64 * 24.0 + *hour as f64));
                    sql.push_str(&format!(
                        " AND (sim_day * 24.0 + sim_hour) >= ?{}",
                        binds.len()
                    ));
                }
            }
        }
        sql.push_str(" ORDER BY id ASC");
        if let Some(limit) = limit {
            binds.push(Box::new(limit));
            sql.push_str(&format!(" LIMIT ?{}", binds.len()));
        }

        let reader = self.reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(binds.iter().map(|b| b.as_ref())), Self::row_to_log)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn agent_stance(
        &self,
        owner: &str,
        topic: &str,
        now: &TimePoint,
        window_days: f64,
        cap: u32,
    ) -> Result<Vec<StanceRow>> {
        let mut binds: Vec<Box<dyn ToSql>> = vec![Box::new(owner.to_string())];
        let mut sql = String::from(
            "SELECT source, relation, target, sentiment FROM kg_edges
             WHERE owner = ?1 AND (source = 'I' OR source = ?1)",
        );

        let recency = Self::recency_clause(now, window_days, &mut binds);
        if topic.is_empty() {
            sql.push_str(&format!(" AND {recency}"));
        } else {
            binds.push(Box::new(topic.to_lowercase()));
            sql.push_str(&format!(
                " AND (instr(lower(target), ?{}) > 0 OR {recency})",
                binds.len()
            ));
        }

        binds.push(Box::new(cap));
        sql.push_str(&format!(
            " ORDER BY created_at DESC, sim_day DESC, sim_hour DESC LIMIT ?{}",
            binds.len()
        ));

        let reader = self.reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(binds.iter().map(|b| b.as_ref())), |row| {
            Ok(StanceRow {
                source: row.get(0)?,
                relation: row.get(1)?,
                target: row.get(2)?,
                sentiment: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn world_knowledge(&self, owner: &str, topic: &str, limit: u32) -> Result<Vec<StanceRow>> {
        if topic.is_empty() {
            return Ok(Vec::new());
        }
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT source, relation, target, sentiment FROM kg_edges
             WHERE owner = ?1 AND source <> 'I' AND source <> ?1
               AND (instr(lower(source), ?2) > 0 OR instr(lower(target), ?2) > 0)
             ORDER BY created_at DESC, sim_day DESC, sim_hour DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![owner, topic.to_lowercase(), limit], |row| {
            Ok(StanceRow {
                source: row.get(0)?,
                relation: row.get(1)?,
                target: row.get(2)?,
                sentiment: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn list_nodes(&self, owner: &str) -> Result<Vec<NodeRecord>> {
        let reader = self.reader()?;
        let mut stmt =
            reader.prepare("SELECT * FROM kg_nodes WHERE owner = ?1 ORDER BY id ASC")?;
        let rows = stmt.query_map(params![owner], Self::row_to_node)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn list_edges(&self, owner: &str) -> Result<Vec<EdgeRecord>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM kg_edges WHERE owner = ?1 ORDER BY source, relation, target",
        )?;
        let rows = stmt.query_map(params![owner], Self::row_to_edge)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn list_owners(&self) -> Result<Vec<String>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare("SELECT DISTINCT owner FROM kg_nodes ORDER BY owner")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn stats(&self, owner: &str) -> Result<StoreStats> {
        let reader = self.reader()?;
        let (nodes, avg_stability, avg_difficulty): (i64, Option<f64>, Option<f64>) = reader
            .query_row(
                "SELECT COUNT(*), AVG(stability), AVG(difficulty) FROM kg_nodes WHERE owner = ?1",
                params![owner],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
        let edges: i64 = reader.query_row(
            "SELECT COUNT(*) FROM kg_edges WHERE owner = ?1",
            params![owner],
            |row| row.get(0),
        )?;
        let log_records: i64 = reader.query_row(
            "SELECT COUNT(*) FROM kg_logs WHERE agent = ?1",
            params![owner],
            |row| row.get(0),
        )?;
        Ok(StoreStats {
            nodes: nodes as u64,
            edges: edges as u64,
            log_records: log_records as u64,
            avg_stability,
            avg_difficulty,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsrs::Rating;
    use crate::fsrs::Scheduler;
    use tempfile::tempdir;

    fn open_backend(dir: &tempfile::TempDir) -> SqliteBackend {
        let path = dir.path().join("kg.db");
        let backend = SqliteBackend::open(path.to_str().unwrap()).unwrap();
        backend.ensure_schema().unwrap();
        backend
    }

    fn round(day: u32, hour: u32) -> TimePoint {
        TimePoint::round(day, hour).unwrap()
    }

    fn edge(source: &str, relation: &str, target: &str, sentiment: f64) -> EdgeSpec {
        EdgeSpec {
            source: source.to_string(),
            relation: relation.to_string(),
            target: target.to_string(),
            sentiment,
        }
    }

    #[test]
    fn schema_is_idempotent_and_preserves_other_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kg.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE app_users (id INTEGER PRIMARY KEY, name TEXT);")
                .unwrap();
            conn.execute("INSERT INTO app_users (name) VALUES ('ada')", []).unwrap();
        }
        let backend = SqliteBackend::open(path.to_str().unwrap()).unwrap();
        backend.ensure_schema().unwrap();
        backend.ensure_schema().unwrap();

        let conn = Connection::open(&path).unwrap();
        let name: String = conn
            .query_row("SELECT name FROM app_users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(name, "ada");
    }

    #[test]
    fn attaching_to_an_older_store_adopts_sim_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.db");
        {
            let conn = Connection::open(&path).unwrap();
            // A pre-dual-time layout: no sim columns anywhere
            conn.execute_batch(
                "CREATE TABLE kg_nodes (
                    owner TEXT NOT NULL, id TEXT NOT NULL,
                    stability REAL NOT NULL DEFAULT 0.0,
                    difficulty REAL NOT NULL DEFAULT 5.0,
                    last_review TEXT, reps INTEGER NOT NULL DEFAULT 0,
                    state INTEGER NOT NULL DEFAULT 0, created_at TEXT,
                    PRIMARY KEY (owner, id)
                 );
                 CREATE TABLE kg_edges (
                    owner TEXT NOT NULL, source TEXT NOT NULL,
                    relation TEXT NOT NULL, target TEXT NOT NULL,
                    weight REAL NOT NULL DEFAULT 1.0,
                    sentiment REAL NOT NULL DEFAULT 0.0, created_at TEXT,
                    PRIMARY KEY (owner, source, target, relation)
                 );
                 CREATE TABLE kg_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT, agent TEXT NOT NULL,
                    action_type TEXT NOT NULL, content_or_handle TEXT NOT NULL,
                    annotations TEXT NOT NULL DEFAULT '{}', timestamp TEXT
                 );",
            )
            .unwrap();
        }
        let backend = SqliteBackend::open(path.to_str().unwrap()).unwrap();
        backend.ensure_schema().unwrap();

        // Round-mode writes need the adopted columns
        backend
            .add_edge("Alice", &edge("I", "support", "UBI", 0.5), &round(1, 9))
            .unwrap();
        let stored = backend.get_edge("Alice", "I", "support", "UBI").unwrap().unwrap();
        assert_eq!(stored.created_at, round(1, 9));
    }

    #[test]
    fn add_edge_creates_endpoints() {
        let dir = tempdir().unwrap();
        let backend = open_backend(&dir);
        backend
            .add_edge("Alice", &edge("I", "support", "UBI", 0.8), &round(1, 9))
            .unwrap();

        let node = backend.get_node("Alice", "I").unwrap().unwrap();
        assert_eq!(node.memory.reps, 0);
        assert_eq!(node.memory.state, LearningState::New);
        assert!(backend.get_node("Alice", "UBI").unwrap().is_some());
    }

    #[test]
    fn edge_conflict_replaces_the_row() {
        let dir = tempdir().unwrap();
        let backend = open_backend(&dir);
        backend
            .add_edge("Alice", &edge("I", "support", "UBI", 0.8), &round(1, 9))
            .unwrap();
        backend
            .add_edge("Alice", &edge("I", "support", "UBI", -0.2), &round(3, 4))
            .unwrap();

        let stored = backend.get_edge("Alice", "I", "support", "UBI").unwrap().unwrap();
        assert_eq!(stored.sentiment, -0.2);
        assert_eq!(stored.created_at, round(3, 4));

        // Still exactly one row under the composite key
        let all = backend.list_edges("Alice").unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn apply_learn_is_atomic_and_returns_log_id() {
        let dir = tempdir().unwrap();
        let backend = open_backend(&dir);
        let scheduler = Scheduler::default();
        let state = scheduler
            .review(&MemoryState::new_card(), Rating::Easy, &round(1, 9))
            .unwrap();

        let write = LearnWriteSet {
            owner: "Alice".to_string(),
            nodes: vec![("I".to_string(), state.clone()), ("UBI".to_string(), state)],
            edge: edge("I", "support", "UBI", 0.8),
            log: LogEntry {
                action: ActionType::Write,
                stored: "handle".to_string(),
                annotations: serde_json::json!({"rating": 4}),
            },
            at: round(1, 9),
        };
        let first = backend.apply_learn(&write).unwrap();
        let second = backend.apply_learn(&write).unwrap();
        assert!(second > first);

        let node = backend.get_node("Alice", "I").unwrap().unwrap();
        assert_eq!(node.memory.reps, 1);
        assert_eq!(node.memory.last_review, Some(round(1, 9)));
    }

    #[test]
    fn owners_are_isolated() {
        let dir = tempdir().unwrap();
        let backend = open_backend(&dir);
        backend
            .add_edge("A", &edge("I", "likes", "X", 0.1), &round(1, 0))
            .unwrap();

        assert!(backend.get_node("B", "X").unwrap().is_none());
        assert!(backend
            .agent_stance("B", "x", &round(1, 0), 1.0 / 24.0, 8)
            .unwrap()
            .is_empty());
        assert_eq!(backend.list_owners().unwrap(), vec!["A".to_string()]);
    }

    #[test]
    fn stance_matches_topic_case_insensitively() {
        let dir = tempdir().unwrap();
        let backend = open_backend(&dir);
        backend
            .add_edge("Alice", &edge("I", "support", "UBI", 0.8), &round(1, 9))
            .unwrap();
        backend
            .add_edge("Alice", &edge("Bob", "opposes", "UBI", -0.6), &round(1, 9))
            .unwrap();

        // Old write, outside any recency window unless topic matches
        let rows = backend
            .agent_stance("Alice", "ubi", &round(40, 0), 1.0 / 24.0, 8)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source, "I");

        let world = backend.world_knowledge("Alice", "ubi", 10).unwrap();
        assert_eq!(world.len(), 1);
        assert_eq!(world[0].source, "Bob");
    }

    #[test]
    fn stance_recency_window_without_topic() {
        let dir = tempdir().unwrap();
        let backend = open_backend(&dir);
        backend
            .add_edge("Alice", &edge("I", "ponders", "taxes", 0.0), &round(2, 8))
            .unwrap();
        backend
            .add_edge("Alice", &edge("I", "ponders", "rent", 0.0), &round(1, 0))
            .unwrap();

        // One-hour window at day 2 hour 9 sees only the day-2 write
        let rows = backend
            .agent_stance("Alice", "", &round(2, 9), 1.0 / 24.0, 8)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].target, "taxes");
    }

    #[test]
    fn world_knowledge_empty_topic_is_empty() {
        let dir = tempdir().unwrap();
        let backend = open_backend(&dir);
        backend
            .add_edge("Alice", &edge("Bob", "opposes", "UBI", -0.6), &round(1, 9))
            .unwrap();
        assert!(backend.world_knowledge("Alice", "", 10).unwrap().is_empty());
    }

    #[test]
    fn log_order_and_since_filter() {
        let dir = tempdir().unwrap();
        let backend = open_backend(&dir);
        for (day, text) in [(1u32, "first"), (2, "second"), (3, "third")] {
            backend
                .append_log(
                    "Alice",
                    &LogEntry {
                        action: ActionType::Write,
                        stored: text.to_string(),
                        annotations: serde_json::Value::Null,
                    },
                    &round(day, 0),
                )
                .unwrap();
        }

        let all = backend.iter_log("Alice", None, None).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));

        let tail = backend.iter_log("Alice", Some(&round(2, 0)), None).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content_or_handle, "second");

        let capped = backend.iter_log("Alice", None, Some(1)).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn stats_counts() {
        let dir = tempdir().unwrap();
        let backend = open_backend(&dir);
        backend
            .add_edge("Alice", &edge("I", "support", "UBI", 0.8), &round(1, 9))
            .unwrap();
        let stats = backend.stats("Alice").unwrap();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.edges, 1);
        assert_eq!(stats.log_records, 0);
    }

    #[test]
    fn in_memory_database_is_shared_between_connections() {
        let backend = SqliteBackend::open(":memory:").unwrap();
        backend.ensure_schema().unwrap();
        backend
            .add_edge("Alice", &edge("I", "support", "UBI", 0.8), &round(1, 9))
            .unwrap();
        // The read goes through the second connection
        assert!(backend.get_node("Alice", "UBI").unwrap().is_some());
    }
}
