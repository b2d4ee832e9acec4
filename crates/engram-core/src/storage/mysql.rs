//! MySQL backend
//!
//! Dialect differences from the embedded store: `?` placeholders bound in
//! order, `AUTO_INCREMENT` log ids, a `JSON` annotations column, and
//! `REPLACE INTO` / `ON DUPLICATE KEY UPDATE` upserts. Instants are kept as
//! RFC 3339 text, which compares lexicographically in chronological order.
//! Connections come from a bounded r2d2 pool.

use mysql::prelude::Queryable;
use mysql::{Opts, OptsBuilder, Params, TxOpts, Value};
use r2d2_mysql::MySqlConnectionManager;

use chrono::{DateTime, Utc};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::fsrs::{LearningState, MemoryState};
use crate::memory::{ActionType, EdgeRecord, LogRecord, NodeRecord};
use crate::time::TimePoint;

use super::{EdgeSpec, LearnWriteSet, LogEntry, StanceRow, StoreBackend, StoreStats};

const TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS kg_nodes (
        owner VARCHAR(255) NOT NULL,
        id VARCHAR(255) NOT NULL,
        stability DOUBLE NOT NULL DEFAULT 0.0,
        difficulty DOUBLE NOT NULL DEFAULT 5.0,
        last_review VARCHAR(64),
        reps INT UNSIGNED NOT NULL DEFAULT 0,
        state TINYINT UNSIGNED NOT NULL DEFAULT 0,
        created_at VARCHAR(64),
        sim_day INT UNSIGNED,
        sim_hour INT UNSIGNED,
        PRIMARY KEY (owner, id),
        INDEX idx_kg_nodes_owner_review (owner, last_review DESC)
    )",
    "CREATE TABLE IF NOT EXISTS kg_edges (
        owner VARCHAR(255) NOT NULL,
        source VARCHAR(255) NOT NULL,
        relation VARCHAR(255) NOT NULL,
        target VARCHAR(255) NOT NULL,
        weight DOUBLE NOT NULL DEFAULT 1.0,
        sentiment DOUBLE NOT NULL DEFAULT 0.0,
        created_at VARCHAR(64),
        sim_day INT UNSIGNED,
        sim_hour INT UNSIGNED,
        PRIMARY KEY (owner, source, target, relation),
        INDEX idx_kg_edges_owner_source (owner, source),
        INDEX idx_kg_edges_owner_target (owner, target),
        INDEX idx_kg_edges_owner_created (owner, created_at DESC),
        FOREIGN KEY (owner, source) REFERENCES kg_nodes(owner, id),
        FOREIGN KEY (owner, target) REFERENCES kg_nodes(owner, id)
    )",
    "CREATE TABLE IF NOT EXISTS kg_logs (
        id BIGINT NOT NULL AUTO_INCREMENT,
        agent VARCHAR(255) NOT NULL,
        action_type VARCHAR(16) NOT NULL,
        content_or_handle TEXT NOT NULL,
        annotations JSON,
        timestamp VARCHAR(64),
        sim_day INT UNSIGNED,
        sim_hour INT UNSIGNED,
        PRIMARY KEY (id),
        INDEX idx_kg_logs_agent_time (agent, timestamp)
    )",
];

const ADOPTED_COLUMNS: &[(&str, &str, &str)] = &[
    ("kg_nodes", "sim_day", "INT UNSIGNED"),
    ("kg_nodes", "sim_hour", "INT UNSIGNED"),
    ("kg_edges", "sim_day", "INT UNSIGNED"),
    ("kg_edges", "sim_hour", "INT UNSIGNED"),
    ("kg_logs", "sim_day", "INT UNSIGNED"),
    ("kg_logs", "sim_hour", "INT UNSIGNED"),
];

const NODE_COLUMNS: &str =
    "owner, id, stability, difficulty, last_review, reps, state, created_at, sim_day, sim_hour";
const EDGE_COLUMNS: &str =
    "owner, source, relation, target, weight, sentiment, created_at, sim_day, sim_hour";
const LOG_COLUMNS: &str =
    "id, agent, action_type, content_or_handle, annotations, timestamp, sim_day, sim_hour";

type NodeRow = (
    String,
    String,
    f64,
    f64,
    Option<String>,
    u32,
    u8,
    Option<String>,
    Option<u32>,
    Option<u32>,
);
type EdgeRow = (
    String,
    String,
    String,
    String,
    f64,
    f64,
    Option<String>,
    Option<u32>,
    Option<u32>,
);
type LogRow = (
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<u32>,
    Option<u32>,
);

type Pool = r2d2::Pool<MySqlConnectionManager>;
type PooledConn = r2d2::PooledConnection<MySqlConnectionManager>;

/// Networked MySQL store behind a bounded connection pool
pub struct MySqlBackend {
    pool: Pool,
}

impl MySqlBackend {
    /// Connect a pool to `url` with the sizing from `config`
    pub fn open(url: &str, config: &StoreConfig) -> Result<Self> {
        let opts = Opts::from_url(url)
            .map_err(|e| Error::config("store_uri", format!("bad mysql URL: {e}")))?;
        let manager = MySqlConnectionManager::new(OptsBuilder::from_opts(opts));
        let pool = r2d2::Pool::builder()
            .max_size(config.pool_size + config.pool_overflow)
            .min_idle(Some(config.pool_size))
            .connection_timeout(std::time::Duration::from_secs(config.pool_timeout_secs as u64))
            .max_lifetime(Some(std::time::Duration::from_secs(
                config.pool_recycle_secs as u64,
            )))
            .build(manager)?;
        Ok(MySqlBackend { pool })
    }

    fn conn(&self) -> Result<PooledConn> {
        Ok(self.pool.get()?)
    }

    fn time_columns(at: &TimePoint) -> (Option<String>, Option<u32>, Option<u32>) {
        match at {
            TimePoint::Absolute { instant } => (Some(instant.to_rfc3339()), None, None),
            TimePoint::Round { day, hour } => (None, Some(*day), Some(*hour)),
        }
    }

    fn parse_timestamp(raw: Option<String>, field: &'static str) -> Result<Option<DateTime<Utc>>> {
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| Error::invalid(field, format!("bad timestamp '{s}': {e}")))
        })
        .transpose()
    }

    fn node_from_row(row: NodeRow) -> Result<NodeRecord> {
        let (owner, id, stability, difficulty, last_review, reps, state, created_at, day, hour) =
            row;
        let last_review_ts = Self::parse_timestamp(last_review, "last_review")?;
        let created_ts = Self::parse_timestamp(created_at, "created_at")?;
        let last_review = if reps >= 1 {
            TimePoint::from_columns(last_review_ts, day, hour)
        } else {
            None
        };
        let created_at = TimePoint::from_columns(created_ts, day, hour)
            .ok_or_else(|| Error::invalid("created_at", "node row has no time representation"))?;
        Ok(NodeRecord {
            owner,
            id,
            memory: MemoryState {
                stability,
                difficulty,
                last_review,
                reps,
                state: LearningState::from_value(state)?,
            },
            created_at,
        })
    }

    fn edge_from_row(row: EdgeRow) -> Result<EdgeRecord> {
        let (owner, source, relation, target, weight, sentiment, created_at, day, hour) = row;
        let created_ts = Self::parse_timestamp(created_at, "created_at")?;
        let created_at = TimePoint::from_columns(created_ts, day, hour)
            .ok_or_else(|| Error::invalid("created_at", "edge row has no time representation"))?;
        Ok(EdgeRecord {
            owner,
            source,
            relation,
            target,
            weight,
            sentiment,
            created_at,
        })
    }

    fn log_from_row(row: LogRow) -> Result<LogRecord> {
        let (id, agent, action, content_or_handle, annotations, ts, day, hour) = row;
        let ts = Self::parse_timestamp(ts, "timestamp")?;
        let at = TimePoint::from_columns(ts, day, hour)
            .ok_or_else(|| Error::invalid("timestamp", "log row has no time representation"))?;
        let annotations = annotations
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(serde_json::Value::Null);
        Ok(LogRecord {
            id,
            agent,
            action: ActionType::parse_name(&action)?,
            content_or_handle,
            annotations,
            at,
        })
    }

    fn upsert_node_on<Q: Queryable>(
        conn: &mut Q,
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
                let (sim_day, sim_hour) = match (review_day, review_hour) {
                    (Some(d), Some(h)) => (Some(d), Some(h)),
                    _ => (created_day, created_hour),
                };
                conn.exec_drop(
                    format!(
                        "INSERT INTO kg_nodes ({NODE_COLUMNS})
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                         ON DUPLICATE KEY UPDATE
                            stability = VALUES(stability),
                            difficulty = VALUES(difficulty),
                            last_review = VALUES(last_review),
                            reps = VALUES(reps),
                            state = VALUES(state),
                            sim_day = VALUES(sim_day),
                            sim_hour = VALUES(sim_hour)"
                    ),
                    (
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
                    ),
                )?;
            }
            None => {
                conn.exec_drop(
                    format!(
                        "INSERT IGNORE INTO kg_nodes ({NODE_COLUMNS})
                         VALUES (?, ?, 0.0, 5.0, NULL, 0, 0, ?, ?, ?)"
                    ),
                    (owner, id, created_ts, created_day, created_hour),
                )?;
            }
        }
        Ok(())
    }

    fn insert_edge_on<Q: Queryable>(
        conn: &mut Q,
        owner: &str,
        edge: &EdgeSpec,
        at: &TimePoint,
    ) -> Result<()> {
        let (created_ts, sim_day, sim_hour) = Self::time_columns(at);
        conn.exec_drop(
            format!(
                "REPLACE INTO kg_edges ({EDGE_COLUMNS})
                 VALUES (?, ?, ?, ?, 1.0, ?, ?, ?, ?)"
            ),
            (
                owner,
                edge.source.as_str(),
                edge.relation.as_str(),
                edge.target.as_str(),
                edge.sentiment,
                created_ts,
                sim_day,
                sim_hour,
            ),
        )?;
        Ok(())
    }

    fn insert_log_on<Q: Queryable>(
        conn: &mut Q,
        owner: &str,
        entry: &LogEntry,
        at: &TimePoint,
    ) -> Result<()> {
        let (ts, sim_day, sim_hour) = Self::time_columns(at);
        let annotations = serde_json::to_string(&entry.annotations)
            .map_err(|e| Error::storage("serialising log annotations", e))?;
        conn.exec_drop(
            "INSERT INTO kg_logs
                (agent, action_type, content_or_handle, annotations, timestamp, sim_day, sim_hour)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            (
                owner,
                entry.action.as_str(),
                entry.stored.as_str(),
                annotations,
                ts,
                sim_day,
                sim_hour,
            ),
        )?;
        Ok(())
    }

    /// `(clause, pushed param)` matching rows within the recency window
    fn recency_clause(now: &TimePoint, window_days: f64, binds: &mut Vec<Value>) -> String {
        match now {
            TimePoint::Absolute { instant } => {
                let cutoff =
                    *instant - chrono::Duration::milliseconds((window_days * 86_400_000.0) as i64);
                binds.push(Value::from(cutoff.to_rfc3339()));
                "(created_at IS NOT NULL AND created_at >= ?)".to_string()
            }
            TimePoint::Round { day, hour } => {
                let cutoff_hours = *day as f64 * 24.0 + *hour as f64 - window_days * 24.0;
                binds.push(Value::from(cutoff_hours));
                "(sim_day IS NOT NULL AND (sim_day * 24.0 + sim_hour) >= ?)".to_string()
            }
        }
    }
}

impl StoreBackend for MySqlBackend {
    fn ensure_schema(&self) -> Result<()> {
        let mut conn = self.conn()?;
        for table in TABLES {
            conn.query_drop(*table)?;
        }
        for (table, column, sql_type) in ADOPTED_COLUMNS.iter().copied() {
            let present: Option<u8> = conn.exec_first(
                "SELECT 1 FROM information_schema.columns
                 WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?",
                (table, column),
            )?;
            if present.is_none() {
                tracing::info!(table, column, "adopting missing column");
                conn.query_drop(format!("ALTER TABLE {table} ADD COLUMN {column} {sql_type}"))?;
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
        let mut conn = self.conn()?;
        Self::upsert_node_on(&mut *conn, owner, id, state, at)
    }

    fn get_node(&self, owner: &str, id: &str) -> Result<Option<NodeRecord>> {
        let mut conn = self.conn()?;
        let row: Option<NodeRow> = conn.exec_first(
            format!("SELECT {NODE_COLUMNS} FROM kg_nodes WHERE owner = ? AND id = ?"),
            (owner, id),
        )?;
        row.map(Self::node_from_row).transpose()
    }

    fn apply_learn(&self, write: &LearnWriteSet) -> Result<i64> {
        let mut conn = self.conn()?;
        let mut tx = conn.start_transaction(TxOpts::default())?;
        for (id, state) in &write.nodes {
            Self::upsert_node_on(&mut tx, &write.owner, id, Some(state), &write.at)?;
        }
        Self::insert_edge_on(&mut tx, &write.owner, &write.edge, &write.at)?;
        Self::insert_log_on(&mut tx, &write.owner, &write.log, &write.at)?;
        let log_id = tx.last_insert_id().unwrap_or_default() as i64;
        tx.commit()?;
        Ok(log_id)
    }

    fn add_edge(&self, owner: &str, edge: &EdgeSpec, at: &TimePoint) -> Result<()> {
        let mut conn = self.conn()?;
        let mut tx = conn.start_transaction(TxOpts::default())?;
        Self::upsert_node_on(&mut tx, owner, &edge.source, None, at)?;
        Self::upsert_node_on(&mut tx, owner, &edge.target, None, at)?;
        Self::insert_edge_on(&mut tx, owner, edge, at)?;
        tx.commit()?;
        Ok(())
    }

    fn get_edge(
        &self,
        owner: &str,
        source: &str,
        relation: &str,
        target: &str,
    ) -> Result<Option<EdgeRecord>> {
        let mut conn = self.conn()?;
        let row: Option<EdgeRow> = conn.exec_first(
            format!(
                "SELECT {EDGE_COLUMNS} FROM kg_edges
                 WHERE owner = ? AND source = ? AND relation = ? AND target = ?"
            ),
            (owner, source, relation, target),
        )?;
        row.map(Self::edge_from_row).transpose()
    }

    fn append_log(&self, owner: &str, entry: &LogEntry, at: &TimePoint) -> Result<i64> {
        let mut conn = self.conn()?;
        Self::insert_log_on(&mut *conn, owner, entry, at)?;
        Ok(conn.last_insert_id() as i64)
    }

    fn iter_log(
        &self,
        owner: &str,
        since: Option<&TimePoint>,
        limit: Option<u32>,
    ) -> Result<Vec<LogRecord>> {
        let mut sql = format!("SELECT {LOG_COLUMNS} FROM kg_logs WHERE agent = ?");
        let mut binds: Vec<Value> = vec![Value::from(owner)];

        if let Some(since) = since {
            match since {
                TimePoint::Absolute { instant } => {
                    binds.push(Value::from(instant.to_rfc3339()));
                    sql.push_str(" AND timestamp >= ?");
                }
                TimePoint::Round { day, hour } => {
                    binds.push(Value::from(*day as f64 * 24.0 + *hour as f64));
                    sql.push_str(" AND (sim_day * 24.0 + sim_hour) >= ?");
                }
            }
        }
        sql.push_str(" ORDER BY id ASC");
        if let Some(limit) = limit {
            binds.push(Value::from(limit));
            sql.push_str(" LIMIT ?");
        }

        let mut conn = self.conn()?;
        let rows: Vec<LogRow> = conn.exec(sql, Params::Positional(binds))?;
        rows.into_iter().map(Self::log_from_row).collect()
    }

    fn agent_stance(
        &self,
        owner: &str,
        topic: &str,
        now: &TimePoint,
        window_days: f64,
        cap: u32,
    ) -> Result<Vec<StanceRow>> {
        let mut binds: Vec<Value> = vec![Value::from(owner), Value::from(owner)];
        let mut sql = String::from(
            "SELECT source, relation, target, sentiment FROM kg_edges
             WHERE owner = ? AND (source = 'I' OR source = ?)",
        );

        if topic.is_empty() {
            let recency = Self::recency_clause(now, window_days, &mut binds);
            sql.push_str(&format!(" AND {recency}"));
        } else {
            binds.push(Value::from(topic.to_lowercase()));
            let mut tail: Vec<Value> = Vec::new();
            let recency = Self::recency_clause(now, window_days, &mut tail);
            binds.extend(tail);
            sql.push_str(&format!(" AND (INSTR(LOWER(target), ?) > 0 OR {recency})"));
        }

        binds.push(Value::from(cap));
        sql.push_str(
            " ORDER BY created_at DESC, sim_day DESC, sim_hour DESC LIMIT ?",
        );

        let mut conn = self.conn()?;
        let rows: Vec<(String, String, String, f64)> =
            conn.exec(sql, Params::Positional(binds))?;
        Ok(rows
            .into_iter()
            .map(|(source, relation, target, sentiment)| StanceRow {
                source,
                relation,
                target,
                sentiment,
            })
            .collect())
    }

    fn world_knowledge(&self, owner: &str, topic: &str, limit: u32) -> Result<Vec<StanceRow>> {
        if topic.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        let topic = topic.to_lowercase();
        let rows: Vec<(String, String, String, f64)> = conn.exec(
            "SELECT source, relation, target, sentiment FROM kg_edges
             WHERE owner = ? AND source <> 'I' AND source <> ?
               AND (INSTR(LOWER(source), ?) > 0 OR INSTR(LOWER(target), ?) > 0)
             ORDER BY created_at DESC, sim_day DESC, sim_hour DESC
             LIMIT ?",
            (owner, owner, topic.as_str(), topic.as_str(), limit),
        )?;
        Ok(rows
            .into_iter()
            .map(|(source, relation, target, sentiment)| StanceRow {
                source,
                relation,
                target,
                sentiment,
            })
            .collect())
    }

    fn list_nodes(&self, owner: &str) -> Result<Vec<NodeRecord>> {
        let mut conn = self.conn()?;
        let rows: Vec<NodeRow> = conn.exec(
            format!("SELECT {NODE_COLUMNS} FROM kg_nodes WHERE owner = ? ORDER BY id ASC"),
            (owner,),
        )?;
        rows.into_iter().map(Self::node_from_row).collect()
    }

    fn list_edges(&self, owner: &str) -> Result<Vec<EdgeRecord>> {
        let mut conn = self.conn()?;
        let rows: Vec<EdgeRow> = conn.exec(
            format!(
                "SELECT {EDGE_COLUMNS} FROM kg_edges
                 WHERE owner = ? ORDER BY source, relation, target"
            ),
            (owner,),
        )?;
        rows.into_iter().map(Self::edge_from_row).collect()
    }

    fn list_owners(&self) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        Ok(conn.query("SELECT DISTINCT owner FROM kg_nodes ORDER BY owner")?)
    }

    fn stats(&self, owner: &str) -> Result<StoreStats> {
        let mut conn = self.conn()?;
        let row: Option<(u64, Option<f64>, Option<f64>)> = conn.exec_first(
            "SELECT COUNT(*), AVG(stability), AVG(difficulty) FROM kg_nodes WHERE owner = ?",
            (owner,),
        )?;
        let (nodes, avg_stability, avg_difficulty) = row.unwrap_or((0, None, None));
        let edges: Option<u64> =
            conn.exec_first("SELECT COUNT(*) FROM kg_edges WHERE owner = ?", (owner,))?;
        let log_records: Option<u64> =
            conn.exec_first("SELECT COUNT(*) FROM kg_logs WHERE agent = ?", (owner,))?;
        Ok(StoreStats {
            nodes,
            edges: edges.unwrap_or(0),
            log_records: log_records.unwrap_or(0),
            avg_stability,
            avg_difficulty,
        })
    }
}
