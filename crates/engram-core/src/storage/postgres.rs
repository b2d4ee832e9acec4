//! PostgreSQL backend
//!
//! Same operation surface as the embedded store, spoken in the Postgres
//! dialect: `$n` placeholders, `TIMESTAMPTZ` instants, `JSONB` annotations,
//! `BIGSERIAL` log ids, and `ON CONFLICT` upserts. Connections come from a
//! bounded r2d2 pool; an acquisition timeout surfaces as
//! `ResourceUnavailable`.

use chrono::{DateTime, Utc};
use postgres::types::ToSql;
use postgres::NoTls;
use r2d2_postgres::PostgresConnectionManager;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::fsrs::{LearningState, MemoryState};
use crate::memory::{ActionType, EdgeRecord, LogRecord, NodeRecord};
use crate::time::TimePoint;

use super::{EdgeSpec, LearnWriteSet, LogEntry, StanceRow, StoreBackend, StoreStats};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kg_nodes (
    owner TEXT NOT NULL,
    id TEXT NOT NULL,
    stability DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    difficulty DOUBLE PRECISION NOT NULL DEFAULT 5.0,
    last_review TIMESTAMPTZ,
    reps INTEGER NOT NULL DEFAULT 0,
    state SMALLINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ,
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
    weight DOUBLE PRECISION NOT NULL DEFAULT 1.0,
    sentiment DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    created_at TIMESTAMPTZ,
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
    id BIGSERIAL PRIMARY KEY,
    agent TEXT NOT NULL,
    action_type TEXT NOT NULL,
    content_or_handle TEXT NOT NULL,
    annotations JSONB NOT NULL DEFAULT '{}',
    timestamp TIMESTAMPTZ,
    sim_day INTEGER,
    sim_hour INTEGER
);

CREATE INDEX IF NOT EXISTS idx_kg_logs_agent_time ON kg_logs(agent, timestamp);

ALTER TABLE kg_nodes ADD COLUMN IF NOT EXISTS sim_day INTEGER;
ALTER TABLE kg_nodes ADD COLUMN IF NOT EXISTS sim_hour INTEGER;
ALTER TABLE kg_edges ADD COLUMN IF NOT EXISTS sim_day INTEGER;
ALTER TABLE kg_edges ADD COLUMN IF NOT EXISTS sim_hour INTEGER;
ALTER TABLE kg_logs ADD COLUMN IF NOT EXISTS sim_day INTEGER;
ALTER TABLE kg_logs ADD COLUMN IF NOT EXISTS sim_hour INTEGER;
"#;

type Pool = r2d2::Pool<PostgresConnectionManager<NoTls>>;
type PooledConn = r2d2::PooledConnection<PostgresConnectionManager<NoTls>>;

/// Networked PostgreSQL store behind a bounded connection pool
pub struct PostgresBackend {
    pool: Pool,
}

impl PostgresBackend {
    /// Connect a pool to `url` with the sizing from `config`
    pub fn open(url: &str, config: &StoreConfig) -> Result<Self> {
        let pg_config: postgres::Config = url
            .parse()
            .map_err(|e| Error::config("store_uri", format!("bad postgres URL: {e}")))?;
        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = r2d2::Pool::builder()
            .max_size(config.pool_size + config.pool_overflow)
            .min_idle(Some(config.pool_size))
            .connection_timeout(std::time::Duration::from_secs(config.pool_timeout_secs as u64))
            .max_lifetime(Some(std::time::Duration::from_secs(
                config.pool_recycle_secs as u64,
            )))
            .build(manager)?;
        Ok(PostgresBackend { pool })
    }

    fn conn(&self) -> Result<PooledConn> {
        Ok(self.pool.get()?)
    }

    fn time_columns(at: &TimePoint) -> (Option<DateTime<Utc>>, Option<i32>, Option<i32>) {
        match at {
            TimePoint::Absolute { instant } => (Some(*instant), None, None),
            TimePoint::Round { day, hour } => (None, Some(*day as i32), Some(*hour as i32)),
        }
    }

    fn row_to_node(row: &postgres::Row) -> Result<NodeRecord> {
        let last_review_ts: Option<DateTime<Utc>> = row.get("last_review");
        let created_ts: Option<DateTime<Utc>> = row.get("created_at");
        let sim_day: Option<i32> = row.get("sim_day");
        let sim_hour: Option<i32> = row.get("sim_hour");
        let reps: i32 = row.get("reps");
        let state_raw: i16 = row.get("state");

        let sim_day_u = sim_day.map(|v| v as u32);
        let sim_hour_u = sim_hour.map(|v| v as u32);
        let last_review = if reps >= 1 {
            TimePoint::from_columns(last_review_ts, sim_day_u, sim_hour_u)
        } else {
            None
        };
        let created_at = TimePoint::from_columns(created_ts, sim_day_u, sim_hour_u)
            .ok_or_else(|| Error::invalid("created_at", "node row has no time representation"))?;

        Ok(NodeRecord {
            owner: row.get("owner"),
            id: row.get("id"),
            memory: MemoryState {
                stability: row.get("stability"),
                difficulty: row.get("difficulty"),
                last_review,
                reps: reps as u32,
                state: LearningState::from_value(state_raw as u8)?,
            },
            created_at,
        })
    }

    fn row_to_edge(row: &postgres::Row) -> Result<EdgeRecord> {
        let created_ts: Option<DateTime<Utc>> = row.get("created_at");
        let sim_day: Option<i32> = row.get("sim_day");
        let sim_hour: Option<i32> = row.get("sim_hour");
        let created_at = TimePoint::from_columns(
            created_ts,
            sim_day.map(|v| v as u32),
            sim_hour.map(|v| v as u32),
        )
        .ok_or_else(|| Error::invalid("created_at", "edge row has no time representation"))?;

        Ok(EdgeRecord {
            owner: row.get("owner"),
            source: row.get("source"),
            relation: row.get("relation"),
            target: row.get("target"),
            weight: row.get("weight"),
            sentiment: row.get("sentiment"),
            created_at,
        })
    }

    fn row_to_log(row: &postgres::Row) -> Result<LogRecord> {
        let ts: Option<DateTime<Utc>> = row.get("timestamp");
        let sim_day: Option<i32> = row.get("sim_day");
        let sim_hour: Option<i32> = row.get("sim_hour");
        let at = TimePoint::from_columns(ts, sim_day.map(|v| v as u32), sim_hour.map(|v| v as u32))
            .ok_or_else(|| Error::invalid("timestamp", "log row has no time representation"))?;
        let action_raw: String = row.get("action_type");

        Ok(LogRecord {
            id: row.get("id"),
            agent: row.get("agent"),
            action: ActionType::parse_name(&action_raw)?,
            content_or_handle: row.get("content_or_handle"),
            annotations: row.get("annotations"),
            at,
        })
    }

    fn upsert_node_on(
        tx: &mut postgres::Transaction<'_>,
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
                tx.execute(
                    "INSERT INTO kg_nodes
                        (owner, id, stability, difficulty, last_review, reps, state,
                         created_at, sim_day, sim_hour)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                     ON CONFLICT (owner, id) DO UPDATE SET
                        stability = EXCLUDED.stability,
                        difficulty = EXCLUDED.difficulty,
                        last_review = EXCLUDED.last_review,
                        reps = EXCLUDED.reps,
                        state = EXCLUDED.state,
                        sim_day = EXCLUDED.sim_day,
                        sim_hour = EXCLUDED.sim_hour",
                    &[
                        &owner,
                        &id,
                        &state.stability,
                        &state.difficulty,
                        &review_ts,
                        &(state.reps as i32),
                        &(state.state.value() as i16),
                        &created_ts,
                        &sim_day,
                        &sim_hour,
                    ],
                )?;
            }
            None => {
                tx.execute(
                    "INSERT INTO kg_nodes
                        (owner, id, stability, difficulty, last_review, reps, state,
                         created_at, sim_day, sim_hour)
                     VALUES ($1, $2, 0.0, 5.0, NULL, 0, 0, $3, $4, $5)
                     ON CONFLICT (owner, id) DO NOTHING",
                    &[&owner, &id, &created_ts, &created_day, &created_hour],
                )?;
            }
        }
        Ok(())
    }

    fn insert_edge_on(
        tx: &mut postgres::Transaction<'_>,
        owner: &str,
        edge: &EdgeSpec,
        at: &TimePoint,
    ) -> Result<()> {
        let (created_ts, sim_day, sim_hour) = Self::time_columns(at);
        tx.execute(
            "INSERT INTO kg_edges
                (owner, source, relation, target, weight, sentiment,
                 created_at, sim_day, sim_hour)
             VALUES ($1, $2, $3, $4, 1.0, $5, $6, $7, $8)
             ON CONFLICT (owner, source, target, relation) DO UPDATE SET
                weight = EXCLUDED.weight,
                sentiment = EXCLUDED.sentiment,
                created_at = EXCLUDED.created_at,
                sim_day = EXCLUDED.sim_day,
                sim_hour = EXCLUDED.sim_hour",
            &[
                &owner,
                &edge.source,
                &edge.relation,
                &edge.target,
                &edge.sentiment,
                &created_ts,
                &sim_day,
                &sim_hour,
            ],
        )?;
        Ok(())
    }

    fn insert_log_on(
        tx: &mut postgres::Transaction<'_>,
        owner: &str,
        entry: &LogEntry,
        at: &TimePoint,
    ) -> Result<i64> {
        let (ts, sim_day, sim_hour) = Self::time_columns(at);
        let row = tx.query_one(
            "INSERT INTO kg_logs
                (agent, action_type, content_or_handle, annotations, timestamp, sim_day, sim_hour)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id",
            &[
                &owner,
                &entry.action.as_str(),
                &entry.stored,
                &entry.annotations,
                &ts,
                &sim_day,
                &sim_hour,
            ],
        )?;
        Ok(row.get(0))
    }

    fn recency_clause(
        now: &TimePoint,
        window_days: f64,
        binds: &mut Vec<Box<dyn ToSql + Sync + Send>>,
    ) -> String {
        match now {
            TimePoint::Absolute { instant } => {
                let cutoff =
                    *instant - chrono::Duration::milliseconds((window_days * 86_400_000.0) as i64);
                binds.push(Box::new(cutoff));
                format!("(created_at IS NOT NULL AND created_at >= ${})", binds.len())
            }
            TimePoint::Round { day, hour } => {
                let cutoff_hours = *day as f64 * 24.0 + *hour as f64 - window_days * 24.0;
                binds.push(Box::new(cutoff_hours));
                format!(
                    "(sim_day IS NOT NULL AND (sim_day * 24.0 + sim_hour) >= ${})",
                    binds.len()
                )
            }
        }
    }
}

impl StoreBackend for PostgresBackend {
    fn ensure_schema(&self) -> Result<()> {
        let mut conn = self.conn()?;
        conn.batch_execute(SCHEMA)?;
        tracing::info!("postgres schema ensured");
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
        let mut tx = conn.transaction()?;
        Self::upsert_node_on(&mut tx, owner, id, state, at)?;
        tx.commit()?;
        Ok(())
    }

    fn get_node(&self, owner: &str, id: &str) -> Result<Option<NodeRecord>> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "SELECT * FROM kg_nodes WHERE owner = $1 AND id = $2",
            &[&owner, &id],
        )?;
        row.as_ref().map(Self::row_to_node).transpose()
    }

    fn apply_learn(&self, write: &LearnWriteSet) -> Result<i64> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;
        for (id, state) in &write.nodes {
            Self::upsert_node_on(&mut tx, &write.owner, id, Some(state), &write.at)?;
        }
        Self::insert_edge_on(&mut tx, &write.owner, &write.edge, &write.at)?;
        let log_id = Self::insert_log_on(&mut tx, &write.owner, &write.log, &write.at)?;
        tx.commit()?;
        Ok(log_id)
    }

    fn add_edge(&self, owner: &str, edge: &EdgeSpec, at: &TimePoint) -> Result<()> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;
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
        let row = conn.query_opt(
            "SELECT * FROM kg_edges
             WHERE owner = $1 AND source = $2 AND relation = $3 AND target = $4",
            &[&owner, &source, &relation, &target],
        )?;
        row.as_ref().map(Self::row_to_edge).transpose()
    }

    fn append_log(&self, owner: &str, entry: &LogEntry, at: &TimePoint) -> Result<i64> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;
        let id = Self::insert_log_on(&mut tx, owner, entry, at)?;
        tx.commit()?;
        Ok(id)
    }

    fn iter_log(
        &self,
        owner: &str,
        since: Option<&TimePoint>,
        limit: Option<u32>,
    ) -> Result<Vec<LogRecord>> {
        let mut sql = String::from("SELECT * FROM kg_logs WHERE agent = $1");
        let mut binds: Vec<Box<dyn ToSql + Sync + Send>> = vec![Box::new(owner.to_string())];

        if let Some(since) = since {
            match since {
                TimePoint::Absolute { instant } => {
                    binds.push(Box::new(*instant));
                    sql.push_str(&format!(" AND timestamp >= ${}", binds.len()));
                }
                TimePoint::Round { day, hour } => {
                    binds.push(Box::new(*day as f64 * 24.0 + *hour as f64));
                    sql.push_str(&format!(
                        " AND (sim_day * 24.0 + sim_hour) >= ${}",
                        binds.len()
                    ));
                }
            }
        }
        sql.push_str(" ORDER BY id ASC");
        if let Some(limit) = limit {
            binds.push(Box::new(limit as i64));
            sql.push_str(&format!(" LIMIT ${}", binds.len()));
        }

        let mut conn = self.conn()?;
        let params: Vec<&(dyn ToSql + Sync)> =
            binds.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect();
        let rows = conn.query(&sql, &params)?;
        rows.iter().map(Self::row_to_log).collect()
    }

    fn agent_stance(
        &self,
        owner: &str,
        topic: &str,
        now: &TimePoint,
        window_days: f64,
        cap: u32,
    ) -> Result<Vec<StanceRow>> {
        let mut binds: Vec<Box<dyn ToSql + Sync + Send>> = vec![Box::new(owner.to_string())];
        let mut sql = String::from(
            "SELECT source, relation, target, sentiment FROM kg_edges
             WHERE owner = $1 AND (source = 'I' OR source = $1)",
        );

        let recency = Self::recency_clause(now, window_days, &mut binds);
        if topic.is_empty() {
            sql.push_str(&format!(" AND {recency}"));
        } else {
            binds.push(Box::new(topic.to_lowercase()));
            sql.push_str(&format!(
                " AND (strpos(lower(target), ${}) > 0 OR {recency})",
                binds.len()
            ));
        }

        binds.push(Box::new(cap as i64));
        sql.push_str(&format!(
            " ORDER BY created_at DESC NULLS LAST, sim_day DESC NULLS LAST,
                       sim_hour DESC NULLS LAST
             LIMIT ${}",
            binds.len()
        ));

        let mut conn = self.conn()?;
        let params: Vec<&(dyn ToSql + Sync)> =
            binds.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect();
        let rows = conn.query(&sql, &params)?;
        Ok(rows
            .iter()
            .map(|row| StanceRow {
                source: row.get(0),
                relation: row.get(1),
                target: row.get(2),
                sentiment: row.get(3),
            })
            .collect())
    }

    fn world_knowledge(&self, owner: &str, topic: &str, limit: u32) -> Result<Vec<StanceRow>> {
        if topic.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        let rows = conn.query(
            "SELECT source, relation, target, sentiment FROM kg_edges
             WHERE owner = $1 AND source <> 'I' AND source <> $1
               AND (strpos(lower(source), $2) > 0 OR strpos(lower(target), $2) > 0)
             ORDER BY created_at DESC NULLS LAST, sim_day DESC NULLS LAST,
                      sim_hour DESC NULLS LAST
             LIMIT $3",
            &[&owner, &topic.to_lowercase(), &(limit as i64)],
        )?;
        Ok(rows
            .iter()
            .map(|row| StanceRow {
                source: row.get(0),
                relation: row.get(1),
                target: row.get(2),
                sentiment: row.get(3),
            })
            .collect())
    }

    fn list_nodes(&self, owner: &str) -> Result<Vec<NodeRecord>> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            "SELECT * FROM kg_nodes WHERE owner = $1 ORDER BY id ASC",
            &[&owner],
        )?;
        rows.iter().map(Self::row_to_node).collect()
    }

    fn list_edges(&self, owner: &str) -> Result<Vec<EdgeRecord>> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            "SELECT * FROM kg_edges WHERE owner = $1 ORDER BY source, relation, target",
            &[&owner],
        )?;
        rows.iter().map(Self::row_to_edge).collect()
    }

    fn list_owners(&self) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let rows = conn.query("SELECT DISTINCT owner FROM kg_nodes ORDER BY owner", &[])?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    fn stats(&self, owner: &str) -> Result<StoreStats> {
        let mut conn = self.conn()?;
        let row = conn.query_one(
            "SELECT COUNT(*), AVG(stability), AVG(difficulty) FROM kg_nodes WHERE owner = $1",
            &[&owner],
        )?;
        let nodes: i64 = row.get(0);
        let avg_stability: Option<f64> = row.get(1);
        let avg_difficulty: Option<f64> = row.get(2);
        let edges: i64 = conn
            .query_one("SELECT COUNT(*) FROM kg_edges WHERE owner = $1", &[&owner])?
            .get(0);
        let log_records: i64 = conn
            .query_one("SELECT COUNT(*) FROM kg_logs WHERE agent = $1", &[&owner])?
            .get(0);
        Ok(StoreStats {
            nodes: nodes as u64,
            edges: edges as u64,
            log_records: log_records as u64,
            avg_stability,
            avg_difficulty,
        })
    }
}
