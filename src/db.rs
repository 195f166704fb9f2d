//! Database session source collaborator.
//!
//! Everything the monitor knows about backend sessions comes through
//! [`SessionSource`]; the sampler and the secondary views never see SQL.
//! Every catalog read runs with a 2-second statement timeout inside a
//! rolled-back transaction so a locked catalog cannot stall the tick or a
//! keystroke-driven view.

use std::time::Duration;

use log::debug;
use postgres::error::SqlState;
use postgres::types::ToSql;
use postgres::{Client, Config, NoTls};
use thiserror::Error;

pub const STATEMENT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DbError {
    #[error("database unreachable: {0}")]
    Unreachable(String),
    #[error("statement timed out")]
    Timeout,
    #[error("query failed: {0}")]
    Query(String),
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub pid: i32,
    pub query: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LockRow {
    pub database: Option<String>,
    pub relation: Option<String>,
    pub mode: String,
    pub granted: bool,
}

#[derive(Debug, Clone)]
pub struct StatementRow {
    pub calls: i64,
    pub calls_pct: f64,
    pub total_time: String,
    pub avg_time: String,
    pub query: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementOrder {
    Calls,
    CallsPct,
    TotalTime,
    AvgTime,
}

impl StatementOrder {
    pub const NAMES: [&'static str; 4] = ["calls", "calls%", "total_time", "avg_time"];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "calls" => Some(Self::Calls),
            "calls%" => Some(Self::CallsPct),
            "total_time" => Some(Self::TotalTime),
            "avg_time" => Some(Self::AvgTime),
            _ => None,
        }
    }

    /// Ordinal of the statement column to order by, usable in ORDER BY.
    fn ordinal(self) -> usize {
        match self {
            Self::Calls => 1,
            Self::CallsPct => 2,
            Self::TotalTime => 3,
            Self::AvgTime => 4,
        }
    }
}

pub trait SessionSource {
    /// (pid, query) for every visible backend, under [`STATEMENT_TIMEOUT`].
    fn sessions(&mut self) -> Result<Vec<SessionRow>, DbError>;
    fn current_query(&mut self, pid: i32) -> Result<Option<String>, DbError>;
    fn locks(&mut self, pid: i32) -> Result<Vec<LockRow>, DbError>;
    /// `None` means pg_stat_statements is not installed.
    fn top_statements(
        &mut self,
        order: StatementOrder,
        limit: i64,
    ) -> Result<Option<Vec<StatementRow>>, DbError>;
}

const QUERY_SESSIONS: &str = "SELECT pid, query FROM pg_stat_activity";

const QUERY_CURRENT: &str = "SELECT query FROM pg_stat_activity WHERE pid = $1";

const QUERY_LOCKS: &str = "SELECT datname, relname, mode, granted \
     FROM pg_stat_activity, pg_locks \
     LEFT OUTER JOIN pg_class ON relation = pg_class.oid \
     WHERE pg_stat_activity.pid = $1 AND pg_stat_activity.pid = pg_locks.pid";

const CHECK_STATEMENTS: &str =
    "SELECT 1 FROM pg_extension WHERE extname = 'pg_stat_statements'";

const QUERY_STATEMENTS: &str = "WITH aggs AS (SELECT sum(calls) AS calls_total FROM pg_stat_statements) \
     SELECT calls, \
            calls::float8 / calls_total::float8 AS calls_percentage, \
            to_char(interval '1 millisecond' * total_exec_time, 'HH24:MI:SS.MS'), \
            to_char(interval '1 millisecond' * (total_exec_time / calls), 'HH24:MI:SS.MS'), \
            regexp_replace(query, E'[\\n\\r]+', ' ', 'g') \
     FROM pg_stat_statements, aggs";

/// Live source backed by a PostgreSQL connection. The connection is opened
/// lazily and dropped on any failure; the next tick reconnects.
pub struct PgSessionSource {
    config: Config,
    client: Option<Client>,
}

impl PgSessionSource {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            client: None,
        }
    }

    fn client(&mut self) -> Result<&mut Client, DbError> {
        if self.client.is_none() {
            let client = self
                .config
                .connect(NoTls)
                .map_err(|e| DbError::Unreachable(e.to_string()))?;
            debug!("connected to database");
            self.client = Some(client);
        }
        Ok(self.client.as_mut().unwrap())
    }

    fn fail(&mut self, e: postgres::Error) -> DbError {
        // Drop the connection; the next call reconnects.
        self.client = None;
        if e.code() == Some(&SqlState::QUERY_CANCELED) {
            DbError::Timeout
        } else if e.is_closed() {
            DbError::Unreachable(e.to_string())
        } else {
            DbError::Query(e.to_string())
        }
    }

    /// Every catalog read goes through here: a rolled-back transaction with
    /// [`STATEMENT_TIMEOUT`] applied, so no caller can block past it.
    fn query_guarded(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<postgres::Row>, DbError> {
        fn run(
            client: &mut Client,
            sql: &str,
            params: &[&(dyn ToSql + Sync)],
        ) -> Result<Vec<postgres::Row>, postgres::Error> {
            let mut tx = client.transaction()?;
            tx.batch_execute(&timeout_statement())?;
            let rows = tx.query(sql, params)?;
            tx.rollback()?;
            Ok(rows)
        }
        let result = run(self.client()?, sql, params);
        result.map_err(|e| self.fail(e))
    }
}

fn timeout_statement() -> String {
    format!("SET statement_timeout = {}", STATEMENT_TIMEOUT.as_millis())
}

impl SessionSource for PgSessionSource {
    fn sessions(&mut self) -> Result<Vec<SessionRow>, DbError> {
        let rows = self.query_guarded(QUERY_SESSIONS, &[])?;
        Ok(rows
            .iter()
            .map(|row| SessionRow {
                pid: row.get(0),
                query: row.get(1),
            })
            .collect())
    }

    fn current_query(&mut self, pid: i32) -> Result<Option<String>, DbError> {
        let rows = self.query_guarded(QUERY_CURRENT, &[&pid])?;
        Ok(rows.first().and_then(|row| row.get(0)))
    }

    fn locks(&mut self, pid: i32) -> Result<Vec<LockRow>, DbError> {
        let rows = self.query_guarded(QUERY_LOCKS, &[&pid])?;
        Ok(rows
            .iter()
            .map(|row| LockRow {
                database: row.get(0),
                relation: row.get(1),
                mode: row.get(2),
                granted: row.get(3),
            })
            .collect())
    }

    fn top_statements(
        &mut self,
        order: StatementOrder,
        limit: i64,
    ) -> Result<Option<Vec<StatementRow>>, DbError> {
        let installed = self.query_guarded(CHECK_STATEMENTS, &[])?;
        if installed.is_empty() {
            return Ok(None);
        }

        let sql = format!(
            "{QUERY_STATEMENTS} ORDER BY {} DESC LIMIT $1",
            order.ordinal()
        );
        let rows = self.query_guarded(&sql, &[&limit])?;
        Ok(Some(
            rows.iter()
                .map(|row| StatementRow {
                    calls: row.get(0),
                    calls_pct: row.get(1),
                    total_time: row.get(2),
                    avg_time: row.get(3),
                    query: row.get(4),
                })
                .collect(),
        ))
    }
}
