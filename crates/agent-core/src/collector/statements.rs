//! `pg_stat_statements` sampler.
//!
//! Gracefully degrades when the extension isn't installed: the
//! availability check runs exactly once per process and is memoized
//! rather than periodically rechecked (see DESIGN.md, Open Question 2).
//!
//! Produces a single aggregate record per tick, omitted entirely when the
//! extension is absent or no statements are returned.

use std::sync::Mutex;

use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::model::{Record, Source};
use crate::pool::PgPool;

use super::queries::{STATEMENTS_EXTENSION_CHECK, STATEMENTS_QUERY};

const DEFAULT_LIMIT: i64 = 100;
const TRUNCATE_AT: usize = 1000;

/// Holds the one-time-memoized extension-availability flag.
#[derive(Default)]
pub struct StatementsState {
    extension_available: Mutex<Option<bool>>,
}

impl StatementsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `pg_stat_statements` is installed, checking the
    /// database only on the first call.
    pub fn extension_available(&self, pool: &PgPool) -> bool {
        if let Some(cached) = *self.extension_available.lock().unwrap() {
            return cached;
        }

        let available = check_extension(pool);
        *self.extension_available.lock().unwrap() = Some(available);
        if available {
            info!("pg_stat_statements_available");
        } else {
            warn!(hint = "CREATE EXTENSION pg_stat_statements;", "pg_stat_statements_not_installed");
        }
        available
    }
}

fn check_extension(pool: &PgPool) -> bool {
    let mut conn = match pool.get() {
        Ok(conn) => conn,
        Err(e) => {
            warn!(error = %e, "pg_stat_statements_check_failed");
            return false;
        }
    };

    match conn.query_one(STATEMENTS_EXTENSION_CHECK, &[]) {
        Ok(row) => row.get::<_, i64>(0) > 0,
        Err(e) => {
            warn!(error = %e, "pg_stat_statements_check_failed");
            false
        }
    }
}

/// Collect top queries by total execution time. Returns `None` if the
/// extension is unavailable, the query fails (soft failure), or there are no
/// rows to report.
pub fn sample(pool: &PgPool, state: &StatementsState) -> Option<Record> {
    if !state.extension_available(pool) {
        return None;
    }

    let mut conn = match pool.get() {
        Ok(conn) => conn,
        Err(e) => {
            warn!(error = %e, "pg_statements_collection_failed");
            return None;
        }
    };

    let rows = match conn.query(STATEMENTS_QUERY, &[&DEFAULT_LIMIT]) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "pg_statements_collection_failed");
            return None;
        }
    };

    if rows.is_empty() {
        return None;
    }

    let statements: Vec<Value> = rows
        .iter()
        .map(|row| {
            let mut stmt = Map::new();
            let queryid: Option<i64> = row.get("queryid");
            stmt.insert("queryid".to_string(), json!(queryid.map(|q| q.to_string())));

            let query: Option<String> = row.get("query");
            let query = query.map(|q| truncate(&q, TRUNCATE_AT));
            stmt.insert("query".to_string(), json!(query));

            stmt.insert("calls".to_string(), json!(row.get::<_, i64>("calls")));
            stmt.insert("total_exec_time".to_string(), json!(row.get::<_, f64>("total_exec_time")));
            stmt.insert("mean_exec_time".to_string(), json!(row.get::<_, f64>("mean_exec_time")));
            stmt.insert("min_exec_time".to_string(), json!(row.get::<_, f64>("min_exec_time")));
            stmt.insert("max_exec_time".to_string(), json!(row.get::<_, f64>("max_exec_time")));
            stmt.insert("stddev_exec_time".to_string(), json!(row.get::<_, f64>("stddev_exec_time")));
            stmt.insert("rows".to_string(), json!(row.get::<_, i64>("rows")));
            stmt.insert("shared_blks_hit".to_string(), json!(row.get::<_, i64>("shared_blks_hit")));
            stmt.insert("shared_blks_read".to_string(), json!(row.get::<_, i64>("shared_blks_read")));
            stmt.insert("shared_blks_written".to_string(), json!(row.get::<_, i64>("shared_blks_written")));
            stmt.insert("local_blks_hit".to_string(), json!(row.get::<_, i64>("local_blks_hit")));
            stmt.insert("local_blks_read".to_string(), json!(row.get::<_, i64>("local_blks_read")));
            stmt.insert("local_blks_written".to_string(), json!(row.get::<_, i64>("local_blks_written")));
            stmt.insert("temp_blks_read".to_string(), json!(row.get::<_, i64>("temp_blks_read")));
            stmt.insert("temp_blks_written".to_string(), json!(row.get::<_, i64>("temp_blks_written")));
            stmt.insert("blk_read_time".to_string(), json!(row.get::<_, f64>("blk_read_time")));
            stmt.insert("blk_write_time".to_string(), json!(row.get::<_, f64>("blk_write_time")));
            Value::Object(stmt)
        })
        .collect();

    let mut data = Map::new();
    data.insert("count".to_string(), json!(statements.len()));
    data.insert("statements".to_string(), Value::Array(statements));

    Some(Record::new(Source::PgStatStatements, data))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut truncated = s.chars().take(max).collect::<String>();
        truncated.push_str("…[truncated]");
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_leaves_short_strings_untouched() {
        assert_eq!(truncate("select 1", 1000), "select 1");
    }

    #[test]
    fn truncate_marks_long_strings() {
        let long = "a".repeat(1500);
        let result = truncate(&long, 1000);
        assert!(result.ends_with("…[truncated]"));
        assert_eq!(result.chars().count(), 1000 + "…[truncated]".chars().count());
    }

    #[test]
    fn state_starts_unmemoized() {
        let state = StatementsState::new();
        assert!(state.extension_available.lock().unwrap().is_none());
    }
}
