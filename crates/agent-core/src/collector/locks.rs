//! Blocking-lock detection sampler.
//!
//! Always produces a record, even when no blocking is detected — the
//! scheduler must send it unconditionally so the listener's alerting can
//! distinguish "checked, nothing blocking" from "didn't check".

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::model::{Record, Source};
use crate::pool::PgPool;

use super::queries::LOCKS_QUERY;

const TRUNCATE_AT: usize = 500;

/// Collect blocking lock situations. Returns an empty-but-present record on
/// query failure (soft failure) rather than propagating the error.
pub fn sample(pool: &PgPool) -> Record {
    let locks = collect(pool);

    if !locks.is_empty() {
        debug!(count = locks.len(), "blocking_queries_detected");
    } else {
        debug!("no_blocking_queries_detected");
    }

    let mut data = Map::new();
    data.insert("has_blocking".to_string(), json!(!locks.is_empty()));
    data.insert("count".to_string(), json!(locks.len()));
    data.insert("locks".to_string(), Value::Array(locks));

    Record::new(Source::PgLocks, data)
}

fn collect(pool: &PgPool) -> Vec<Value> {
    let mut conn = match pool.get() {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(error = %e, "lock_detection_failed");
            return Vec::new();
        }
    };

    let rows = match conn.query(LOCKS_QUERY, &[]) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(error = %e, "lock_detection_failed");
            return Vec::new();
        }
    };

    rows.iter()
        .map(|row| {
            let mut data = Map::new();
            data.insert("blocked_pid".to_string(), json!(row.get::<_, i32>("blocked_pid")));
            data.insert("blocked_user".to_string(), json!(row.get::<_, Option<String>>("blocked_user")));
            data.insert(
                "blocked_application".to_string(),
                json!(row.get::<_, Option<String>>("blocked_application")),
            );
            let blocked_addr: Option<std::net::IpAddr> = row.get("blocked_client_addr");
            data.insert("blocked_client_addr".to_string(), json!(blocked_addr.map(|a| a.to_string())));
            let blocked_query: Option<String> = row.get("blocked_query");
            data.insert("blocked_query".to_string(), json!(blocked_query.map(|q| truncate(&q, TRUNCATE_AT))));
            data.insert("blocked_query_start".to_string(), iso_ts(row.get("blocked_query_start")));

            data.insert("blocking_pid".to_string(), json!(row.get::<_, i32>("blocking_pid")));
            data.insert("blocking_user".to_string(), json!(row.get::<_, Option<String>>("blocking_user")));
            data.insert(
                "blocking_application".to_string(),
                json!(row.get::<_, Option<String>>("blocking_application")),
            );
            let blocking_addr: Option<std::net::IpAddr> = row.get("blocking_client_addr");
            data.insert("blocking_client_addr".to_string(), json!(blocking_addr.map(|a| a.to_string())));
            let blocking_query: Option<String> = row.get("blocking_query");
            data.insert("blocking_query".to_string(), json!(blocking_query.map(|q| truncate(&q, TRUNCATE_AT))));
            data.insert("blocking_query_start".to_string(), iso_ts(row.get("blocking_query_start")));

            data.insert("locktype".to_string(), json!(row.get::<_, Option<String>>("locktype")));
            data.insert("blocked_mode".to_string(), json!(row.get::<_, Option<String>>("blocked_mode")));
            data.insert("blocking_mode".to_string(), json!(row.get::<_, Option<String>>("blocking_mode")));

            Value::Object(data)
        })
        .collect()
}

fn iso_ts(value: Option<DateTime<Utc>>) -> Value {
    match value {
        Some(ts) => json!(ts.to_rfc3339()),
        None => Value::Null,
    }
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
    fn truncate_is_noop_under_limit() {
        assert_eq!(truncate("short", 500), "short");
    }

    #[test]
    fn truncate_marks_over_limit() {
        let long = "x".repeat(600);
        assert!(truncate(&long, 500).ends_with("…[truncated]"));
    }
}
