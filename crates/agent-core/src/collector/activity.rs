//! `pg_stat_activity` sampler.
//!
//! This is the canary sampler: unlike the other three, a query failure here
//! is surfaced to the caller rather than swallowed, because a broken
//! connection to `pg_stat_activity` means the pool itself is unhealthy.
//!
//! Produces a single aggregate record per tick (not one record per row): the
//! scheduler sends at most one `pg_stat_activity` envelope, holding the full
//! session list plus summary counts, and omits it entirely when no session
//! is active.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::error::AgentError;
use crate::model::{Record, Source};
use crate::pool::PgPool;

use super::queries::ACTIVITY_QUERY;

/// Matches the correlation id upstream applications embed in
/// `application_name` as `bitville-<uuid>`.
static CORRELATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bitville-([a-f0-9-]{36})").expect("valid regex"));

/// Collect active (non-idle) sessions, excluding our own backend.
///
/// Returns `Ok(None)` when there are no active sessions — the scheduler must
/// not emit an empty envelope for this source.
pub fn sample(pool: &PgPool) -> Result<Option<Record>, AgentError> {
    let mut conn = pool.get()?;
    let rows = conn.query(ACTIVITY_QUERY, &[])?;

    if rows.is_empty() {
        return Ok(None);
    }

    let mut sessions = Vec::with_capacity(rows.len());
    let mut with_correlation = 0usize;

    for row in &rows {
        let application_name: Option<String> = row.get("application_name");
        let correlation_id = application_name
            .as_deref()
            .and_then(|name| CORRELATION_PATTERN.captures(name))
            .map(|caps| caps[1].to_string());
        if correlation_id.is_some() {
            with_correlation += 1;
        }

        let mut session = Map::new();
        session.insert("pid".to_string(), json!(row.get::<_, i32>("pid")));
        session.insert("usename".to_string(), json!(row.get::<_, Option<String>>("usename")));
        session.insert("application_name".to_string(), json!(application_name));
        let client_addr: Option<std::net::IpAddr> = row.get("client_addr");
        session.insert("client_addr".to_string(), json!(client_addr.map(|a| a.to_string())));
        session.insert("client_port".to_string(), json!(row.get::<_, Option<i32>>("client_port")));
        session.insert("backend_start".to_string(), iso_ts(row.get("backend_start")));
        session.insert("xact_start".to_string(), iso_ts(row.get("xact_start")));
        session.insert("query_start".to_string(), iso_ts(row.get("query_start")));
        session.insert("state_change".to_string(), iso_ts(row.get("state_change")));
        session.insert("wait_event_type".to_string(), json!(row.get::<_, Option<String>>("wait_event_type")));
        session.insert("wait_event".to_string(), json!(row.get::<_, Option<String>>("wait_event")));
        session.insert("state".to_string(), json!(row.get::<_, Option<String>>("state")));
        session.insert("query".to_string(), json!(row.get::<_, Option<String>>("query")));
        session.insert("backend_type".to_string(), json!(row.get::<_, Option<String>>("backend_type")));
        session.insert("correlation_id".to_string(), json!(correlation_id));

        sessions.push(Value::Object(session));
    }

    let mut data = Map::new();
    data.insert("count".to_string(), json!(sessions.len()));
    data.insert("with_correlation".to_string(), json!(with_correlation));
    data.insert("sessions".to_string(), Value::Array(sessions));

    Ok(Some(Record::new(Source::PgStatActivity, data)))
}

fn iso_ts(value: Option<DateTime<Utc>>) -> Value {
    match value {
        Some(ts) => json!(ts.to_rfc3339()),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_correlation_id_from_application_name() {
        let caps = CORRELATION_PATTERN
            .captures("bitville-0196d2b0-27ad-7b1e-9b7f-6f1a2b3c4d5e")
            .unwrap();
        assert_eq!(&caps[1], "0196d2b0-27ad-7b1e-9b7f-6f1a2b3c4d5e");
    }

    #[test]
    fn no_match_without_prefix() {
        assert!(CORRELATION_PATTERN.captures("worker-pool-3").is_none());
    }
}
