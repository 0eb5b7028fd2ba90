//! PostgreSQL log line parsing: two regex attempts (detailed, then a
//! permissive fallback), plus extraction of `duration: N ms` and
//! `statement: ...` sub-fields.

use std::sync::LazyLock;

use regex::Regex;

const STATEMENT_TRUNCATE_AT: usize = 2000;

static DETAILED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?sx)
        ^(?P<timestamp>\d{4}-\d{2}-\d{2}\ \d{2}:\d{2}:\d{2}(?:\.\d+)?)
        (?:\s+\w+)?
        \s+\[(?P<pid>\d+)\]
        (?:\s+\[(?P<user>\w+)\])?
        (?:\s+\[(?P<db>\w+)\])?
        \s+(?P<level>\w+):\s+
        (?P<message>.*)
        ",
    )
    .expect("valid detailed log regex")
});

static PERMISSIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)^(?P<timestamp>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}).*?\[(?P<pid>\d+)\].*?(?P<level>LOG|ERROR|WARNING|FATAL|PANIC|DEBUG|INFO|NOTICE):\s+(?P<message>.*)",
    )
    .expect("valid permissive log regex")
});

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"duration:\s+([\d.]+)\s+ms").expect("valid duration regex"));

static STATEMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)statement:\s+(.+)").expect("valid statement regex"));

/// Same correlation id convention as the activity sampler
/// (`collector::activity`): `log_line_prefix` can embed `%a`
/// (application_name), which carries this token when it was set by an
/// upstream application.
static CORRELATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bitville-([a-f0-9-]{36})").expect("valid correlation regex"));

/// Matches only the leading timestamp of a line; used by the assembler to
/// decide whether a newly-read line starts a fresh record.
pub static TIMESTAMP_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}").expect("valid regex"));

/// A parsed PostgreSQL log record.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLogLine {
    pub timestamp: String,
    pub pid: i64,
    pub level: String,
    pub message: String,
    pub user: Option<String>,
    pub database: Option<String>,
    pub duration_ms: Option<f64>,
    pub statement: Option<String>,
    pub correlation_id: Option<String>,
}

/// Parse a single (possibly multi-line) log record, trying the detailed
/// pattern first and falling back to the permissive one. Returns `None` if
/// neither matches; such lines are dropped rather than surfaced raw.
pub fn parse_log_line(line: &str) -> Option<ParsedLogLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let caps = DETAILED_RE.captures(line).or_else(|| PERMISSIVE_RE.captures(line))?;

    let timestamp = caps.name("timestamp")?.as_str().to_string();
    let pid: i64 = caps.name("pid")?.as_str().parse().ok()?;
    let level = caps.name("level")?.as_str().to_string();
    let message = caps.name("message")?.as_str().to_string();
    let user = caps.name("user").map(|m| m.as_str().to_string());
    let database = caps.name("db").map(|m| m.as_str().to_string());

    let duration_ms = DURATION_RE.captures(&message).and_then(|c| c[1].parse::<f64>().ok());

    let statement = STATEMENT_RE.captures(&message).map(|c| {
        let stmt = c[1].trim();
        if stmt.chars().count() > STATEMENT_TRUNCATE_AT {
            let mut truncated: String = stmt.chars().take(STATEMENT_TRUNCATE_AT).collect();
            truncated.push_str("…[truncated]");
            truncated
        } else {
            stmt.to_string()
        }
    });

    let correlation_id = CORRELATION_RE.captures(line).map(|c| c[1].to_string());

    Some(ParsedLogLine {
        timestamp,
        pid,
        level,
        message,
        user,
        database,
        duration_ms,
        statement,
        correlation_id,
    })
}

/// Render a log line in the detailed format `parse_log_line` prefers — the
/// inverse such that `parse_log_line(render_log_line(entry)) == entry` for
/// entries built entirely from the detailed-format fields.
/// `duration_ms`/`statement`/`correlation_id` are derived from `message` on
/// parse, not rendered separately, so callers must already bake them into
/// `message` for the round trip to hold.
pub fn render_log_line(entry: &ParsedLogLine) -> String {
    let mut line = format!("{} UTC [{}]", entry.timestamp, entry.pid);
    if let Some(user) = &entry.user {
        line.push_str(&format!(" [{user}]"));
    }
    if let Some(db) = &entry.database {
        line.push_str(&format!(" [{db}]"));
    }
    line.push_str(&format!(" {}:  {}", entry.level, entry.message));
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_detailed_format() {
        let line = "2026-01-15 10:23:45.123 UTC [1234] [user] [mydb] LOG:  connection received";
        let parsed = parse_log_line(line).unwrap();
        assert_eq!(parsed.pid, 1234);
        assert_eq!(parsed.level, "LOG");
        assert_eq!(parsed.user.as_deref(), Some("user"));
        assert_eq!(parsed.database.as_deref(), Some("mydb"));
        assert_eq!(parsed.message, "connection received");
    }

    #[test]
    fn message_spans_continuation_lines() {
        let line = "2026-01-15 10:23:45.000 UTC [1] LOG:  statement: SELECT 1,\n    2, 3";
        let parsed = parse_log_line(line).unwrap();
        assert_eq!(parsed.statement.as_deref(), Some("SELECT 1,\n    2, 3"));
    }

    #[test]
    fn parses_permissive_fallback() {
        let line = "2026-01-15 10:23:45 something [99] garbled ERROR: connection refused";
        let parsed = parse_log_line(line).unwrap();
        assert_eq!(parsed.pid, 99);
        assert_eq!(parsed.level, "ERROR");
        assert_eq!(parsed.message, "connection refused");
    }

    #[test]
    fn extracts_duration() {
        let line = "2026-01-15 10:23:45.000 UTC [1] LOG:  duration: 123.456 ms  statement: SELECT 1";
        let parsed = parse_log_line(line).unwrap();
        assert_eq!(parsed.duration_ms, Some(123.456));
        assert_eq!(parsed.statement.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn truncates_long_statement() {
        let long_stmt = "x".repeat(3000);
        let line = format!("2026-01-15 10:23:45.000 UTC [1] LOG:  statement: {long_stmt}");
        let parsed = parse_log_line(&line).unwrap();
        let statement = parsed.statement.unwrap();
        assert!(statement.ends_with("…[truncated]"));
        assert_eq!(statement.chars().count(), STATEMENT_TRUNCATE_AT + "…[truncated]".chars().count());
    }

    #[test]
    fn extracts_correlation_id_embedded_via_application_name_prefix() {
        let line = "2026-01-15 10:23:45.000 UTC [1] [bitville-0196d2b0-27ad-7b1e-9b7f-6f1a2b3c4d5e] LOG:  statement: SELECT 1";
        let parsed = parse_log_line(line).unwrap();
        assert_eq!(parsed.correlation_id.as_deref(), Some("0196d2b0-27ad-7b1e-9b7f-6f1a2b3c4d5e"));
    }

    #[test]
    fn unmatched_line_is_dropped() {
        assert!(parse_log_line("not a postgres log line at all").is_none());
    }

    #[test]
    fn blank_line_is_dropped() {
        assert!(parse_log_line("   ").is_none());
    }

    #[test]
    fn round_trips_through_render_and_parse() {
        let entry = ParsedLogLine {
            timestamp: "2026-01-15 10:23:45.123".to_string(),
            pid: 4242,
            level: "LOG".to_string(),
            message: "connection received".to_string(),
            user: Some("appuser".to_string()),
            database: Some("mydb".to_string()),
            duration_ms: None,
            statement: None,
            correlation_id: None,
        };

        let rendered = render_log_line(&entry);
        let reparsed = parse_log_line(&rendered).unwrap();
        assert_eq!(reparsed, entry);
    }

    #[test]
    fn round_trips_without_optional_user_and_database() {
        let entry = ParsedLogLine {
            timestamp: "2026-01-15 10:23:45.000".to_string(),
            pid: 1,
            level: "ERROR".to_string(),
            message: "could not connect".to_string(),
            user: None,
            database: None,
            duration_ms: None,
            statement: None,
            correlation_id: None,
        };

        let rendered = render_log_line(&entry);
        let reparsed = parse_log_line(&rendered).unwrap();
        assert_eq!(reparsed, entry);
    }
}
