//! Bounded PostgreSQL connection pool.
//!
//! Safety measures mirror the configuration's own limits: a hard cap on pool
//! size, a session-level `statement_timeout`, and an `application_name` that
//! makes our own connections identifiable (and excludable) in
//! `pg_stat_activity`.

use std::time::Duration;

use postgres::NoTls;
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use tracing::info;

use crate::config::Config;
use crate::error::AgentError;

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

/// Self-identification string set via `application_name`, used both for
/// operator visibility in `pg_stat_activity` and to exclude our own
/// connections from the activity sampler.
pub const APPLICATION_NAME: &str = "bitville-monitor";

/// Build the bounded pool and verify connectivity with `SELECT 1`.
pub fn build_pool(config: &Config) -> Result<PgPool, AgentError> {
    let conninfo = format!(
        "host={} port={} dbname={} user={} password={} application_name={} options='-c statement_timeout={}'",
        config.db_host,
        config.db_port,
        config.db_name,
        config.db_user,
        config.db_password,
        APPLICATION_NAME,
        config.statement_timeout_ms,
    );

    info!(
        host = %config.db_host,
        port = config.db_port,
        db = %config.db_name,
        min_size = config.pool_min_size,
        max_size = config.pool_max_size,
        statement_timeout_ms = config.statement_timeout_ms,
        "creating_connection_pool"
    );

    let manager = PostgresConnectionManager::new(
        conninfo.parse().map_err(|e| AgentError::ConfigInvalid(format!("invalid conninfo: {e}")))?,
        NoTls,
    );

    let pool = Pool::builder()
        .min_idle(Some(config.pool_min_size))
        .max_size(config.pool_max_size)
        .connection_timeout(Duration::from_secs(config.connection_timeout_s))
        .build(manager)
        .map_err(|e| AgentError::DbUnreachable(e.to_string()))?;

    let mut conn = pool.get().map_err(|e| AgentError::DbUnreachable(e.to_string()))?;
    let row = conn.query_one("SELECT 1", &[]).map_err(AgentError::from)?;
    let value: i32 = row.get(0);
    if value != 1 {
        return Err(AgentError::DbUnreachable("SELECT 1 sanity check failed".to_string()));
    }
    info!("connection_pool_verified");

    Ok(pool)
}
