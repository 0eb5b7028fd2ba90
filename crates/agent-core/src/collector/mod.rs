//! Sampler adapters: pure functions over a pool (or, for host metrics, over
//! local state) that shape rows into [`Record`]s.

pub mod activity;
pub mod host_metrics;
pub mod locks;
mod queries;
pub mod statements;

pub use host_metrics::HostMetricsState;
pub use statements::StatementsState;

use crate::error::AgentError;
use crate::model::Record;
use crate::pool::PgPool;

/// Result of one collection tick: at most one record per source, with
/// `pg_locks` and `system_metrics` always present. `activity_error` carries
/// the canary sampler's failure, if any — it is reported, not used to abort
/// the rest of the tick, since the other three sources remain meaningful
/// (and diagnostic) even while the DB connection is unhealthy.
pub struct TickResults {
    pub activity: Option<Record>,
    pub activity_error: Option<AgentError>,
    pub statements: Option<Record>,
    pub locks: Record,
    pub system_metrics: Record,
}

/// Run all four samplers for one tick, in order. The active-session
/// sampler's error (it is the canary, per `collector::activity`) is captured
/// rather than propagated: statements, locks, and host metrics still run and
/// still produce their records for this tick, so the buffer flush and the
/// non-DB-dependent sources aren't silently dropped during exactly the DB
/// outage the canary exists to surface.
pub fn collect_tick(
    pool: &PgPool,
    statements_state: &StatementsState,
    host_state: &mut HostMetricsState,
) -> TickResults {
    let (activity, activity_error) = match activity::sample(pool) {
        Ok(record) => (record, None),
        Err(e) => (None, Some(e)),
    };
    let statements = statements::sample(pool, statements_state);
    let locks = locks::sample(pool);
    let system_metrics = host_metrics::sample(host_state);

    TickResults { activity, activity_error, statements, locks, system_metrics }
}
