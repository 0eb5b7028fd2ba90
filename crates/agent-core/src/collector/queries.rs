//! SQL text shared by the samplers, kept in one place so the queries stay
//! auditable independent of the Rust code that runs them.

pub const ACTIVITY_QUERY: &str = "
    SELECT
        pid,
        usename,
        application_name,
        client_addr,
        client_port,
        backend_start,
        xact_start,
        query_start,
        state_change,
        wait_event_type,
        wait_event,
        state,
        query,
        backend_type
    FROM pg_stat_activity
    WHERE state != 'idle'
      AND pid != pg_backend_pid()
    ORDER BY query_start DESC NULLS LAST
    LIMIT 100
";

pub const STATEMENTS_EXTENSION_CHECK: &str =
    "SELECT COUNT(*) FROM pg_extension WHERE extname = 'pg_stat_statements'";

pub const STATEMENTS_QUERY: &str = "
    SELECT
        queryid,
        query,
        calls,
        total_exec_time,
        mean_exec_time,
        min_exec_time,
        max_exec_time,
        stddev_exec_time,
        rows,
        shared_blks_hit,
        shared_blks_read,
        shared_blks_written,
        local_blks_hit,
        local_blks_read,
        local_blks_written,
        temp_blks_read,
        temp_blks_written,
        blk_read_time,
        blk_write_time
    FROM pg_stat_statements
    ORDER BY total_exec_time DESC
    LIMIT $1
";

/// PostgreSQL wiki lock-monitoring query (https://wiki.postgresql.org/wiki/Lock_Monitoring).
pub const LOCKS_QUERY: &str = "
    SELECT
        blocked_locks.pid AS blocked_pid,
        blocked_activity.usename AS blocked_user,
        blocked_activity.application_name AS blocked_application,
        blocked_activity.client_addr AS blocked_client_addr,
        blocked_activity.query AS blocked_query,
        blocked_activity.query_start AS blocked_query_start,
        blocking_locks.pid AS blocking_pid,
        blocking_activity.usename AS blocking_user,
        blocking_activity.application_name AS blocking_application,
        blocking_activity.client_addr AS blocking_client_addr,
        blocking_activity.query AS blocking_query,
        blocking_activity.query_start AS blocking_query_start,
        blocked_locks.locktype,
        blocked_locks.mode AS blocked_mode,
        blocking_locks.mode AS blocking_mode
    FROM pg_catalog.pg_locks blocked_locks
    JOIN pg_catalog.pg_stat_activity blocked_activity
        ON blocked_activity.pid = blocked_locks.pid
    JOIN pg_catalog.pg_locks blocking_locks
        ON blocking_locks.locktype = blocked_locks.locktype
        AND blocking_locks.database IS NOT DISTINCT FROM blocked_locks.database
        AND blocking_locks.relation IS NOT DISTINCT FROM blocked_locks.relation
        AND blocking_locks.page IS NOT DISTINCT FROM blocked_locks.page
        AND blocking_locks.tuple IS NOT DISTINCT FROM blocked_locks.tuple
        AND blocking_locks.virtualxid IS NOT DISTINCT FROM blocked_locks.virtualxid
        AND blocking_locks.transactionid IS NOT DISTINCT FROM blocked_locks.transactionid
        AND blocking_locks.classid IS NOT DISTINCT FROM blocked_locks.classid
        AND blocking_locks.objid IS NOT DISTINCT FROM blocked_locks.objid
        AND blocking_locks.objsubid IS NOT DISTINCT FROM blocked_locks.objsubid
        AND blocking_locks.pid != blocked_locks.pid
    JOIN pg_catalog.pg_stat_activity blocking_activity
        ON blocking_activity.pid = blocking_locks.pid
    WHERE NOT blocked_locks.granted
    ORDER BY blocked_activity.query_start
    LIMIT 50
";
