//! Agent configuration: defaults, INI file, then environment overrides.
//!
//! Priority (lowest to highest): built-in defaults, `BITVILLE_PG_CONFIG_PATH`
//! INI file, `BITVILLE_PG_*` environment variables. Two values are clamped
//! after all layers are applied, regardless of where they came from:
//! `pool_max_size` never exceeds 5, `statement_timeout_ms` never drops below
//! 1000.

use std::path::Path;

use tracing::warn;

/// Agent configuration with safe defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,

    pub pool_min_size: u32,
    pub pool_max_size: u32,
    pub statement_timeout_ms: u64,
    pub connection_timeout_s: u64,

    pub collection_interval_s: u64,

    pub listener_url: String,
    pub listener_api_key: String,
    pub listener_timeout_s: u64,

    pub project_id: String,

    pub buffer_path: String,
    pub buffer_max_size_mb: u64,

    pub postgres_log_path: String,

    pub circuit_breaker_fail_max: u32,
    pub circuit_breaker_timeout_s: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_name: "postgres".to_string(),
            db_user: "bitville_monitor".to_string(),
            db_password: String::new(),

            pool_min_size: 2,
            pool_max_size: 5,
            statement_timeout_ms: 5000,
            connection_timeout_s: 30,

            collection_interval_s: 60,

            listener_url: "https://listener:8443/ingest/postgres".to_string(),
            listener_api_key: String::new(),
            listener_timeout_s: 5,

            project_id: "default".to_string(),

            buffer_path: "/var/lib/bitville-postgres-agent/buffer".to_string(),
            buffer_max_size_mb: 100,

            postgres_log_path: "/var/log/postgresql/postgresql-main.log".to_string(),

            circuit_breaker_fail_max: 5,
            circuit_breaker_timeout_s: 60,
        }
    }
}

impl Config {
    /// Load configuration following the documented precedence: defaults, then
    /// an optional INI file, then `BITVILLE_PG_*` environment variables.
    pub fn load(ini_path: Option<&Path>) -> Config {
        let mut config = Config::default();

        if let Some(path) = ini_path {
            if path.exists() {
                match ini::Ini::load_from_file(path) {
                    Ok(ini) => {
                        apply_ini(&mut config, &ini);
                        tracing::info!(path = %path.display(), "config_loaded_from_file");
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "config_file_unreadable");
                    }
                }
            }
        }

        apply_env(&mut config);
        config.clamp();
        config
    }

    /// Enforce the two safety limits that must hold no matter where a value
    /// came from.
    fn clamp(&mut self) {
        if self.pool_max_size > 5 {
            warn!(requested = self.pool_max_size, capped = 5, "pool_max_size_capped");
            self.pool_max_size = 5;
        }
        if self.statement_timeout_ms < 1000 {
            warn!(
                requested = self.statement_timeout_ms,
                minimum = 1000,
                "statement_timeout_increased"
            );
            self.statement_timeout_ms = 1000;
        }
    }
}

fn apply_ini(config: &mut Config, ini: &ini::Ini) {
    if let Some(section) = ini.section(Some("database")) {
        if let Some(v) = section.get("host") {
            config.db_host = v.to_string();
        }
        if let Some(v) = section.get("port").and_then(|v| v.parse().ok()) {
            config.db_port = v;
        }
        if let Some(v) = section.get("name") {
            config.db_name = v.to_string();
        }
        if let Some(v) = section.get("user") {
            config.db_user = v.to_string();
        }
        if let Some(v) = section.get("password") {
            config.db_password = v.to_string();
        }
        if let Some(v) = section.get("statement_timeout_ms").and_then(|v| v.parse().ok()) {
            config.statement_timeout_ms = v;
        }
    }

    if let Some(section) = ini.section(Some("collection")) {
        if let Some(v) = section.get("interval_s").and_then(|v| v.parse().ok()) {
            config.collection_interval_s = v;
        }
        if let Some(v) = section.get("log_path") {
            config.postgres_log_path = v.to_string();
        }
    }

    if let Some(section) = ini.section(Some("listener")) {
        if let Some(v) = section.get("url") {
            config.listener_url = v.to_string();
        }
        if let Some(v) = section.get("api_key") {
            config.listener_api_key = v.to_string();
        }
        if let Some(v) = section.get("project_id") {
            config.project_id = v.to_string();
        }
    }

    if let Some(section) = ini.section(Some("buffer")) {
        if let Some(v) = section.get("path") {
            config.buffer_path = v.to_string();
        }
        if let Some(v) = section.get("max_size_mb").and_then(|v| v.parse().ok()) {
            config.buffer_max_size_mb = v;
        }
    }
}

fn apply_env(config: &mut Config) {
    macro_rules! env_str {
        ($var:literal, $field:expr) => {
            if let Ok(v) = std::env::var($var) {
                $field = v;
                tracing::debug!(var = $var, "config_override_from_env");
            }
        };
    }
    macro_rules! env_num {
        ($var:literal, $field:expr) => {
            if let Ok(v) = std::env::var($var) {
                match v.parse() {
                    Ok(parsed) => {
                        $field = parsed;
                        tracing::debug!(var = $var, "config_override_from_env");
                    }
                    Err(_) => warn!(var = $var, value = %v, "config_override_invalid"),
                }
            }
        };
    }

    env_str!("BITVILLE_PG_DB_HOST", config.db_host);
    env_num!("BITVILLE_PG_DB_PORT", config.db_port);
    env_str!("BITVILLE_PG_DB_NAME", config.db_name);
    env_str!("BITVILLE_PG_DB_USER", config.db_user);
    env_str!("BITVILLE_PG_DB_PASSWORD", config.db_password);
    env_num!("BITVILLE_PG_STATEMENT_TIMEOUT_MS", config.statement_timeout_ms);
    env_num!("BITVILLE_PG_COLLECTION_INTERVAL_S", config.collection_interval_s);
    env_str!("BITVILLE_PG_LISTENER_URL", config.listener_url);
    env_str!("BITVILLE_PG_LISTENER_API_KEY", config.listener_api_key);
    env_str!("BITVILLE_PG_PROJECT_ID", config.project_id);
    env_str!("BITVILLE_PG_BUFFER_PATH", config.buffer_path);
    env_str!("BITVILLE_PG_LOG_PATH", config.postgres_log_path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_safe() {
        let config = Config::default();
        assert_eq!(config.pool_max_size, 5);
        assert!(config.statement_timeout_ms >= 1000);
    }

    #[test]
    fn clamps_oversized_pool() {
        let mut config = Config::default();
        config.pool_max_size = 20;
        config.clamp();
        assert_eq!(config.pool_max_size, 5);
    }

    #[test]
    fn clamps_tiny_statement_timeout() {
        let mut config = Config::default();
        config.statement_timeout_ms = 10;
        config.clamp();
        assert_eq!(config.statement_timeout_ms, 1000);
    }

    #[test]
    fn env_overrides_defaults() {
        // SAFETY: test runs single-threaded within this process's env; no
        // other test in this module reads BITVILLE_PG_DB_HOST concurrently.
        unsafe {
            std::env::set_var("BITVILLE_PG_DB_HOST", "db.internal");
        }
        let config = Config::load(None);
        assert_eq!(config.db_host, "db.internal");
        unsafe {
            std::env::remove_var("BITVILLE_PG_DB_HOST");
        }
    }

    #[test]
    fn ini_file_is_applied_under_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.ini");
        std::fs::write(
            &path,
            "[database]\nhost = from-ini\n\n[listener]\nproject_id = ini-project\n",
        )
        .unwrap();

        let config = Config::load(Some(&path));
        assert_eq!(config.db_host, "from-ini");
        assert_eq!(config.project_id, "ini-project");
    }
}
