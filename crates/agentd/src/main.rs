//! Binary entry point: CLI parsing, logging setup, signal handling, and
//! handing off to the scheduler.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use agent_core::buffer::PersistentBuffer;
use agent_core::{AgentError, Config, Scheduler};

/// PostgreSQL resident monitoring agent.
#[derive(Parser)]
#[command(name = "agentd", about = "PostgreSQL resident monitoring agent", version)]
struct Args {
    /// Path to an INI configuration file. Overrides built-in defaults;
    /// environment variables take precedence over this file.
    #[arg(long, env = "BITVILLE_PG_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,

    /// Override the collection tick interval, in seconds. Takes precedence
    /// over both the config file and the environment.
    #[arg(long)]
    interval: Option<u64>,

    /// Override the persistent buffer directory. Takes precedence over both
    /// the config file and the environment.
    #[arg(long)]
    buffer_path: Option<PathBuf>,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("agentd={level}").parse().unwrap())
        .add_directive(format!("agent_core={level}").parse().unwrap());

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("agentd {} starting", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(args.config.as_deref());
    if let Some(interval) = args.interval {
        info!(interval_s = interval, "interval_overridden_from_cli");
        config.collection_interval_s = interval;
    }
    if let Some(buffer_path) = &args.buffer_path {
        info!(buffer_path = %buffer_path.display(), "buffer_path_overridden_from_cli");
        config.buffer_path = buffer_path.display().to_string();
    }
    info!(
        host = %config.db_host,
        db = %config.db_name,
        interval_s = config.collection_interval_s,
        listener = %config.listener_url,
        "configuration_loaded"
    );

    if config.listener_api_key.is_empty() {
        report_startup_failure(&AgentError::ConfigInvalid("BITVILLE_PG_LISTENER_API_KEY is not set".to_string()));
        std::process::exit(1);
    }

    let pool = match agent_core::pool::build_pool(&config) {
        Ok(pool) => pool,
        Err(e) => {
            report_startup_failure(&e);
            std::process::exit(1);
        }
    };

    let buffer = match PersistentBuffer::open(std::path::Path::new(&config.buffer_path), config.buffer_max_size_mb) {
        Ok(buffer) => buffer,
        Err(e) => {
            report_startup_failure(&e);
            std::process::exit(1);
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    install_signal_handlers(stop.clone());

    let mut scheduler = Scheduler::new(&config, pool, buffer);
    scheduler.run(stop);

    info!("agentd stopped");
}

fn install_signal_handlers(stop: Arc<AtomicBool>) {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;
    use signal_hook::iterator::Signals;

    if let Err(e) = flag::register(SIGTERM, stop.clone()) {
        warn!(error = %e, "sigterm_handler_registration_failed");
    }
    if let Err(e) = flag::register(SIGINT, stop.clone()) {
        warn!(error = %e, "sigint_handler_registration_failed");
    }

    match Signals::new([SIGHUP]) {
        Ok(mut signals) => {
            std::thread::spawn(move || {
                for signal in signals.forever() {
                    if signal == SIGHUP {
                        info!("received_sighup_reload_not_yet_supported");
                    }
                }
            });
        }
        Err(e) => warn!(error = %e, "sighup_handler_registration_failed"),
    }
}

fn report_startup_failure(e: &AgentError) {
    error!(error = %e, "agent_startup_failed");
}
