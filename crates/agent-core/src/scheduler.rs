//! Scheduler / daemon: owns the collection tick, the log pump thread, and
//! coordinates shutdown between them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::breaker::CircuitBreaker;
use crate::buffer::PersistentBuffer;
use crate::collector::{self, HostMetricsState, StatementsState};
use crate::config::Config;
use crate::envelope::{self, Envelope};
use crate::log::{self, LogPump};
use crate::model::Record;
use crate::pool::PgPool;
use crate::sender::HttpSender;

/// Number of buffered envelopes the scheduler attempts to drain per tick
/// once the breaker is closed.
const FLUSH_BATCH_SIZE: usize = 50;
/// Interval between checks of the stop flag while sleeping between ticks.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

pub struct Scheduler {
    pool: PgPool,
    buffer: Arc<PersistentBuffer>,
    breaker: Arc<CircuitBreaker>,
    sender: HttpSender,
    statements_state: StatementsState,
    host_state: HostMetricsState,
    project_id: String,
    collection_interval: Duration,
    log_path: std::path::PathBuf,
}

impl Scheduler {
    pub fn new(config: &Config, pool: PgPool, buffer: PersistentBuffer) -> Self {
        let breaker =
            Arc::new(CircuitBreaker::new(config.circuit_breaker_fail_max, Duration::from_secs(config.circuit_breaker_timeout_s)));
        let sender = HttpSender::new(
            config.listener_url.clone(),
            config.listener_api_key.clone(),
            Duration::from_secs(config.listener_timeout_s),
        );

        Self {
            pool,
            buffer: Arc::new(buffer),
            breaker,
            sender,
            statements_state: StatementsState::new(),
            host_state: HostMetricsState::new(),
            project_id: config.project_id.clone(),
            collection_interval: Duration::from_secs(config.collection_interval_s),
            log_path: std::path::PathBuf::from(&config.postgres_log_path),
        }
    }

    /// Run until `stop` is observed true. Spawns the log-pump thread, then
    /// drives collection ticks on the calling thread. Shutdown waits for
    /// the log pump to drain its final batch before returning.
    pub fn run(&mut self, stop: Arc<AtomicBool>) {
        let log_pump_handle = self.spawn_log_pump(stop.clone());

        info!(interval_s = self.collection_interval.as_secs(), "starting_collection_loop");
        while !stop.load(Ordering::SeqCst) {
            let started = Instant::now();
            self.run_tick();
            match next_sleep(self.collection_interval, started.elapsed()) {
                Some(remaining) => self.sleep_interruptible(&stop, remaining),
                None => warn!(interval_ms = self.collection_interval.as_millis() as u64, "tick_exceeded_interval_starting_next_immediately"),
            }
        }

        info!("shutting_down");
        if log_pump_handle.join().is_err() {
            error!("log_pump_thread_panicked");
        }
    }

    fn spawn_log_pump(&self, stop: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
        let path = self.log_path.clone();
        let buffer = self.buffer.clone();
        let breaker = self.breaker.clone();
        let sender = HttpSender::new(
            self.sender_listener_url(),
            self.sender_api_key(),
            self.sender_timeout(),
        );
        let project_id = self.project_id.clone();

        std::thread::spawn(move || {
            let mut pump = LogPump::new(path);
            pump.run(
                || stop.load(Ordering::SeqCst),
                move |entries, reason| {
                    debug!(count = entries.len(), reason = ?reason, "flushing_log_batch");
                    let record = log::build_log_record(entries);
                    let envelope = envelope::build(record, &project_id);
                    sender.send(&envelope, &breaker, &buffer);
                },
            );
        })
    }

    // The fields needed to build a second sender for the log-pump thread;
    // HttpSender holds no shared state, so a fresh instance per thread is
    // cheap and avoids needing Sync on reqwest::blocking::Client across an
    // artificial boundary.
    fn sender_listener_url(&self) -> String {
        self.sender.listener_url().to_string()
    }
    fn sender_api_key(&self) -> String {
        self.sender.api_key().to_string()
    }
    fn sender_timeout(&self) -> Duration {
        self.sender.timeout()
    }

    fn run_tick(&mut self) {
        let results = collector::collect_tick(&self.pool, &self.statements_state, &mut self.host_state);

        if let Some(e) = results.activity_error {
            error!(error = %e, "active_session_sampling_failed");
        }
        self.send_if_present(results.activity);
        self.send_if_present(results.statements);
        self.send_record(results.locks);
        self.send_record(results.system_metrics);

        self.flush_buffer_if_closed();
    }

    fn send_if_present(&self, record: Option<Record>) {
        if let Some(record) = record {
            self.send_record(record);
        }
    }

    fn send_record(&self, record: Record) {
        let envelope: Envelope = envelope::build(record, &self.project_id);
        self.sender.send(&envelope, &self.breaker, &self.buffer);
    }

    fn flush_buffer_if_closed(&self) {
        if self.breaker.is_open() {
            return;
        }
        let size = match self.buffer.size() {
            Ok(size) => size,
            Err(e) => {
                warn!(error = %e, "buffer_size_check_failed");
                return;
            }
        };
        if size.count == 0 {
            return;
        }

        info!(items = size.count.min(FLUSH_BATCH_SIZE as u64), "flushing_buffer");
        let mut sent = 0usize;
        for _ in 0..FLUSH_BATCH_SIZE {
            if self.breaker.is_open() {
                warn!("flush_stopped_circuit_open");
                break;
            }
            let entry = match self.buffer.get() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "buffer_get_failed");
                    break;
                }
            };

            match self.resend_raw(&entry.payload) {
                Ok(()) => sent += 1,
                Err(()) => {
                    if let Err(e) = self.buffer.requeue(&entry.payload) {
                        warn!(error = %e, "buffer_requeue_failed");
                    }
                    break;
                }
            }
        }
        info!(sent, "buffer_flush_complete");
    }

    fn resend_raw(&self, payload: &[u8]) -> Result<(), ()> {
        use crate::breaker::CallOutcome;
        let outcome = self.breaker.call(|| self.sender.post_raw(payload));
        match outcome {
            CallOutcome::Ok(()) => Ok(()),
            CallOutcome::CircuitOpen | CallOutcome::Failed(_) => Err(()),
        }
    }

    fn sleep_interruptible(&self, stop: &Arc<AtomicBool>, mut remaining: Duration) {
        while remaining > Duration::ZERO && !stop.load(Ordering::SeqCst) {
            let step = remaining.min(STOP_CHECK_INTERVAL);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }
}

/// Pure tick-pacing rule: `Some(interval - elapsed)` when the tick finished
/// inside the interval, `None` when it ran over (caller should start the
/// next tick immediately, no accumulated catch-up sleep).
fn next_sleep(interval: Duration, elapsed: Duration) -> Option<Duration> {
    if elapsed >= interval { None } else { Some(interval - elapsed) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_sleep_waits_remaining_time_when_tick_is_fast() {
        let sleep = next_sleep(Duration::from_secs(60), Duration::from_secs(5));
        assert_eq!(sleep, Some(Duration::from_secs(55)));
    }

    #[test]
    fn next_sleep_is_none_when_tick_exactly_fills_interval() {
        assert_eq!(next_sleep(Duration::from_secs(60), Duration::from_secs(60)), None);
    }

    #[test]
    fn next_sleep_is_none_when_tick_overruns_interval() {
        assert_eq!(next_sleep(Duration::from_secs(60), Duration::from_secs(90)), None);
    }
}
