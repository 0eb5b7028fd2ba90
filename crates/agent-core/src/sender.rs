//! HTTP sender: single-payload POST gated by the circuit breaker, with
//! buffering fallback on any failure.

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, warn};

use crate::breaker::{CallOutcome, CircuitBreaker};
use crate::buffer::PersistentBuffer;
use crate::envelope::Envelope;

/// Outcome of a single `send` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Buffered,
}

pub struct HttpSender {
    client: Client,
    listener_url: String,
    api_key: String,
    timeout: std::time::Duration,
}

impl HttpSender {
    pub fn new(listener_url: String, api_key: String, timeout: std::time::Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().expect("reqwest client builds");
        Self { client, listener_url, api_key, timeout }
    }

    pub fn listener_url(&self) -> &str {
        &self.listener_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn timeout(&self) -> std::time::Duration {
        self.timeout
    }

    /// Post a pre-serialized payload directly, bypassing envelope
    /// construction — used to resend raw bytes already read back out of
    /// the persistent buffer.
    pub fn post_raw(&self, payload: &[u8]) -> Result<(), String> {
        self.post(payload)
    }

    /// Send one envelope. If the breaker is open, or the POST fails or
    /// returns non-2xx, the envelope is enqueued into `buffer` and
    /// `Buffered` is returned; the breaker is notified either way.
    pub fn send(&self, envelope: &Envelope, breaker: &CircuitBreaker, buffer: &PersistentBuffer) -> SendOutcome {
        let payload = match serde_json::to_vec(envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "envelope_serialization_failed");
                return SendOutcome::Buffered;
            }
        };

        let outcome = breaker.call(|| self.post(&payload));

        match outcome {
            CallOutcome::Ok(()) => {
                debug!(source = %envelope.source, "data_sent_to_listener");
                SendOutcome::Sent
            }
            CallOutcome::CircuitOpen => {
                warn!(source = %envelope.source, "circuit_open_buffering");
                self.buffer_or_log(buffer, &payload);
                SendOutcome::Buffered
            }
            CallOutcome::Failed(e) => {
                warn!(source = %envelope.source, error = %e, "listener_request_failed_buffering");
                self.buffer_or_log(buffer, &payload);
                SendOutcome::Buffered
            }
        }
    }

    /// Send up to `envelopes.len()` items, stopping early (and buffering
    /// the rest without a network attempt) the moment the breaker opens
    /// mid-batch. Returns `(sent_count, buffered_count)`.
    pub fn send_batch(
        &self,
        envelopes: &[Envelope],
        breaker: &CircuitBreaker,
        buffer: &PersistentBuffer,
    ) -> (usize, usize) {
        let mut sent = 0;
        let mut buffered = 0;

        for (i, envelope) in envelopes.iter().enumerate() {
            if breaker.is_open() {
                for remaining in &envelopes[i..] {
                    if let Ok(bytes) = serde_json::to_vec(remaining) {
                        self.buffer_or_log(buffer, &bytes);
                    }
                    buffered += 1;
                }
                break;
            }

            match self.send(envelope, breaker, buffer) {
                SendOutcome::Sent => sent += 1,
                SendOutcome::Buffered => buffered += 1,
            }
        }

        (sent, buffered)
    }

    fn post(&self, payload: &[u8]) -> Result<(), String> {
        let response = self
            .client
            .post(&self.listener_url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .map_err(|e| e.to_string())?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("listener returned status {}", response.status()))
        }
    }

    fn buffer_or_log(&self, buffer: &PersistentBuffer, payload: &[u8]) {
        if let Err(e) = buffer.put(payload) {
            warn!(error = %e, "buffer_put_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Record, Source};
    use serde_json::Map;
    use std::time::Duration;

    fn test_buffer() -> (PersistentBuffer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let buffer = PersistentBuffer::open(&dir.path().join("buf.sqlite"), 10).unwrap();
        (buffer, dir)
    }

    #[test]
    fn open_breaker_buffers_without_network_attempt() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        assert!(matches!(breaker.call(|| Err::<(), _>("boom")), CallOutcome::Failed(_)));
        assert!(breaker.is_open());

        let (buffer, _dir) = test_buffer();
        let sender = HttpSender::new("http://127.0.0.1:1/unused".to_string(), "key".to_string(), Duration::from_millis(100));
        let envelope = crate::envelope::build(Record::new(Source::PgLocks, Map::new()), "proj");

        let outcome = sender.send(&envelope, &breaker, &buffer);
        assert_eq!(outcome, SendOutcome::Buffered);
        assert_eq!(buffer.size().unwrap().count, 1);
    }

    #[test]
    fn unreachable_listener_buffers_and_notifies_breaker() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
        let (buffer, _dir) = test_buffer();
        let sender =
            HttpSender::new("http://127.0.0.1:1/nowhere".to_string(), "key".to_string(), Duration::from_millis(200));
        let envelope = crate::envelope::build(Record::new(Source::SystemMetrics, Map::new()), "proj");

        let outcome = sender.send(&envelope, &breaker, &buffer);
        assert_eq!(outcome, SendOutcome::Buffered);
        assert_eq!(buffer.size().unwrap().count, 1);
    }
}
