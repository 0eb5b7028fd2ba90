//! Core library for the PostgreSQL resident monitoring agent: connection
//! pooling, sampling, log tailing, transport, and the scheduler that ties
//! them together. The `agentd` binary crate is a thin CLI/signal wrapper
//! around this library.

pub mod breaker;
pub mod buffer;
pub mod collector;
pub mod config;
pub mod envelope;
pub mod error;
pub mod log;
pub mod model;
pub mod pool;
pub mod scheduler;
pub mod sender;

pub use config::Config;
pub use error::AgentError;
pub use scheduler::Scheduler;
