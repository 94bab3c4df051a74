//! convoy-core
//!
//! Orchestration engine for a repository of example applications:
//! discovery, isolated validation, a durable task graph, recurring health
//! checks, and a bounded dispatcher tying them together.
//!
//! # Module map
//! - **domain**: ids, task records and their state machine, app
//!   descriptors, health records, outcomes, alert events
//! - **ports**: seams to time, id generation, probing, sinks, and the
//!   task store
//! - **store**: in-memory task store with an optional JSON snapshot
//! - **registry**: app discovery over the scan roots
//! - **runner**: per-app validation (resolve + test, bounded, isolated)
//! - **followup**: deployment follow-up expansion (smoke, health check,
//!   conditional rollback)
//! - **health**: tick-driven health scheduler
//! - **dispatch**: retry policy, executor registry, worker group

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod followup;
pub mod health;
pub mod ports;
pub mod registry;
pub mod runner;
pub mod store;

pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
