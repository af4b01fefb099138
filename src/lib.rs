// src/lib.rs
//! acc-runner: cron-driven SQL job scheduling and execution engine.
//!
//! Operators register named SQL jobs, each bound to a target database and a
//! six-field (seconds-first) cron expression. A minute-granularity scheduling
//! loop evaluates every active job against the tick instant and runs the
//! matches; every run leaves an auditable execution record. Manual triggers
//! share the exact same run path.
//!
//! The embedding layer (dashboard, CRUD endpoints) talks to the engine
//! through [`Engine`]: `run_job_by_id`, `list_recent_history`,
//! `list_history_for_job`.

pub mod config;
pub mod cron;
pub mod datasource;
pub mod domain;
pub mod engine;
pub mod error;
pub mod executor;
pub mod runner;
pub mod scheduler;
pub mod store;

pub use config::{DataSourceDef, EngineConfig, OverlapPolicy};
pub use cron::Schedule;
pub use datasource::DataSourceRegistry;
pub use domain::{ExecutionRecord, ExecutionStatus, JobDefinition, MESSAGE_CAP};
pub use engine::Engine;
pub use error::EngineError;
pub use executor::{QueryExecutor, QueryOutcome, SqlExecutor};
pub use runner::JobRunner;
pub use scheduler::Scheduler;
pub use store::{HistoryStore, JobStore, SqlHistoryStore, SqlJobStore};
