// src/exec/mod.rs

//! Process execution layer.
//!
//! Runs the commands of started runs with `tokio::process::Command` and
//! reports back to the runtime via `RuntimeEvent`s.
//!
//! - [`worker`] runs one process and streams its output into the log.
//! - [`backend`] provides the `ExecutorBackend` trait and the
//!   `RealExecutorBackend` used in production, which tests replace with a
//!   fake implementation.

pub mod backend;
pub mod worker;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use worker::run_worker;
