// src/trigger/mod.rs

//! Time and dependency triggers.

pub mod cron;
pub mod manager;

pub use manager::{TimerEntry, TriggerManager};
