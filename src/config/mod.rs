// src/config/mod.rs

//! Daemon configuration.
//!
//! - [`model`] defines the TOML-backed data model.
//! - [`loader`] finds and reads the config file.
//! - [`validate`] checks invariants and applies runtime `key=value` updates.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, resolve_config};
pub use model::{Config, LogConfig, RawConfig};
pub use validate::validate_config;
