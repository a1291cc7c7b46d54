// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::types::TaskId;

#[derive(Error, Debug)]
pub enum WardenError {
    /// Malformed task, collection or configuration definition.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task {0} already exists")]
    DuplicateTask(TaskId),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Collection {0} is disabled")]
    CollectionDisabled(String),

    /// Invalid working directory (or similar) discovered at spawn time.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid run transition: {0}")]
    InvalidTransition(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("scheduler control loop is not running")]
    ChannelClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WardenError {
    /// Short machine-readable kind, used in log records and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            WardenError::Validation(_) => "validation",
            WardenError::DuplicateTask(_) => "duplicate_task",
            WardenError::NotFound(_) => "not_found",
            WardenError::CollectionDisabled(_) => "collection_disabled",
            WardenError::Configuration(_) => "configuration",
            WardenError::InvalidTransition(_) => "invalid_transition",
            WardenError::Io(_) => "io",
            WardenError::Json(_) => "json",
            WardenError::Toml(_) => "toml",
            WardenError::ChannelClosed => "channel_closed",
            WardenError::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
