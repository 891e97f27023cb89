//! Error types for buildsock-core operations.
//!
//! Every error here is recovered at the project boundary except
//! `ConfigError`, which only occurs at startup.

use std::path::PathBuf;

/// A filesystem watch could not be established for a project root.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Project root does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("Failed to watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Delivering one message to the consumer socket failed.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write message: {0}")]
    Write(#[source] std::io::Error),

    #[error("Failed to close connection: {0}")]
    Close(#[source] std::io::Error),
}

/// The pluggable build step failed internally (not "the build found issues").
#[derive(Debug, thiserror::Error)]
pub enum BuildStepError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to scan {path}: {details}")]
    Scan { path: PathBuf, details: String },

    #[error("Invalid artifact pattern {pattern}: {details}")]
    Pattern { pattern: String, details: String },

    #[error("Build step panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration file malformed: {path}: {details}")]
    Malformed { path: PathBuf, details: String },

    #[error("Invalid project root {path}: {reason}")]
    InvalidProjectRoot { path: PathBuf, reason: String },
}
