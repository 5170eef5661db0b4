//! Error types for the adaptive quality controller.
//!
//! This module defines custom error enums for each component,
//! providing descriptive error messages with context information.
//! None of these escape the controller's public operations: probe failures
//! degrade to conservative defaults and misuse is logged, not returned.

use thiserror::Error;

/// Errors raised while detecting rendering capability.
///
/// Only used internally by probe implementations; `CapabilityProbe::probe`
/// always returns a snapshot.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("No render node available under '{path}': {source}")]
    RenderNodeUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to query physical memory: {0}")]
    MemoryQueryFailed(String),

    #[error("Failed to query logical core count: {0}")]
    CoreQueryFailed(#[from] std::io::Error),
}

/// Errors related to IPC server operations.
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Failed to bind socket at '{path}': {source}")]
    SocketBindFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid command received: {0}")]
    InvalidCommand(String),

    #[error("Failed to serialize response: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors related to configuration management.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at '{0}'")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to write configuration: {0}")]
    WriteError(#[from] std::io::Error),
}

/// Errors related to logging initialization.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Could not determine a local data directory for logs")]
    DataDirectoryNotFound,

    #[error("Failed to create log directory '{path}': {source}")]
    DirectoryCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create log file appender: {0}")]
    AppenderCreationFailed(String),
}

/// Top-level errors surfaced by the daemon binary.
#[derive(Error, Debug)]
pub enum QualityError {
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),
}
