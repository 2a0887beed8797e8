//! Guildward error types.

use thiserror::Error;

/// All errors produced by Guildward crates.
#[derive(Debug, Error)]
pub enum GuildwardError {
    /// Configuration loading/parsing failure.
    #[error("Config error: {0}")]
    Config(String),

    /// Persistent store failure (open, migrate, read, write).
    #[error("Store error: {0}")]
    Store(String),

    /// Chat-platform API failure (REST call, send, fetch).
    #[error("Channel error: {0}")]
    Channel(String),

    /// A task definition that cannot be compiled into a trigger.
    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias used across all Guildward crates.
pub type Result<T> = std::result::Result<T, GuildwardError>;
