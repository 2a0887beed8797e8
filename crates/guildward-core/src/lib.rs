//! # Guildward Core
//!
//! Shared foundation for the Guildward moderation bot: domain types,
//! configuration, the error type, and the traits that mark the seams to
//! external collaborators (the task store and the chat platform).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::GuildwardConfig;
pub use error::{GuildwardError, Result};
pub use traits::{GatewayEvent, Messenger, StoreEvent, TaskStore};
pub use types::{GuildInfo, KnownServer, RecurringMessage, RecurringTask, Weekday};
