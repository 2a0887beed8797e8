//! # Guildward Store
//!
//! SQLite-backed implementation of the task store gateway. Holds the
//! recurring message/task definitions, the known-server mirror, and the
//! moderation rows that hang off a server (keyword rules, emoji allow-list).
//!
//! Every recurring-task write emits a [`StoreEvent`] on a broadcast channel
//! so the reconciler can react without polling.
//!
//! [`StoreEvent`]: guildward_core::StoreEvent

mod sqlite;

pub use sqlite::{KeywordRule, SqliteStore};
