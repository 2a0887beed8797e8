//! Collaborator traits — the seams between the reconciliation core and the
//! outside world (persistent store, chat platform).
//!
//! Both traits are object-safe so the scheduler can hold `Arc<dyn ...>` and
//! tests can substitute in-memory fakes.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::{GuildInfo, KnownServer, RecurringMessage, RecurringTask};

/// Change notification emitted from the store's write path.
///
/// Emitted explicitly by every recurring-task create/update/delete so the
/// reconciler can subscribe instead of relying on implicit side effects in
/// the data layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The set of recurring task definitions changed.
    TasksChanged,
}

/// Events surfaced by the chat-platform connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Connection established and guild cache populated.
    Ready,
    /// The bot joined a guild.
    GuildJoined { id: String, name: String },
    /// The bot left (or was removed from) a guild.
    GuildLeft { id: String },
}

/// Repository-style access to persisted task and server records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list_recurring_tasks(&self) -> Result<Vec<RecurringTask>>;

    /// Fetch a message definition by id. `Ok(None)` when it was deleted
    /// after the referencing job was scheduled.
    async fn get_recurring_message(&self, id: &str) -> Result<Option<RecurringMessage>>;

    async fn list_known_servers(&self) -> Result<Vec<KnownServer>>;

    async fn insert_known_server(&self, id: &str, name: &str) -> Result<()>;

    async fn update_known_server(&self, id: &str, name: &str) -> Result<()>;

    /// Delete a known server. Dependent rows (keyword rules, emoji
    /// allow-list entries) are removed with it.
    async fn delete_known_server(&self, id: &str) -> Result<()>;

    /// Subscribe to change notifications from the write path.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// Outbound messaging and live platform state.
///
/// Guild membership is answered from the connection's own cache; this trait
/// never blocks on a gateway round trip for `current_guilds`.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Guilds the bot currently belongs to, with display names.
    async fn current_guilds(&self) -> Result<Vec<GuildInfo>>;

    /// All text-capable channel ids currently cached.
    async fn text_channels(&self) -> Result<Vec<String>>;

    /// Best-effort fetch of the most recent `limit` messages in a channel,
    /// to warm downstream caches.
    async fn warm_history(&self, channel_id: &str, limit: usize) -> Result<()>;

    /// Send a plain text message.
    async fn send_text(&self, channel_id: &str, text: &str) -> Result<()>;

    /// Send a rich embed with the given description and color.
    async fn send_embed(&self, channel_id: &str, description: &str, color: u32) -> Result<()>;

    /// Subscribe to connection events (ready, guild join/leave).
    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent>;
}
