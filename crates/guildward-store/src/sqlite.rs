//! SQLite persistence for recurring messages/tasks and known servers.
//! Survives restarts, supports the admin interface and the reconciler
//! reading the same database file.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use guildward_core::error::{GuildwardError, Result};
use guildward_core::traits::{StoreEvent, TaskStore};
use guildward_core::types::{KnownServer, RecurringMessage, RecurringTask, Weekday};

/// A keyword moderation rule attached to a known server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordRule {
    pub id: i64,
    pub server_id: String,
    pub pattern: String,
    pub response: String,
}

/// SQLite-backed store gateway.
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
    events: broadcast::Sender<StoreEvent>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| GuildwardError::Store(format!("DB open: {e}")))?;
        let (events, _) = broadcast::channel(16);
        let store = Self {
            conn: Mutex::new(conn),
            events,
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| GuildwardError::Store(format!("DB open: {e}")))?;
        let (events, _) = broadcast::channel(16);
        let store = Self {
            conn: Mutex::new(conn),
            events,
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap()
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                "
            PRAGMA foreign_keys = ON;

            -- Message payloads dispatched by recurring tasks
            CREATE TABLE IF NOT EXISTS recurring_messages (
                id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                content TEXT NOT NULL,
                as_embed INTEGER NOT NULL DEFAULT 0,
                embed_color INTEGER,
                created_at TEXT NOT NULL
            );

            -- Recurring schedules (all times UTC)
            CREATE TABLE IF NOT EXISTS recurring_tasks (
                id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL REFERENCES recurring_messages(id) ON DELETE CASCADE,
                weekday TEXT NOT NULL,           -- 'SUN'..'SAT' or '*'
                hour INTEGER NOT NULL,
                minute INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Mirror of live guild membership
            CREATE TABLE IF NOT EXISTS known_servers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );

            -- Moderation rows that hang off a server
            CREATE TABLE IF NOT EXISTS keyword_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                server_id TEXT NOT NULL REFERENCES known_servers(id) ON DELETE CASCADE,
                pattern TEXT NOT NULL,
                response TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS emoji_allowlist (
                server_id TEXT NOT NULL REFERENCES known_servers(id) ON DELETE CASCADE,
                emoji TEXT NOT NULL,
                PRIMARY KEY (server_id, emoji)
            );
         ",
            )
            .map_err(|e| GuildwardError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn emit(&self, event: StoreEvent) {
        // Nobody subscribed yet is fine.
        let _ = self.events.send(event);
    }

    // ─── Recurring Messages ──────────────────────────────────

    /// Insert a new message definition, returning its generated id.
    pub fn insert_recurring_message(
        &self,
        channel_id: &str,
        content: &str,
        as_embed: bool,
        embed_color: Option<u32>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn()
            .execute(
                "INSERT INTO recurring_messages (id, channel_id, content, as_embed, embed_color, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id,
                    channel_id,
                    content,
                    as_embed as i32,
                    embed_color,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| GuildwardError::Store(format!("Insert message: {e}")))?;
        Ok(id)
    }

    /// Update an existing message definition. Running jobs pick the new
    /// values up on their next fire without re-registration.
    pub fn update_recurring_message(&self, message: &RecurringMessage) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE recurring_messages
                 SET channel_id = ?2, content = ?3, as_embed = ?4, embed_color = ?5
                 WHERE id = ?1",
                rusqlite::params![
                    message.id,
                    message.channel_id,
                    message.content,
                    message.as_embed as i32,
                    message.embed_color,
                ],
            )
            .map_err(|e| GuildwardError::Store(format!("Update message: {e}")))?;
        Ok(())
    }

    /// Delete a message definition. Tasks referencing it are removed by the
    /// cascade, so this also counts as a task change.
    pub fn delete_recurring_message(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM recurring_messages WHERE id = ?1", [id])
            .map_err(|e| GuildwardError::Store(format!("Delete message: {e}")))?;
        self.emit(StoreEvent::TasksChanged);
        Ok(())
    }

    fn fetch_recurring_message(&self, id: &str) -> Result<Option<RecurringMessage>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, channel_id, content, as_embed, embed_color
                 FROM recurring_messages WHERE id = ?1",
            )
            .map_err(|e| GuildwardError::Store(format!("Get message: {e}")))?;
        let mut rows = stmt
            .query_map([id], |row| {
                Ok(RecurringMessage {
                    id: row.get(0)?,
                    channel_id: row.get(1)?,
                    content: row.get(2)?,
                    as_embed: row.get::<_, i32>(3)? != 0,
                    embed_color: row.get(4)?,
                })
            })
            .map_err(|e| GuildwardError::Store(format!("Get message: {e}")))?;
        match rows.next() {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(GuildwardError::Store(format!("Get message: {e}"))),
            None => Ok(None),
        }
    }

    // ─── Recurring Tasks ─────────────────────────────────────

    /// Insert a new recurring task, returning its generated id.
    pub fn insert_recurring_task(
        &self,
        message_id: &str,
        weekday: Weekday,
        hour: u8,
        minute: u8,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn()
            .execute(
                "INSERT INTO recurring_tasks (id, message_id, weekday, hour, minute, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id,
                    message_id,
                    weekday.as_symbol(),
                    hour,
                    minute,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| GuildwardError::Store(format!("Insert task: {e}")))?;
        self.emit(StoreEvent::TasksChanged);
        Ok(id)
    }

    /// Update a recurring task's schedule.
    pub fn update_recurring_task(&self, task: &RecurringTask) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE recurring_tasks
                 SET message_id = ?2, weekday = ?3, hour = ?4, minute = ?5
                 WHERE id = ?1",
                rusqlite::params![
                    task.id,
                    task.message_id,
                    task.weekday.as_symbol(),
                    task.hour,
                    task.minute,
                ],
            )
            .map_err(|e| GuildwardError::Store(format!("Update task: {e}")))?;
        self.emit(StoreEvent::TasksChanged);
        Ok(())
    }

    /// Delete a recurring task.
    pub fn delete_recurring_task(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM recurring_tasks WHERE id = ?1", [id])
            .map_err(|e| GuildwardError::Store(format!("Delete task: {e}")))?;
        self.emit(StoreEvent::TasksChanged);
        Ok(())
    }

    fn fetch_recurring_tasks(&self) -> Result<Vec<RecurringTask>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, message_id, weekday, hour, minute
                 FROM recurring_tasks ORDER BY created_at",
            )
            .map_err(|e| GuildwardError::Store(format!("List tasks: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u8>(3)?,
                    row.get::<_, u8>(4)?,
                ))
            })
            .map_err(|e| GuildwardError::Store(format!("List tasks: {e}")))?;

        let mut tasks = Vec::new();
        for row in rows {
            let (id, message_id, weekday_str, hour, minute) =
                row.map_err(|e| GuildwardError::Store(format!("List tasks: {e}")))?;
            let Some(weekday) = Weekday::from_symbol(&weekday_str) else {
                tracing::warn!("Task {id} has unknown weekday '{weekday_str}', skipping");
                continue;
            };
            tasks.push(RecurringTask {
                id,
                message_id,
                weekday,
                hour,
                minute,
            });
        }
        Ok(tasks)
    }

    // ─── Known Servers ───────────────────────────────────────

    fn fetch_known_servers(&self) -> Result<Vec<KnownServer>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, name FROM known_servers ORDER BY id")
            .map_err(|e| GuildwardError::Store(format!("List servers: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(KnownServer {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(|e| GuildwardError::Store(format!("List servers: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| GuildwardError::Store(format!("List servers: {e}")))
    }

    // ─── Keyword Rules / Emoji Allow-list ────────────────────

    /// Add a keyword rule for a server.
    pub fn add_keyword_rule(&self, server_id: &str, pattern: &str, response: &str) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO keyword_rules (server_id, pattern, response) VALUES (?1, ?2, ?3)",
            rusqlite::params![server_id, pattern, response],
        )
        .map_err(|e| GuildwardError::Store(format!("Add keyword rule: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    /// List keyword rules for a server.
    pub fn list_keyword_rules(&self, server_id: &str) -> Result<Vec<KeywordRule>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, server_id, pattern, response FROM keyword_rules
                 WHERE server_id = ?1 ORDER BY id",
            )
            .map_err(|e| GuildwardError::Store(format!("List keyword rules: {e}")))?;
        let rows = stmt
            .query_map([server_id], |row| {
                Ok(KeywordRule {
                    id: row.get(0)?,
                    server_id: row.get(1)?,
                    pattern: row.get(2)?,
                    response: row.get(3)?,
                })
            })
            .map_err(|e| GuildwardError::Store(format!("List keyword rules: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| GuildwardError::Store(format!("List keyword rules: {e}")))
    }

    /// Remove a keyword rule by id.
    pub fn remove_keyword_rule(&self, id: i64) -> Result<()> {
        self.conn()
            .execute("DELETE FROM keyword_rules WHERE id = ?1", [id])
            .map_err(|e| GuildwardError::Store(format!("Remove keyword rule: {e}")))?;
        Ok(())
    }

    /// Allow an emoji on a server. Idempotent.
    pub fn allow_emoji(&self, server_id: &str, emoji: &str) -> Result<()> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO emoji_allowlist (server_id, emoji) VALUES (?1, ?2)",
                rusqlite::params![server_id, emoji],
            )
            .map_err(|e| GuildwardError::Store(format!("Allow emoji: {e}")))?;
        Ok(())
    }

    /// List allowed emoji for a server.
    pub fn list_allowed_emoji(&self, server_id: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT emoji FROM emoji_allowlist WHERE server_id = ?1 ORDER BY emoji")
            .map_err(|e| GuildwardError::Store(format!("List emoji: {e}")))?;
        let rows = stmt
            .query_map([server_id], |row| row.get::<_, String>(0))
            .map_err(|e| GuildwardError::Store(format!("List emoji: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| GuildwardError::Store(format!("List emoji: {e}")))
    }

    /// Remove an emoji from a server's allow-list.
    pub fn disallow_emoji(&self, server_id: &str, emoji: &str) -> Result<()> {
        self.conn()
            .execute(
                "DELETE FROM emoji_allowlist WHERE server_id = ?1 AND emoji = ?2",
                rusqlite::params![server_id, emoji],
            )
            .map_err(|e| GuildwardError::Store(format!("Disallow emoji: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn list_recurring_tasks(&self) -> Result<Vec<RecurringTask>> {
        self.fetch_recurring_tasks()
    }

    async fn get_recurring_message(&self, id: &str) -> Result<Option<RecurringMessage>> {
        self.fetch_recurring_message(id)
    }

    async fn list_known_servers(&self) -> Result<Vec<KnownServer>> {
        self.fetch_known_servers()
    }

    async fn insert_known_server(&self, id: &str, name: &str) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO known_servers (id, name) VALUES (?1, ?2)",
                rusqlite::params![id, name],
            )
            .map_err(|e| GuildwardError::Store(format!("Insert server: {e}")))?;
        Ok(())
    }

    async fn update_known_server(&self, id: &str, name: &str) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE known_servers SET name = ?2 WHERE id = ?1",
                rusqlite::params![id, name],
            )
            .map_err(|e| GuildwardError::Store(format!("Update server: {e}")))?;
        Ok(())
    }

    async fn delete_known_server(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM known_servers WHERE id = ?1", [id])
            .map_err(|e| GuildwardError::Store(format!("Delete server: {e}")))?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
