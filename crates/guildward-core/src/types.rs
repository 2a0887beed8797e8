//! Domain types shared across Guildward crates.
//!
//! Ids are Discord snowflakes carried as strings — they are opaque to this
//! core and only ever compared or passed back to the platform API.

use serde::{Deserialize, Serialize};

/// A message definition dispatched by recurring tasks.
///
/// Always re-read from the store at fire time so edits made after a job is
/// scheduled take effect on the next fire without re-registering the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringMessage {
    /// Unique message id.
    pub id: String,
    /// Target channel id on the chat platform.
    pub channel_id: String,
    /// Body text (plain content, or embed description when `as_embed`).
    pub content: String,
    /// Send as a rich embed instead of plain text.
    pub as_embed: bool,
    /// Embed color; `None` falls back to the default amber.
    pub embed_color: Option<u32>,
}

/// A recurring schedule bound to a message definition.
///
/// Hour and minute are UTC. Values are trusted as pre-validated by the
/// storage layer; the schedule compiler rejects out-of-range fields as a
/// per-task error rather than re-validating semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringTask {
    /// Unique task id.
    pub id: String,
    /// Foreign reference to a [`RecurringMessage`].
    pub message_id: String,
    /// Day-of-week specifier, or every day.
    pub weekday: Weekday,
    /// Hour of day, 0–23 UTC.
    pub hour: u8,
    /// Minute of hour, 0–59 UTC.
    pub minute: u8,
}

/// Day-of-week specifier for a recurring task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weekday {
    Sun,
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    /// Every day (cron wildcard).
    Every,
}

impl Weekday {
    /// Three-letter cron symbol, or `*` for every day.
    pub fn as_symbol(&self) -> &'static str {
        match self {
            Weekday::Sun => "SUN",
            Weekday::Mon => "MON",
            Weekday::Tue => "TUE",
            Weekday::Wed => "WED",
            Weekday::Thu => "THU",
            Weekday::Fri => "FRI",
            Weekday::Sat => "SAT",
            Weekday::Every => "*",
        }
    }

    /// Parse the stored symbol back into a weekday.
    pub fn from_symbol(s: &str) -> Option<Self> {
        match s {
            "SUN" => Some(Weekday::Sun),
            "MON" => Some(Weekday::Mon),
            "TUE" => Some(Weekday::Tue),
            "WED" => Some(Weekday::Wed),
            "THU" => Some(Weekday::Thu),
            "FRI" => Some(Weekday::Fri),
            "SAT" => Some(Weekday::Sat),
            "*" => Some(Weekday::Every),
            _ => None,
        }
    }

    /// chrono weekday number, Sunday = 0. `None` for the wildcard.
    pub fn number_from_sunday(&self) -> Option<u32> {
        match self {
            Weekday::Sun => Some(0),
            Weekday::Mon => Some(1),
            Weekday::Tue => Some(2),
            Weekday::Wed => Some(3),
            Weekday::Thu => Some(4),
            Weekday::Fri => Some(5),
            Weekday::Sat => Some(6),
            Weekday::Every => None,
        }
    }
}

/// A guild the bot has recorded in its store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownServer {
    /// Platform guild id.
    pub id: String,
    /// Display name as of the last reconciliation.
    pub name: String,
}

/// A guild the bot is currently a member of, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildInfo {
    pub id: String,
    pub name: String,
}
