//! Discord channel — REST API client plus a membership polling loop.
//!
//! The polling loop keeps an in-memory guild/channel cache and turns
//! membership diffs into [`GatewayEvent`]s, so the reconciler never has to
//! talk to the platform API directly for "what guilds am I in".

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{RwLock, broadcast};

use guildward_core::config::DiscordConfig;
use guildward_core::error::{GuildwardError, Result};
use guildward_core::traits::{GatewayEvent, Messenger};
use guildward_core::types::GuildInfo;

const API_BASE: &str = "https://discord.com/api/v10";
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Discord REST channel with guild-membership polling.
pub struct DiscordChannel {
    config: DiscordConfig,
    client: reqwest::Client,
    guilds: RwLock<Vec<GuildInfo>>,
    channels: RwLock<Vec<String>>,
    events: broadcast::Sender<GatewayEvent>,
}

impl DiscordChannel {
    pub fn new(config: DiscordConfig) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            config,
            client: reqwest::Client::new(),
            guilds: RwLock::new(Vec::new()),
            channels: RwLock::new(Vec::new()),
            events,
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{API_BASE}{path}")
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.config.bot_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .client
            .get(self.api_url(path))
            .header("Authorization", self.auth_header())
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| GuildwardError::Channel(format!("GET {path} failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GuildwardError::Channel(format!(
                "Discord API error {status} on {path}: {body}"
            )));
        }
        resp.json()
            .await
            .map_err(|e| GuildwardError::Channel(format!("Invalid response from {path}: {e}")))
    }

    async fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<()> {
        let resp = self
            .client
            .post(self.api_url(path))
            .header("Authorization", self.auth_header())
            .json(body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| GuildwardError::Channel(format!("POST {path} failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(GuildwardError::Channel(format!(
                "Discord API error {status} on {path}: {text}"
            )));
        }
        Ok(())
    }

    /// Verify the token and log the bot identity.
    pub async fn connect(&self) -> Result<()> {
        let me: DiscordUser = self.get_json("/users/@me").await?;
        tracing::info!("Discord bot: {} ({})", me.username, me.id);
        Ok(())
    }

    async fn fetch_guilds(&self) -> Result<Vec<GuildInfo>> {
        let guilds: Vec<DiscordGuild> = self.get_json("/users/@me/guilds").await?;
        Ok(guilds
            .into_iter()
            .map(|g| GuildInfo {
                id: g.id,
                name: g.name,
            })
            .collect())
    }

    async fn fetch_text_channels(&self, guild_id: &str) -> Result<Vec<String>> {
        let channels: Vec<DiscordApiChannel> =
            self.get_json(&format!("/guilds/{guild_id}/channels")).await?;
        Ok(channels
            .into_iter()
            .filter(|c| is_text_capable(c.kind))
            .map(|c| c.id)
            .collect())
    }

    /// Refresh the guild and channel caches, returning the new guild set.
    async fn refresh_cache(&self) -> Result<Vec<GuildInfo>> {
        let guilds = self.fetch_guilds().await?;
        let mut channels = Vec::new();
        for guild in &guilds {
            match self.fetch_text_channels(&guild.id).await {
                Ok(mut list) => channels.append(&mut list),
                Err(e) => tracing::warn!("Channel list for guild {} failed: {e}", guild.id),
            }
        }
        *self.guilds.write().await = guilds.clone();
        *self.channels.write().await = channels;
        Ok(guilds)
    }

    /// Start the membership polling loop.
    ///
    /// Emits `Ready` once the caches are first populated, then
    /// `GuildJoined`/`GuildLeft` for every membership diff observed.
    pub fn start_polling(self: Arc<Self>) {
        let channel = self;
        tokio::spawn(async move {
            tracing::info!(
                "Discord membership polling started (every {}s)",
                channel.config.poll_interval
            );
            let mut known: Option<Vec<GuildInfo>> = None;

            loop {
                match channel.refresh_cache().await {
                    Ok(current) => {
                        match &known {
                            None => {
                                let _ = channel.events.send(GatewayEvent::Ready);
                            }
                            Some(previous) => {
                                for guild in &current {
                                    if !previous.iter().any(|g| g.id == guild.id) {
                                        let _ = channel.events.send(GatewayEvent::GuildJoined {
                                            id: guild.id.clone(),
                                            name: guild.name.clone(),
                                        });
                                    }
                                }
                                for guild in previous {
                                    if !current.iter().any(|g| g.id == guild.id) {
                                        let _ = channel.events.send(GatewayEvent::GuildLeft {
                                            id: guild.id.clone(),
                                        });
                                    }
                                }
                            }
                        }
                        known = Some(current);
                    }
                    Err(e) => {
                        tracing::error!("Discord membership poll failed: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }

                tokio::time::sleep(std::time::Duration::from_secs(channel.config.poll_interval))
                    .await;
            }
        });
    }
}

fn is_text_capable(kind: u8) -> bool {
    // GUILD_TEXT and GUILD_ANNOUNCEMENT
    matches!(kind, 0 | 5)
}

fn embed_payload(description: &str, color: u32) -> serde_json::Value {
    serde_json::json!({
        "embeds": [{
            "description": description,
            "color": color,
        }]
    })
}

#[async_trait]
impl Messenger for DiscordChannel {
    async fn current_guilds(&self) -> Result<Vec<GuildInfo>> {
        Ok(self.guilds.read().await.clone())
    }

    async fn text_channels(&self) -> Result<Vec<String>> {
        Ok(self.channels.read().await.clone())
    }

    async fn warm_history(&self, channel_id: &str, limit: usize) -> Result<()> {
        let _: Vec<serde_json::Value> = self
            .get_json(&format!("/channels/{channel_id}/messages?limit={limit}"))
            .await?;
        Ok(())
    }

    async fn send_text(&self, channel_id: &str, text: &str) -> Result<()> {
        self.post_json(
            &format!("/channels/{channel_id}/messages"),
            &serde_json::json!({ "content": text }),
        )
        .await
    }

    async fn send_embed(&self, channel_id: &str, description: &str, color: u32) -> Result<()> {
        self.post_json(
            &format!("/channels/{channel_id}/messages"),
            &embed_payload(description, color),
        )
        .await
    }

    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }
}

// --- Discord API Types ---

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct DiscordGuild {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DiscordApiChannel {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_capable_channel_kinds() {
        assert!(is_text_capable(0)); // GUILD_TEXT
        assert!(is_text_capable(5)); // GUILD_ANNOUNCEMENT
        assert!(!is_text_capable(2)); // GUILD_VOICE
        assert!(!is_text_capable(4)); // GUILD_CATEGORY
    }

    #[test]
    fn test_embed_payload_shape() {
        let payload = embed_payload("Standup", 0xFFC107);
        assert_eq!(payload["embeds"][0]["description"], "Standup");
        assert_eq!(payload["embeds"][0]["color"], 0xFFC107);
    }

    #[test]
    fn test_guild_deserialization() {
        let guild: DiscordGuild =
            serde_json::from_str(r#"{"id":"123","name":"Alpha","owner":false}"#).unwrap();
        assert_eq!(guild.id, "123");
        assert_eq!(guild.name, "Alpha");
    }
}
