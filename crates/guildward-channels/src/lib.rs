//! # Guildward Channels
//!
//! Chat-platform adapters. Currently Discord over the REST API, with a
//! polling loop that mirrors guild membership into gateway events.

mod discord;

pub use discord::DiscordChannel;
