//! # Guildward — Moderation Bot Scheduler & Reconciler
//!
//! Keeps a live set of timer-driven recurring jobs consistent with the
//! persisted task table, and the known-server cache consistent with the
//! guilds the bot is currently a member of.
//!
//! Usage:
//!   guildward                     # Run with ~/.guildward/config.toml
//!   guildward --config ./gw.toml  # Custom config path

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use guildward_channels::DiscordChannel;
use guildward_core::GuildwardConfig;
use guildward_core::traits::{Messenger, TaskStore};
use guildward_scheduler::{JobRegistry, Reconciler};
use guildward_store::SqliteStore;

#[derive(Parser)]
#[command(
    name = "guildward",
    version,
    about = "🛡️ Guildward — recurring-task scheduler and guild reconciler"
)]
struct Cli {
    /// Path to config file (default: ~/.guildward/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "guildward=debug,guildward_scheduler=debug,guildward_store=debug,guildward_channels=debug"
    } else {
        "guildward=info,guildward_scheduler=info,guildward_store=info,guildward_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => {
            let expanded = shellexpand::tilde(path).to_string();
            GuildwardConfig::load_from(Path::new(&expanded))?
        }
        None => GuildwardConfig::load()?,
    };

    if config.discord.bot_token.is_empty() {
        anyhow::bail!(
            "No Discord bot token configured. Set [discord].bot_token in {}",
            GuildwardConfig::default_path().display()
        );
    }

    // Open store
    let db_path = shellexpand::tilde(&config.store.db_path).to_string();
    if let Some(parent) = Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store: Arc<dyn TaskStore> = Arc::new(SqliteStore::open(Path::new(&db_path))?);

    // Connect to Discord and start membership polling
    let discord = Arc::new(DiscordChannel::new(config.discord.clone()));
    discord.connect().await?;
    discord.clone().start_polling();
    let messenger: Arc<dyn Messenger> = discord;

    let registry = Arc::new(JobRegistry::new());
    let reconciler = Arc::new(Reconciler::new(
        store,
        messenger,
        registry.clone(),
        &config.scheduler,
    ));

    println!("🛡️ Guildward v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database:      {db_path}");
    println!(
        "   ⏰ Resync:        tasks every {}s, guilds every {}s",
        config.scheduler.task_resync_secs, config.scheduler.guild_resync_secs
    );
    println!(
        "   🧹 Stale servers: {}",
        if config.scheduler.purge_departed {
            "purge"
        } else {
            "retain"
        }
    );
    println!();

    tokio::select! {
        _ = reconciler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down, stopping all jobs");
            registry.shutdown().await;
        }
    }

    Ok(())
}
