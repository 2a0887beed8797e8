//! Reconciler — recomputes derived state from the persisted source of truth.
//!
//! All triggers (platform events, store change notifications, periodic
//! timers) funnel into the two entry points here. Both are idempotent and
//! safe to call redundantly. A reconcile pass holds a single pass lock
//! across its read-and-install phase, so the last pass to run always wins
//! and a slow stale pass can never overwrite a newer generation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;

use guildward_core::config::SchedulerConfig;
use guildward_core::error::Result;
use guildward_core::traits::{GatewayEvent, Messenger, StoreEvent, TaskStore};

use crate::registry::JobRegistry;
use crate::runtime::spawn_job;
use crate::trigger::compile;

/// What to do with known-server rows for guilds the bot no longer belongs
/// to. Explicit policy choice, configured rather than inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Leave departed rows untouched; only add and relabel.
    Retain,
    /// Delete departed rows together with their dependent moderation rows.
    Purge,
}

/// Orchestrates task and guild reconciliation.
pub struct Reconciler {
    store: Arc<dyn TaskStore>,
    messenger: Arc<dyn Messenger>,
    registry: Arc<JobRegistry>,
    settle_delay: Duration,
    task_resync: Duration,
    guild_resync: Duration,
    backfill_limit: usize,
    stale_policy: StalePolicy,
    pass_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        messenger: Arc<dyn Messenger>,
        registry: Arc<JobRegistry>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            messenger,
            registry,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            task_resync: Duration::from_secs(config.task_resync_secs),
            guild_resync: Duration::from_secs(config.guild_resync_secs),
            backfill_limit: config.backfill_limit,
            stale_policy: if config.purge_departed {
                StalePolicy::Purge
            } else {
                StalePolicy::Retain
            },
            pass_lock: Mutex::new(()),
        }
    }

    /// Rebuild the job generation from the persisted task table.
    ///
    /// Waits the settle delay first so a read immediately after an admin
    /// write observes the write. A transient storage error skips the pass
    /// and leaves the previous generation running.
    pub async fn reconcile_tasks(&self) -> Result<()> {
        tokio::time::sleep(self.settle_delay).await;
        let _pass = self.pass_lock.lock().await;
        self.rebuild_jobs().await
    }

    /// Fetch-compile-install. Callers hold the pass lock.
    async fn rebuild_jobs(&self) -> Result<()> {
        let tasks = self.store.list_recurring_tasks().await?;
        let mut jobs = Vec::with_capacity(tasks.len());
        for task in &tasks {
            match compile(task) {
                Ok(trigger) => jobs.push(spawn_job(
                    trigger,
                    task,
                    self.store.clone(),
                    self.messenger.clone(),
                )),
                Err(e) => {
                    // Fatal to this job only; the rest of the generation installs.
                    tracing::error!("Task {}: omitted from generation: {e}", task.id);
                }
            }
        }
        self.registry.replace_all(jobs).await;
        Ok(())
    }

    /// Diff live guild membership against the known-server mirror and
    /// upsert/purge accordingly, then re-reconcile tasks. The diff, the
    /// writes, and the task rebuild all happen under the pass lock, so two
    /// overlapping passes cannot both record the same guild.
    pub async fn reconcile_guilds(&self) -> Result<()> {
        {
            let _pass = self.pass_lock.lock().await;

            let live = self.messenger.current_guilds().await?;
            let stored = self.store.list_known_servers().await?;
            let stored_by_id: HashMap<&str, &str> = stored
                .iter()
                .map(|s| (s.id.as_str(), s.name.as_str()))
                .collect();

            for guild in &live {
                match stored_by_id.get(guild.id.as_str()) {
                    None => {
                        tracing::info!("Recording new guild '{}' ({})", guild.name, guild.id);
                        self.store.insert_known_server(&guild.id, &guild.name).await?;
                    }
                    Some(name) if *name != guild.name => {
                        tracing::info!("Guild {} renamed to '{}'", guild.id, guild.name);
                        self.store.update_known_server(&guild.id, &guild.name).await?;
                    }
                    Some(_) => {}
                }
            }

            if self.stale_policy == StalePolicy::Purge {
                let live_ids: HashSet<&str> = live.iter().map(|g| g.id.as_str()).collect();
                for server in &stored {
                    if !live_ids.contains(server.id.as_str()) {
                        tracing::info!(
                            "Guild '{}' ({}) departed, purging",
                            server.name,
                            server.id
                        );
                        self.store.delete_known_server(&server.id).await?;
                    }
                }
            }

            // Tasks reference channels owned by guilds; a membership change
            // can invalidate previously valid tasks.
            self.rebuild_jobs().await?;
        }

        self.warm_caches().await;
        Ok(())
    }

    /// Best-effort history backfill for every cached text channel.
    async fn warm_caches(&self) {
        let channels = match self.messenger.text_channels().await {
            Ok(channels) => channels,
            Err(e) => {
                tracing::debug!("History backfill skipped: {e}");
                return;
            }
        };
        for channel in channels {
            if let Err(e) = self.messenger.warm_history(&channel, self.backfill_limit).await {
                tracing::debug!("History backfill for channel {channel} failed: {e}");
            }
        }
    }

    /// Drive the reconciler forever: periodic resyncs (first tick fires
    /// immediately, which is the startup pass) plus event subscriptions.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            "Reconciler started (tasks every {:?}, guilds every {:?})",
            self.task_resync,
            self.guild_resync
        );

        let guild_timer = {
            let this = self.clone();
            async move {
                let mut tick = tokio::time::interval(this.guild_resync);
                loop {
                    tick.tick().await;
                    if let Err(e) = this.reconcile_guilds().await {
                        tracing::warn!("Guild reconciliation failed, will retry: {e}");
                    }
                }
            }
        };

        let task_timer = {
            let this = self.clone();
            async move {
                let mut tick = tokio::time::interval(this.task_resync);
                loop {
                    tick.tick().await;
                    if let Err(e) = this.reconcile_tasks().await {
                        tracing::warn!("Task reconciliation failed, will retry: {e}");
                    }
                }
            }
        };

        let store_listener = {
            let this = self.clone();
            let mut events = this.store.subscribe();
            async move {
                loop {
                    match events.recv().await {
                        Ok(StoreEvent::TasksChanged) => {
                            if let Err(e) = this.reconcile_tasks().await {
                                tracing::warn!("Task reconciliation failed, will retry: {e}");
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            // Missed notifications all collapse into one pass.
                            tracing::warn!("Store events lagged by {n}, reconciling");
                            if let Err(e) = this.reconcile_tasks().await {
                                tracing::warn!("Task reconciliation failed, will retry: {e}");
                            }
                        }
                        Err(RecvError::Closed) => return,
                    }
                }
            }
        };

        let gateway_listener = {
            let this = self.clone();
            let mut events = this.messenger.subscribe();
            async move {
                loop {
                    match events.recv().await {
                        Ok(
                            GatewayEvent::Ready
                            | GatewayEvent::GuildJoined { .. }
                            | GatewayEvent::GuildLeft { .. },
                        ) => {
                            if let Err(e) = this.reconcile_guilds().await {
                                tracing::warn!("Guild reconciliation failed, will retry: {e}");
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            tracing::warn!("Gateway events lagged by {n}, reconciling");
                            if let Err(e) = this.reconcile_guilds().await {
                                tracing::warn!("Guild reconciliation failed, will retry: {e}");
                            }
                        }
                        Err(RecvError::Closed) => return,
                    }
                }
            }
        };

        tokio::join!(guild_timer, task_timer, store_listener, gateway_listener);
    }
}
