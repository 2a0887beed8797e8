//! End-to-end reconciliation scenarios against in-memory collaborators.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;

use guildward_core::config::SchedulerConfig;
use guildward_core::error::{GuildwardError, Result};
use guildward_core::traits::{GatewayEvent, Messenger, StoreEvent, TaskStore};
use guildward_core::types::{GuildInfo, KnownServer, RecurringMessage, RecurringTask, Weekday};
use guildward_scheduler::{DEFAULT_EMBED_COLOR, JobRegistry, Reconciler, runtime};

// ─── Fakes ──────────────────────────────────────────────────────

#[derive(Default)]
struct MemStore {
    tasks: Mutex<Vec<RecurringTask>>,
    messages: Mutex<HashMap<String, RecurringMessage>>,
    servers: Mutex<Vec<KnownServer>>,
    server_writes: AtomicUsize,
    fail_reads: AtomicBool,
    events: Option<broadcast::Sender<StoreEvent>>,
}

impl MemStore {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            events: Some(tx),
            ..Self::default()
        }
    }

    fn put_message(&self, message: RecurringMessage) {
        self.messages
            .lock()
            .unwrap()
            .insert(message.id.clone(), message);
    }

    fn put_task(&self, task: RecurringTask) {
        self.tasks.lock().unwrap().push(task);
    }

    fn remove_task(&self, id: &str) {
        self.tasks.lock().unwrap().retain(|t| t.id != id);
    }
}

#[async_trait]
impl TaskStore for MemStore {
    async fn list_recurring_tasks(&self) -> Result<Vec<RecurringTask>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(GuildwardError::Store("connection lost".into()));
        }
        Ok(self.tasks.lock().unwrap().clone())
    }

    async fn get_recurring_message(&self, id: &str) -> Result<Option<RecurringMessage>> {
        Ok(self.messages.lock().unwrap().get(id).cloned())
    }

    async fn list_known_servers(&self) -> Result<Vec<KnownServer>> {
        // Suspend once so overlapping passes actually interleave here.
        tokio::task::yield_now().await;
        Ok(self.servers.lock().unwrap().clone())
    }

    async fn insert_known_server(&self, id: &str, name: &str) -> Result<()> {
        self.server_writes.fetch_add(1, Ordering::SeqCst);
        self.servers.lock().unwrap().push(KnownServer {
            id: id.into(),
            name: name.into(),
        });
        Ok(())
    }

    async fn update_known_server(&self, id: &str, name: &str) -> Result<()> {
        self.server_writes.fetch_add(1, Ordering::SeqCst);
        let mut servers = self.servers.lock().unwrap();
        if let Some(server) = servers.iter_mut().find(|s| s.id == id) {
            server.name = name.into();
        }
        Ok(())
    }

    async fn delete_known_server(&self, id: &str) -> Result<()> {
        self.server_writes.fetch_add(1, Ordering::SeqCst);
        self.servers.lock().unwrap().retain(|s| s.id != id);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.as_ref().unwrap().subscribe()
    }
}

struct RecordingMessenger {
    guilds: Mutex<Vec<GuildInfo>>,
    channels: Vec<String>,
    texts: Mutex<Vec<(String, String)>>,
    embeds: Mutex<Vec<(String, String, u32)>>,
    warmed: Mutex<Vec<(String, usize)>>,
    events: broadcast::Sender<GatewayEvent>,
}

impl RecordingMessenger {
    fn new(guilds: Vec<(&str, &str)>, channels: Vec<&str>) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            guilds: Mutex::new(
                guilds
                    .into_iter()
                    .map(|(id, name)| GuildInfo {
                        id: id.into(),
                        name: name.into(),
                    })
                    .collect(),
            ),
            channels: channels.into_iter().map(String::from).collect(),
            texts: Mutex::new(Vec::new()),
            embeds: Mutex::new(Vec::new()),
            warmed: Mutex::new(Vec::new()),
            events: tx,
        }
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn current_guilds(&self) -> Result<Vec<GuildInfo>> {
        Ok(self.guilds.lock().unwrap().clone())
    }

    async fn text_channels(&self) -> Result<Vec<String>> {
        Ok(self.channels.clone())
    }

    async fn warm_history(&self, channel_id: &str, limit: usize) -> Result<()> {
        self.warmed.lock().unwrap().push((channel_id.into(), limit));
        Ok(())
    }

    async fn send_text(&self, channel_id: &str, text: &str) -> Result<()> {
        self.texts
            .lock()
            .unwrap()
            .push((channel_id.into(), text.into()));
        Ok(())
    }

    async fn send_embed(&self, channel_id: &str, description: &str, color: u32) -> Result<()> {
        self.embeds
            .lock()
            .unwrap()
            .push((channel_id.into(), description.into(), color));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }
}

fn config() -> SchedulerConfig {
    SchedulerConfig {
        settle_delay_ms: 200,
        task_resync_secs: 60,
        guild_resync_secs: 3600,
        backfill_limit: 5,
        purge_departed: false,
    }
}

fn task(id: &str, message_id: &str, weekday: Weekday, hour: u8, minute: u8) -> RecurringTask {
    RecurringTask {
        id: id.into(),
        message_id: message_id.into(),
        weekday,
        hour,
        minute,
    }
}

fn message(id: &str, channel: &str, content: &str, as_embed: bool) -> RecurringMessage {
    RecurringMessage {
        id: id.into(),
        channel_id: channel.into(),
        content: content.into(),
        as_embed,
        embed_color: None,
    }
}

fn reconciler(
    store: &Arc<MemStore>,
    messenger: &Arc<RecordingMessenger>,
    config: &SchedulerConfig,
) -> (Arc<Reconciler>, Arc<JobRegistry>) {
    let registry = Arc::new(JobRegistry::new());
    let reconciler = Arc::new(Reconciler::new(
        store.clone() as Arc<dyn TaskStore>,
        messenger.clone() as Arc<dyn Messenger>,
        registry.clone(),
        config,
    ));
    (reconciler, registry)
}

// ─── Task reconciliation ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn one_job_per_persisted_task() {
    let store = Arc::new(MemStore::new());
    store.put_message(message("m1", "chan-1", "daily", false));
    store.put_message(message("m2", "chan-2", "weekly", false));
    store.put_task(task("t1", "m1", Weekday::Every, 8, 0));
    store.put_task(task("t2", "m2", Weekday::Fri, 17, 30));
    let messenger = Arc::new(RecordingMessenger::new(vec![], vec![]));
    let (reconciler, registry) = reconciler(&store, &messenger, &config());

    reconciler.reconcile_tasks().await.unwrap();
    assert_eq!(registry.job_count().await, 2);

    store.remove_task("t1");
    reconciler.reconcile_tasks().await.unwrap();
    let snapshot = registry.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].0, "t2");
}

#[tokio::test(start_paused = true)]
async fn malformed_task_is_skipped_not_fatal() {
    let store = Arc::new(MemStore::new());
    store.put_message(message("m1", "chan-1", "ok", false));
    store.put_task(task("good", "m1", Weekday::Mon, 9, 0));
    store.put_task(task("bad", "m1", Weekday::Mon, 99, 0));
    let messenger = Arc::new(RecordingMessenger::new(vec![], vec![]));
    let (reconciler, registry) = reconciler(&store, &messenger, &config());

    reconciler.reconcile_tasks().await.unwrap();
    let snapshot = registry.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].0, "good");
}

#[tokio::test(start_paused = true)]
async fn failed_read_keeps_previous_generation() {
    let store = Arc::new(MemStore::new());
    store.put_message(message("m1", "chan-1", "ok", false));
    store.put_task(task("t1", "m1", Weekday::Every, 8, 0));
    let messenger = Arc::new(RecordingMessenger::new(vec![], vec![]));
    let (reconciler, registry) = reconciler(&store, &messenger, &config());

    reconciler.reconcile_tasks().await.unwrap();
    assert_eq!(registry.job_count().await, 1);

    store.fail_reads.store(true, Ordering::SeqCst);
    assert!(reconciler.reconcile_tasks().await.is_err());
    assert_eq!(registry.job_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn deletion_during_settle_window_is_observed() {
    let store = Arc::new(MemStore::new());
    store.put_message(message("m1", "chan-1", "bye", false));
    store.put_task(task("t1", "m1", Weekday::Every, 8, 0));
    let messenger = Arc::new(RecordingMessenger::new(vec![], vec![]));
    let (reconciler, registry) = reconciler(&store, &messenger, &config());

    // Reconciliation starts first, then the delete lands while the settle
    // delay is still pending. The read after the delay must see it.
    let pass = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.reconcile_tasks().await })
    };
    store.remove_task("t1");
    pass.await.unwrap().unwrap();
    assert_eq!(registry.job_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn old_generation_stops_firing_after_task_delete() {
    let store = Arc::new(MemStore::new());
    store.put_message(message("m1", "chan-1", "ping", false));
    store.put_task(task("t1", "m1", Weekday::Every, 8, 0));
    let messenger = Arc::new(RecordingMessenger::new(vec![], vec![]));
    let (reconciler, _registry) = reconciler(&store, &messenger, &config());

    reconciler.reconcile_tasks().await.unwrap();
    // Let the job cross at least one fire instant.
    tokio::time::sleep(std::time::Duration::from_secs(26 * 3600)).await;
    let fired = messenger.texts.lock().unwrap().len();
    assert!(fired >= 1);

    store.remove_task("t1");
    reconciler.reconcile_tasks().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(10 * 24 * 3600)).await;
    assert_eq!(messenger.texts.lock().unwrap().len(), fired);
}

// ─── Fire-time behavior ─────────────────────────────────────────

#[tokio::test]
async fn fire_dispatches_plain_text_standup() {
    let store = Arc::new(MemStore::new());
    store.put_message(message("m1", "chan-42", "Standup", false));
    let messenger = RecordingMessenger::new(vec![], vec![]);

    runtime::fire(store.as_ref(), &messenger, "t1", "m1").await;
    assert_eq!(
        messenger.texts.lock().unwrap().as_slice(),
        &[("chan-42".to_string(), "Standup".to_string())]
    );
}

#[tokio::test]
async fn fire_reads_message_fresh_each_time() {
    let store = Arc::new(MemStore::new());
    store.put_message(message("m1", "chan-1", "old text", false));
    let messenger = RecordingMessenger::new(vec![], vec![]);

    runtime::fire(store.as_ref(), &messenger, "t1", "m1").await;
    store.put_message(message("m1", "chan-1", "new text", false));
    runtime::fire(store.as_ref(), &messenger, "t1", "m1").await;

    let texts = messenger.texts.lock().unwrap();
    assert_eq!(texts[0].1, "old text");
    assert_eq!(texts[1].1, "new text");
}

#[tokio::test]
async fn fire_with_deleted_message_is_a_noop() {
    let store = Arc::new(MemStore::new());
    let messenger = RecordingMessenger::new(vec![], vec![]);

    runtime::fire(store.as_ref(), &messenger, "t1", "gone").await;
    assert!(messenger.texts.lock().unwrap().is_empty());
    assert!(messenger.embeds.lock().unwrap().is_empty());
}

#[tokio::test]
async fn fire_embed_defaults_to_amber() {
    let store = Arc::new(MemStore::new());
    store.put_message(message("m1", "chan-1", "rich", true));
    let messenger = RecordingMessenger::new(vec![], vec![]);

    runtime::fire(store.as_ref(), &messenger, "t1", "m1").await;
    let embeds = messenger.embeds.lock().unwrap();
    assert_eq!(
        embeds.as_slice(),
        &[("chan-1".to_string(), "rich".to_string(), DEFAULT_EMBED_COLOR)]
    );
}

// ─── Guild reconciliation ───────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn missing_guilds_are_inserted_with_live_names() {
    let store = Arc::new(MemStore::new());
    store
        .insert_known_server("A", "Alpha")
        .await
        .unwrap();
    store.insert_known_server("B", "Beta").await.unwrap();
    store.server_writes.store(0, Ordering::SeqCst);

    let messenger = Arc::new(RecordingMessenger::new(
        vec![("A", "Alpha"), ("B", "Beta"), ("C", "Gamma")],
        vec!["chan-1", "chan-2"],
    ));
    let (reconciler, _registry) = reconciler(&store, &messenger, &config());

    reconciler.reconcile_guilds().await.unwrap();
    let servers = store.list_known_servers().await.unwrap();
    assert_eq!(servers.len(), 3);
    let c = servers.iter().find(|s| s.id == "C").unwrap();
    assert_eq!(c.name, "Gamma");

    // Backfill requested for every cached text channel.
    let warmed = messenger.warmed.lock().unwrap().clone();
    assert_eq!(warmed, vec![("chan-1".into(), 5), ("chan-2".into(), 5)]);
}

#[tokio::test(start_paused = true)]
async fn guild_reconcile_is_idempotent() {
    let store = Arc::new(MemStore::new());
    let messenger = Arc::new(RecordingMessenger::new(
        vec![("A", "Alpha"), ("B", "Beta")],
        vec![],
    ));
    let (reconciler, _registry) = reconciler(&store, &messenger, &config());

    reconciler.reconcile_guilds().await.unwrap();
    let writes_after_first = store.server_writes.load(Ordering::SeqCst);
    assert_eq!(writes_after_first, 2);

    reconciler.reconcile_guilds().await.unwrap();
    assert_eq!(store.server_writes.load(Ordering::SeqCst), writes_after_first);
}

#[tokio::test(start_paused = true)]
async fn concurrent_guild_passes_record_each_guild_once() {
    let store = Arc::new(MemStore::new());
    let messenger = Arc::new(RecordingMessenger::new(vec![("A", "Alpha")], vec![]));
    let (reconciler, _registry) = reconciler(&store, &messenger, &config());

    // Both passes start before either has written; without serialization
    // each would see guild A as unknown and insert it.
    let (first, second) = tokio::join!(
        reconciler.reconcile_guilds(),
        reconciler.reconcile_guilds()
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(store.server_writes.load(Ordering::SeqCst), 1);
    assert_eq!(store.list_known_servers().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn renamed_guild_is_relabeled() {
    let store = Arc::new(MemStore::new());
    store.insert_known_server("A", "Old Name").await.unwrap();
    let messenger = Arc::new(RecordingMessenger::new(vec![("A", "New Name")], vec![]));
    let (reconciler, _registry) = reconciler(&store, &messenger, &config());

    reconciler.reconcile_guilds().await.unwrap();
    let servers = store.list_known_servers().await.unwrap();
    assert_eq!(servers[0].name, "New Name");
}

#[tokio::test(start_paused = true)]
async fn retain_policy_keeps_departed_rows() {
    let store = Arc::new(MemStore::new());
    store.insert_known_server("A", "Alpha").await.unwrap();
    store.insert_known_server("B", "Beta").await.unwrap();
    let messenger = Arc::new(RecordingMessenger::new(vec![("A", "Alpha")], vec![]));
    let (reconciler, _registry) = reconciler(&store, &messenger, &config());

    reconciler.reconcile_guilds().await.unwrap();
    assert_eq!(store.list_known_servers().await.unwrap().len(), 2);
}

// ─── Against the real sqlite store ──────────────────────────────

#[tokio::test(start_paused = true)]
async fn sqlite_backed_reconcile_end_to_end() {
    use guildward_store::SqliteStore;

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let message_id = store
        .insert_recurring_message("chan-9", "Standup", false, None)
        .unwrap();
    store
        .insert_recurring_task(&message_id, Weekday::Mon, 9, 0)
        .unwrap();

    let messenger = Arc::new(RecordingMessenger::new(vec![("A", "Alpha")], vec!["chan-9"]));
    let registry = Arc::new(JobRegistry::new());
    let rec = Arc::new(Reconciler::new(
        store.clone() as Arc<dyn TaskStore>,
        messenger.clone() as Arc<dyn Messenger>,
        registry.clone(),
        &config(),
    ));

    rec.reconcile_guilds().await.unwrap();
    assert_eq!(registry.job_count().await, 1);
    let servers = store.list_known_servers().await.unwrap();
    assert_eq!(
        servers,
        vec![KnownServer {
            id: "A".into(),
            name: "Alpha".into()
        }]
    );

    // A task write emits the change notification the run loop listens for.
    let mut events = store.subscribe();
    store
        .insert_recurring_task(&message_id, Weekday::Every, 7, 30)
        .unwrap();
    assert_eq!(events.try_recv().unwrap(), StoreEvent::TasksChanged);

    rec.reconcile_tasks().await.unwrap();
    assert_eq!(registry.job_count().await, 2);
}

#[tokio::test(start_paused = true)]
async fn purge_policy_deletes_departed_rows() {
    let store = Arc::new(MemStore::new());
    store.insert_known_server("A", "Alpha").await.unwrap();
    store.insert_known_server("B", "Beta").await.unwrap();
    let messenger = Arc::new(RecordingMessenger::new(vec![("A", "Alpha")], vec![]));
    let mut cfg = config();
    cfg.purge_departed = true;
    let (reconciler, _registry) = reconciler(&store, &messenger, &cfg);

    reconciler.reconcile_guilds().await.unwrap();
    let servers = store.list_known_servers().await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].id, "A");
}
