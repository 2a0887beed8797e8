//! Triggering runtime — the clock-driven path executed when a trigger fires.
//!
//! Each job is a spawned loop: sleep until the next fire instant, then
//! dispatch. The message payload is resolved at fire time, never at
//! schedule-compile time, so admin edits take effect on the next fire.
//! The runtime never touches the job registry; a failed dispatch leaves
//! the job scheduled for its next occurrence.

use std::sync::Arc;

use chrono::Utc;

use guildward_core::traits::{Messenger, TaskStore};
use guildward_core::types::RecurringTask;

use crate::registry::RegisteredJob;
use crate::trigger::TriggerSpec;

/// Embed color used when a message definition has none stored (amber).
pub const DEFAULT_EMBED_COLOR: u32 = 0xFFC107;

/// Spawn the fire loop for one compiled task.
pub fn spawn_job(
    trigger: TriggerSpec,
    task: &RecurringTask,
    store: Arc<dyn TaskStore>,
    messenger: Arc<dyn Messenger>,
) -> RegisteredJob {
    let task_id = task.id.clone();
    let message_id = task.message_id.clone();
    let handle = tokio::spawn(run_job(
        trigger,
        task_id.clone(),
        message_id.clone(),
        store,
        messenger,
    ));
    RegisteredJob::new(task_id, message_id, handle)
}

async fn run_job(
    trigger: TriggerSpec,
    task_id: String,
    message_id: String,
    store: Arc<dyn TaskStore>,
    messenger: Arc<dyn Messenger>,
) {
    loop {
        let now = Utc::now();
        let Some(next) = trigger.next_fire(now) else {
            tracing::warn!("Task {task_id}: no upcoming fire instant, job stopping");
            return;
        };
        let wait = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);
        tokio::time::sleep(wait).await;
        fire(store.as_ref(), messenger.as_ref(), &task_id, &message_id).await;
    }
}

/// Execute one fire: fresh message read, then dispatch.
pub async fn fire(
    store: &dyn TaskStore,
    messenger: &dyn Messenger,
    task_id: &str,
    message_id: &str,
) {
    let message = match store.get_recurring_message(message_id).await {
        Ok(Some(message)) => message,
        Ok(None) => {
            tracing::info!("Task {task_id}: message {message_id} no longer exists, fire skipped");
            return;
        }
        Err(e) => {
            tracing::warn!("Task {task_id}: message lookup failed, fire skipped: {e}");
            return;
        }
    };

    let result = if message.as_embed {
        messenger
            .send_embed(
                &message.channel_id,
                &message.content,
                message.embed_color.unwrap_or(DEFAULT_EMBED_COLOR),
            )
            .await
    } else {
        messenger.send_text(&message.channel_id, &message.content).await
    };

    if let Err(e) = result {
        // Channel gone or permission revoked — the job stays scheduled.
        tracing::warn!(
            "Task {task_id}: dispatch to channel {} failed: {e}",
            message.channel_id
        );
    }
}
