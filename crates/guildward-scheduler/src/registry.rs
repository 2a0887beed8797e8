//! Job registry — owns the current generation of running scheduled jobs.
//!
//! The registry is the only mutable shared state in the scheduler core.
//! `replace_all` is its sole mutation entry point and is serialized by an
//! internal mutex: concurrent reconciliations cannot interleave, and no
//! partial generation is ever observable.

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A live, running job bound to one recurring task.
///
/// Captures only identities — the message body is re-read from the store
/// at fire time by the triggering runtime.
pub struct RegisteredJob {
    pub task_id: String,
    pub message_id: String,
    handle: JoinHandle<()>,
}

impl RegisteredJob {
    pub fn new(task_id: String, message_id: String, handle: JoinHandle<()>) -> Self {
        Self {
            task_id,
            message_id,
            handle,
        }
    }
}

/// Holds the current generation of [`RegisteredJob`]s.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<Vec<RegisteredJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole generation.
    ///
    /// Every old job is stopped and its termination awaited before the new
    /// generation is installed — no job from the old generation can fire
    /// after this call returns.
    pub async fn replace_all(&self, new_jobs: Vec<RegisteredJob>) {
        let mut jobs = self.jobs.lock().await;
        for job in jobs.drain(..) {
            job.handle.abort();
            if let Err(e) = job.handle.await
                && !e.is_cancelled()
            {
                tracing::warn!("Job for task {} ended abnormally: {e}", job.task_id);
            }
        }
        *jobs = new_jobs;
        tracing::info!("Scheduled {} recurring jobs", jobs.len());
    }

    /// Number of jobs in the current generation.
    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Task/message id pairs of the current generation.
    pub async fn snapshot(&self) -> Vec<(String, String)> {
        self.jobs
            .lock()
            .await
            .iter()
            .map(|j| (j.task_id.clone(), j.message_id.clone()))
            .collect()
    }

    /// Stop everything. Used on process shutdown.
    pub async fn shutdown(&self) {
        self.replace_all(Vec::new()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(id: &str, counter: Arc<AtomicUsize>) -> RegisteredJob {
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        RegisteredJob::new(id.to_string(), format!("msg-{id}"), handle)
    }

    #[tokio::test]
    async fn test_replace_all_installs_new_generation() {
        let registry = JobRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        registry
            .replace_all(vec![
                counting_job("a", counter.clone()),
                counting_job("b", counter.clone()),
            ])
            .await;
        assert_eq!(registry.job_count().await, 2);

        registry
            .replace_all(vec![counting_job("c", counter.clone())])
            .await;
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, "c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_generation_never_fires_after_replace() {
        let registry = JobRegistry::new();
        let old_fires = Arc::new(AtomicUsize::new(0));

        registry
            .replace_all(vec![counting_job("old", old_fires.clone())])
            .await;
        registry.replace_all(Vec::new()).await;

        // Advance well past several would-be fire instants.
        tokio::time::sleep(std::time::Duration::from_secs(600)).await;
        assert_eq!(old_fires.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_empties_registry() {
        let registry = JobRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry
            .replace_all(vec![counting_job("a", counter)])
            .await;
        registry.shutdown().await;
        assert_eq!(registry.job_count().await, 0);
    }
}
