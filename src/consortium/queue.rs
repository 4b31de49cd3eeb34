//! The background worker for the consortium recompute queue.
//!
//! The worker handles one item at a time, in random order so that no consortium starves
//! the others. An item is only marked complete after its recomputed snapshot has been saved, so
//! a crash part-way through means the item runs again (at-least-once). Recomputing from scratch
//! makes this safe.
use super::fanout::MemberSource;
use super::{ConsortiumSummary, recompute_consortium};
use crate::id::ScenarioID;
use crate::settings::Settings;
use crate::store::Store;
use crate::store::queue::QueueItem;
use anyhow::Result;
use async_trait::async_trait;
use log::{error, info, warn};
use rand::Rng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;

/// Sends a message when a queued recompute finishes
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell `email` that `scenario_id` has been recomputed
    async fn notify(&self, email: &str, scenario_id: &ScenarioID, summary: &ConsortiumSummary) -> Result<()>;
}

/// A notifier which only writes to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, email: &str, scenario_id: &ScenarioID, summary: &ConsortiumSummary) -> Result<()> {
        info!(
            "Consortium {scenario_id} recomputed ({} journals, {} failed members); notifying {email}",
            summary.num_journals,
            summary.failures.len()
        );

        Ok(())
    }
}

/// Polls the recompute queue and processes what it finds
pub struct Worker {
    store: Store,
    source: Arc<dyn MemberSource>,
    notifier: Arc<dyn Notifier>,
    fanout_workers: usize,
    fetch_timeout: Duration,
    min_sleep: Duration,
    max_sleep: Duration,
}

impl Worker {
    /// Create a worker configured from program settings
    pub fn new(
        store: Store,
        source: Arc<dyn MemberSource>,
        notifier: Arc<dyn Notifier>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            source,
            notifier,
            fanout_workers: settings.fanout_workers,
            fetch_timeout: settings.member_fetch_timeout(),
            min_sleep: Duration::from_secs(settings.worker_min_sleep_secs),
            max_sleep: Duration::from_secs(settings.worker_max_sleep_secs),
        }
    }

    async fn process(&self, item: &QueueItem) -> Result<()> {
        let consortium = recompute_consortium(
            &self.store,
            self.source.as_ref(),
            &item.scenario_id,
            self.fanout_workers,
            self.fetch_timeout,
        )
        .await?;

        self.store
            .save_consortium_snapshot(&consortium.snapshot)
            .await?;
        self.store.mark_recompute_complete(item.id).await?;

        if let Some(email) = &item.email {
            let summary = consortium.summary();
            if let Err(err) = self.notifier.notify(email, &item.scenario_id, &summary).await {
                warn!("Could not notify {email} about {}: {err:#}", item.scenario_id);
            }
        }

        Ok(())
    }

    /// Process every pending item once, returning how many completed.
    ///
    /// A failing item is logged and left pending for the next poll.
    pub async fn run_once(&self) -> Result<usize> {
        let mut items = self.store.pending_recomputes().await?;
        items.shuffle(&mut rand::thread_rng());

        let mut completed = 0;
        for item in &items {
            match self.process(item).await {
                Ok(()) => {
                    info!("Completed recompute {} for {}", item.id, item.scenario_id);
                    completed += 1;
                }
                Err(err) => error!(
                    "Recompute {} for {} failed, will retry: {err:#}",
                    item.id, item.scenario_id
                ),
            }
        }

        Ok(completed)
    }

    /// A random pause between polls
    fn poll_interval(&self) -> Duration {
        let min = self.min_sleep.as_millis();
        let max = self.max_sleep.as_millis().max(min);
        let millis = rand::thread_rng().gen_range(min..=max);

        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Poll the queue until the process is stopped
    pub async fn run_forever(&self) {
        info!("Recompute worker started");
        loop {
            if let Err(err) = self.run_once().await {
                error!("Could not read recompute queue: {err:#}");
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }
}
