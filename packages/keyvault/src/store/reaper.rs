//! Background purge of soft-deleted items past their retention

use super::EntityStore;
use crate::error::{EntityKind, VaultResult};
use crate::logging::log_lifecycle_event;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Invoked with every batch of purged names
pub type PurgeHook = Arc<dyn Fn(&[(EntityKind, String)]) + Send + Sync>;

/// Periodic sweep removing deleted items whose scheduled purge time has passed
pub struct PurgeReaper<S: EntityStore> {
    store: Arc<S>,
    hook: Option<PurgeHook>,
}

impl<S: EntityStore> PurgeReaper<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store, hook: None }
    }

    /// Run `hook` after each non-empty sweep
    pub fn with_hook(mut self, hook: PurgeHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Purge everything due at `now`
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> VaultResult<Vec<(EntityKind, String)>> {
        let purged = self.store.purge_expired(now).await?;
        for (kind, name) in &purged {
            log_lifecycle_event("SCHEDULED_PURGE", *kind, name, true);
        }
        if !purged.is_empty() {
            if let Some(hook) = &self.hook {
                hook(&purged);
            }
            info!(purged = purged.len(), "Purge reaper removed expired items");
        }
        Ok(purged)
    }

    /// Sweep every `period` until the returned handle is shut down
    pub fn spawn(self, period: Duration) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once(Utc::now()).await {
                            warn!(error = %e, "Purge reaper sweep failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Purge reaper stopping");
                            break;
                        }
                    }
                }
            }
        });
        ReaperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Shutdown handle of a spawned reaper
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for the current sweep to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Purge reaper task ended abnormally");
        }
    }
}
