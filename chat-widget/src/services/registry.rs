use super::controller::{ChatController, ControllerDeps};
use crate::storage::{StorageError, StorageHub};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

struct Slot {
    controller: Arc<ChatController>,
    last_used: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted_controllers: usize,
    pub purged_scopes: usize,
}

/// One controller per browser scope, created on first use and dropped
/// again once idle.
pub struct ControllerRegistry {
    controllers: DashMap<String, Slot>,
    deps: ControllerDeps,
    hub: StorageHub,
}

impl ControllerRegistry {
    pub fn new(deps: ControllerDeps, hub: StorageHub) -> Self {
        Self {
            controllers: DashMap::new(),
            deps,
            hub,
        }
    }

    pub fn controller(&self, scope: &str) -> Arc<ChatController> {
        let now = Instant::now();
        if let Some(mut slot) = self.controllers.get_mut(scope) {
            slot.last_used = now;
            return slot.controller.clone();
        }
        self.controllers
            .entry(scope.to_string())
            .or_insert_with(|| Slot {
                controller: Arc::new(ChatController::new(
                    self.deps.clone(),
                    self.hub.scoped(scope),
                )),
                last_used: now,
            })
            .controller
            .clone()
    }

    /// Drop controllers unused for `idle`. A controller still held by a
    /// request or with an exchange in flight stays.
    pub fn evict_idle(&self, idle: Duration) -> usize {
        let before = self.controllers.len();
        self.controllers.retain(|_, slot| {
            slot.last_used.elapsed() < idle
                || slot.controller.is_loading()
                || Arc::strong_count(&slot.controller) > 1
        });
        before.saturating_sub(self.controllers.len())
    }

    /// Evict idle controllers, then purge stored scopes that have no
    /// controller left and no live session.
    pub async fn sweep(&self, idle: Duration) -> Result<SweepReport, StorageError> {
        let evicted_controllers = self.evict_idle(idle);
        let purged_scopes = self
            .hub
            .purge_expired(|scope| self.controllers.contains_key(scope))
            .await?;
        Ok(SweepReport {
            evicted_controllers,
            purged_scopes,
        })
    }

    pub fn hub(&self) -> &StorageHub {
        &self.hub
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

/// Run [`ControllerRegistry::sweep`] every `every` until the task is aborted.
pub fn spawn_sweeper(
    registry: Arc<ControllerRegistry>,
    every: Duration,
    idle: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match registry.sweep(idle).await {
                Ok(report) if report != SweepReport::default() => tracing::info!(
                    evicted_controllers = report.evicted_controllers,
                    purged_scopes = report.purged_scopes,
                    active_controllers = registry.len(),
                    "Swept idle chat scopes"
                ),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Chat scope sweep failed"),
            }
        }
    })
}
