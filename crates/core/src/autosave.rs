use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::notifications::{Notification, NotificationSink};
use crate::registry::RegistryHandle;
use crate::tabs::TabId;

/// Runs one autosave pass over every open tab.
pub fn save_drafts(registry: &RegistryHandle) -> Vec<TabId> {
    let saved = registry.update(|registry| registry.save_drafts());
    if !saved.is_empty() {
        info!(count = saved.len(), "autosaved drafts");
    }
    saved
}

/// Periodic autosave. The first tick fires one full period after spawning.
#[derive(Debug)]
pub struct AutosaveMonitor {
    registry: RegistryHandle,
    task: Option<JoinHandle<()>>,
}

impl AutosaveMonitor {
    #[must_use]
    pub fn spawn(
        registry: RegistryHandle,
        period: Duration,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let period = period.max(Duration::from_millis(1));
        let task_registry = registry.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if task_registry.snapshot().is_empty() {
                    debug!("autosave tick skipped, no open tabs");
                    continue;
                }
                let saved = save_drafts(&task_registry);
                if !saved.is_empty() {
                    notifier.notify(Notification::info(
                        "Drafts saved",
                        format!("{} tab(s) autosaved", saved.len()),
                    ));
                }
            }
        });
        debug!(?period, "autosave timer started");

        Self {
            registry,
            task: Some(task),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the timer and flushes once more so no draft is left dirty.
    pub fn shutdown(&mut self) -> Vec<TabId> {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("autosave timer stopped");
        }
        save_drafts(&self.registry)
    }
}

impl Drop for AutosaveMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
