use std::sync::{Arc, Mutex, PoisonError};

use crate::tabs::{TabId, TabRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    TabAdded { tab_id: TabId, name: String },
    TabDuplicated { source: TabId, tab_id: TabId },
    TabRemoved { tab_id: TabId },
    AllTabsClosed,
    ActiveTabChanged { tab_id: Option<TabId> },
    TabRenamed { tab_id: TabId, name: String },
    QueryEdited { tab_id: TabId, has_unsaved_changes: bool },
    QueryCommitted { tab_id: TabId },
    ExecutionStateChanged { tab_id: TabId, is_executing: bool },
    ResultAttached { tab_id: TabId },
    ErrorAttached { tab_id: TabId, message: String },
    DraftsSaved { tab_ids: Vec<TabId> },
}

/// Called by the registry after every transition. Observers run while the
/// registry lock is held and must not call back into a [`RegistryHandle`].
pub trait RegistryObserver: Send + Sync {
    fn on_event(&self, event: &RegistryEvent);
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<RegistryEvent>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn events(&self) -> Vec<RegistryEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl RegistryObserver for RecordingObserver {
    fn on_event(&self, event: &RegistryEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Shared owner of the tab registry.
///
/// Readers get an immutable snapshot; writers go through [`Self::update`],
/// which copies the registry first if any snapshot is still alive. A snapshot
/// therefore never changes under its holder. The lock is only held for the
/// duration of one synchronous operation, never across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct RegistryHandle {
    inner: Arc<Mutex<Arc<TabRegistry>>>,
}

impl RegistryHandle {
    #[must_use]
    pub fn new(registry: TabRegistry) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Arc::new(registry))),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<TabRegistry> {
        Arc::clone(&self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn update<R>(&self, apply: impl FnOnce(&mut TabRegistry) -> R) -> R {
        let mut current = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        apply(Arc::make_mut(&mut current))
    }
}
