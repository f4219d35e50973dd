use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::autosave::{save_drafts, AutosaveMonitor};
use crate::config::WorkbenchSettings;
use crate::execution::ExecutionCoordinator;
use crate::history::QueryHistory;
use crate::notifications::{Notification, NotificationSink, TracingNotifier};
use crate::query_result::QueryEngine;
use crate::registry::RegistryHandle;
use crate::schema::{SchemaCache, SchemaProvider};
use crate::tabs::TabId;
use crate::ConnectionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSwitch {
    Unchanged,
    Switched,
    /// Tabs hold edits that would be lost; answer with
    /// [`WorkbenchSession::confirm_connection_switch`] or
    /// [`WorkbenchSession::decline_connection_switch`].
    ConfirmationRequired { unsaved_tabs: Vec<TabId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("connection {0} is not configured")]
    UnknownConnection(ConnectionId),
}

/// One workbench window: the tabs, the coordinator that runs them, the
/// active connection and the autosave timer.
pub struct WorkbenchSession<E: QueryEngine, P: SchemaProvider> {
    registry: RegistryHandle,
    coordinator: ExecutionCoordinator<E>,
    schema: SchemaCache<P>,
    notifier: Arc<dyn NotificationSink>,
    autosave_interval: Duration,
    autosave: Option<AutosaveMonitor>,
    active_connection: ConnectionId,
    pending_switch: Option<ConnectionId>,
}

impl<E: QueryEngine, P: SchemaProvider> WorkbenchSession<E, P> {
    #[must_use]
    pub fn new(
        engine: E,
        provider: P,
        settings: &WorkbenchSettings,
        connection_id: ConnectionId,
    ) -> Self {
        let registry = RegistryHandle::default();
        let coordinator = ExecutionCoordinator::new(engine, registry.clone())
            .with_default_page_size(settings.default_page_size);
        Self {
            registry,
            coordinator,
            schema: SchemaCache::new(provider, settings.schema_cache_ttl()),
            notifier: Arc::new(TracingNotifier),
            autosave_interval: settings.autosave_interval(),
            autosave: None,
            active_connection: connection_id,
            pending_switch: None,
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.coordinator = self.coordinator.with_notifier(Arc::clone(&notifier));
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn QueryHistory>) -> Self {
        self.coordinator = self.coordinator.with_history(history);
        self
    }

    /// Starts the periodic autosave. Must be called inside a tokio runtime.
    pub fn start_autosave(&mut self) {
        if self.autosave.is_none() {
            self.autosave = Some(AutosaveMonitor::spawn(
                self.registry.clone(),
                self.autosave_interval,
                Arc::clone(&self.notifier),
            ));
        }
    }

    #[must_use]
    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    #[must_use]
    pub fn coordinator(&self) -> &ExecutionCoordinator<E> {
        &self.coordinator
    }

    #[must_use]
    pub fn schema_cache(&mut self) -> &mut SchemaCache<P> {
        &mut self.schema
    }

    #[must_use]
    pub fn active_connection(&self) -> ConnectionId {
        self.active_connection
    }

    #[must_use]
    pub fn pending_switch(&self) -> Option<ConnectionId> {
        self.pending_switch
    }

    /// Display name of the active connection, falling back to its id when the
    /// provider cannot be reached.
    pub async fn connection_name(&mut self) -> String {
        let connection_id = self.active_connection;
        match self.schema.connection(connection_id).await {
            Ok(Some(connection)) => connection.name,
            Ok(None) => format!("connection {connection_id}"),
            Err(error) => {
                warn!(connection_id, %error, "connection lookup failed");
                format!("connection {connection_id}")
            }
        }
    }

    pub fn open_query_tab(&self) -> TabId {
        let connection_id = self.active_connection;
        self.registry
            .update(|registry| registry.add_tab(connection_id, None, None))
    }

    /// Opens a preview tab for a table. The schema is only consulted for the
    /// table's exact spelling, so an unknown table or an unreachable schema
    /// still opens the tab.
    pub async fn open_table_tab(&mut self, table_name: &str) -> TabId {
        let connection_id = self.active_connection;
        let canonical = match self
            .schema
            .canonical_table_name(connection_id, table_name)
            .await
        {
            Ok(Some(canonical)) => canonical,
            Ok(None) => table_name.trim().to_string(),
            Err(error) => {
                warn!(connection_id, %error, "schema lookup failed, using typed table name");
                table_name.trim().to_string()
            }
        };
        self.registry
            .update(|registry| registry.add_tab(connection_id, None, Some(&canonical)))
    }

    pub fn close_tab(&self, tab_id: TabId) -> bool {
        self.coordinator.forget_tab(tab_id);
        self.registry.update(|registry| registry.remove_tab(tab_id))
    }

    pub fn close_all_tabs(&self) {
        self.coordinator.forget_all();
        self.registry.update(|registry| registry.close_all_tabs());
    }

    /// Asks to move the workbench to another connection. Every open tab is
    /// closed on a switch, so unsaved edits first require confirmation.
    pub async fn request_connection_switch(
        &mut self,
        connection_id: ConnectionId,
    ) -> Result<ConnectionSwitch, SessionError> {
        if connection_id == self.active_connection {
            return Ok(ConnectionSwitch::Unchanged);
        }
        match self.schema.connection(connection_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(SessionError::UnknownConnection(connection_id)),
            Err(error) => {
                warn!(connection_id, %error, "cannot verify connection, switching anyway");
            }
        }

        let unsaved_tabs = self.registry.snapshot().unsaved_tab_ids();
        if !unsaved_tabs.is_empty() {
            info!(connection_id, unsaved = unsaved_tabs.len(), "connection switch needs confirmation");
            self.pending_switch = Some(connection_id);
            self.notifier.notify(Notification::warning(
                "Unsaved changes",
                format!(
                    "{} tab(s) have unsaved changes and will be closed",
                    unsaved_tabs.len()
                ),
            ));
            return Ok(ConnectionSwitch::ConfirmationRequired { unsaved_tabs });
        }

        self.switch_to(connection_id).await;
        Ok(ConnectionSwitch::Switched)
    }

    pub async fn confirm_connection_switch(&mut self) -> ConnectionSwitch {
        match self.pending_switch.take() {
            Some(connection_id) => {
                self.switch_to(connection_id).await;
                ConnectionSwitch::Switched
            }
            None => ConnectionSwitch::Unchanged,
        }
    }

    /// Leaves the connection and every tab as they were.
    pub fn decline_connection_switch(&mut self) -> bool {
        let declined = self.pending_switch.take().is_some();
        if declined {
            info!(connection_id = self.active_connection, "connection switch declined");
        }
        declined
    }

    /// Stops the autosave timer and saves every remaining draft.
    pub fn shutdown(&mut self) -> Vec<TabId> {
        let saved = match self.autosave.take() {
            Some(mut monitor) => monitor.shutdown(),
            None => save_drafts(&self.registry),
        };
        info!(saved = saved.len(), "workbench session closed");
        saved
    }

    async fn switch_to(&mut self, connection_id: ConnectionId) {
        save_drafts(&self.registry);
        self.close_all_tabs();
        let previous = std::mem::replace(&mut self.active_connection, connection_id);
        info!(from = previous, to = connection_id, "active connection switched");

        let name = self.connection_name().await;
        self.notifier
            .notify(Notification::info("Connection switched", format!("Now using {name}")));
    }
}
