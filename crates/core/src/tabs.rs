//! Per-tab session state and the registry that owns it.
//!
//! Every lifecycle operation is total: an operation that names a tab which no
//! longer exists is a no-op (or falls back to a valid tab) instead of an error,
//! because background work may race with the user closing tabs.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::history::unix_timestamp_millis;
use crate::query_result::QueryResult;
use crate::registry::{RegistryEvent, RegistryObserver};
use crate::ConnectionId;

pub const PREVIEW_LIMIT: usize = 100;

const QUERY_NAME_PREFIX: &str = "Query ";
const COPY_SUFFIX: &str = " (Copy)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(u64);

impl TabId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tab {
    id: TabId,
    name: String,
    connection_id: ConnectionId,
    draft_query: String,
    last_executed_query: String,
    result: Option<QueryResult>,
    is_executing: bool,
    error: Option<String>,
    has_unsaved_changes: bool,
    cursor_position: usize,
    scroll_position: usize,
    created_at_unix_ms: u128,
    updated_at_unix_ms: u128,
}

impl Tab {
    fn new(id: TabId, name: String, connection_id: ConnectionId, query: String) -> Self {
        let now = unix_timestamp_millis();
        Self {
            id,
            name,
            connection_id,
            last_executed_query: query.clone(),
            draft_query: query,
            result: None,
            is_executing: false,
            error: None,
            has_unsaved_changes: false,
            cursor_position: 0,
            scroll_position: 0,
            created_at_unix_ms: now,
            updated_at_unix_ms: now,
        }
    }

    #[must_use]
    pub fn id(&self) -> TabId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    #[must_use]
    pub fn draft_query(&self) -> &str {
        &self.draft_query
    }

    #[must_use]
    pub fn last_executed_query(&self) -> &str {
        &self.last_executed_query
    }

    #[must_use]
    pub fn result(&self) -> Option<&QueryResult> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.is_executing
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn has_unsaved_changes(&self) -> bool {
        self.has_unsaved_changes
    }

    #[must_use]
    pub fn cursor_position(&self) -> usize {
        self.cursor_position
    }

    #[must_use]
    pub fn scroll_position(&self) -> usize {
        self.scroll_position
    }

    #[must_use]
    pub fn created_at_unix_ms(&self) -> u128 {
        self.created_at_unix_ms
    }

    #[must_use]
    pub fn updated_at_unix_ms(&self) -> u128 {
        self.updated_at_unix_ms
    }

    fn touch(&mut self) {
        self.updated_at_unix_ms = unix_timestamp_millis();
    }

    fn recompute_unsaved(&mut self) {
        self.has_unsaved_changes = self.draft_query != self.last_executed_query;
    }
}

#[derive(Clone, Default)]
struct ObserverSlot(Option<Arc<dyn RegistryObserver>>);

impl fmt::Debug for ObserverSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObserverSlot")
            .field(&self.0.as_ref().map(|_| "observer"))
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TabRegistry {
    tabs: Vec<Tab>,
    active: Option<TabId>,
    next_id: u64,
    observer: ObserverSlot,
}

impl TabRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_observer(observer: Arc<dyn RegistryObserver>) -> Self {
        Self {
            observer: ObserverSlot(Some(observer)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    #[must_use]
    pub fn tab(&self, tab_id: TabId) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.id == tab_id)
    }

    #[must_use]
    pub fn contains(&self, tab_id: TabId) -> bool {
        self.tab(tab_id).is_some()
    }

    #[must_use]
    pub fn active_tab_id(&self) -> Option<TabId> {
        self.active
    }

    #[must_use]
    pub fn active_tab(&self) -> Option<&Tab> {
        self.active.and_then(|tab_id| self.tab(tab_id))
    }

    #[must_use]
    pub fn unsaved_tab_ids(&self) -> Vec<TabId> {
        self.tabs
            .iter()
            .filter(|tab| tab.has_unsaved_changes)
            .map(|tab| tab.id)
            .collect()
    }

    /// Opens a tab and makes it active. A table name seeds a preview query and
    /// names the tab after the table; otherwise the tab gets the lowest unused
    /// `Query N` name. An explicit initial query wins over the preview query.
    pub fn add_tab(
        &mut self,
        connection_id: ConnectionId,
        initial_query: Option<&str>,
        table_name: Option<&str>,
    ) -> TabId {
        let table_name = table_name.map(str::trim).filter(|name| !name.is_empty());
        let name = match table_name {
            Some(table) => table.to_string(),
            None => self.next_query_name(),
        };
        let query = match (initial_query, table_name) {
            (Some(query), _) => query.to_string(),
            (None, Some(table)) => preview_query(table),
            (None, None) => String::new(),
        };

        let tab_id = self.allocate_id();
        self.tabs
            .push(Tab::new(tab_id, name.clone(), connection_id, query));
        self.emit(&RegistryEvent::TabAdded { tab_id, name });
        self.activate(Some(tab_id));
        tab_id
    }

    /// Removes a tab. When it was active, the tab now at the same index takes
    /// over, else the new last tab, else nothing.
    pub fn remove_tab(&mut self, tab_id: TabId) -> bool {
        let Some(index) = self.position(tab_id) else {
            return false;
        };

        self.tabs.remove(index);
        self.emit(&RegistryEvent::TabRemoved { tab_id });

        if self.active == Some(tab_id) {
            let next = self
                .tabs
                .get(index)
                .or_else(|| self.tabs.last())
                .map(|tab| tab.id);
            self.activate(next);
        }
        true
    }

    /// Switches the active tab. An unknown id leaves a valid pointer alone and
    /// repairs a dangling one to the first tab.
    pub fn set_active_tab(&mut self, tab_id: TabId) -> bool {
        if self.contains(tab_id) {
            self.activate(Some(tab_id));
            return true;
        }

        if self.active_tab().is_none() {
            let fallback = self.tabs.first().map(|tab| tab.id);
            self.activate(fallback);
        }
        false
    }

    pub fn duplicate_tab(&mut self, tab_id: TabId) -> Option<TabId> {
        let source = self.tab(tab_id)?.clone();
        let name = self.copy_name(&source.name);
        let new_id = self.allocate_id();
        let now = unix_timestamp_millis();

        self.tabs.push(Tab {
            id: new_id,
            name,
            // The copy has no request of its own in flight.
            is_executing: false,
            created_at_unix_ms: now,
            updated_at_unix_ms: now,
            ..source
        });
        self.emit(&RegistryEvent::TabDuplicated {
            source: tab_id,
            tab_id: new_id,
        });
        self.activate(Some(new_id));
        Some(new_id)
    }

    pub fn close_all_tabs(&mut self) {
        self.tabs.clear();
        self.active = None;
        self.emit(&RegistryEvent::AllTabsClosed);
    }

    /// Renames a tab. Blank names are ignored.
    pub fn update_tab_name(&mut self, tab_id: TabId, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let Some(tab) = self.tab_mut(tab_id) else {
            return false;
        };
        tab.name = name.to_string();
        tab.touch();
        self.emit(&RegistryEvent::TabRenamed {
            tab_id,
            name: name.to_string(),
        });
        true
    }

    pub fn update_tab_query(&mut self, tab_id: TabId, query: &str) -> bool {
        let Some(tab) = self.tab_mut(tab_id) else {
            return false;
        };
        tab.draft_query = query.to_string();
        tab.recompute_unsaved();
        tab.touch();
        let has_unsaved_changes = tab.has_unsaved_changes;
        self.emit(&RegistryEvent::QueryEdited {
            tab_id,
            has_unsaved_changes,
        });
        true
    }

    pub fn update_tab_editor_state(
        &mut self,
        tab_id: TabId,
        cursor_position: usize,
        scroll_position: usize,
    ) -> bool {
        let Some(tab) = self.tab_mut(tab_id) else {
            return false;
        };
        tab.cursor_position = cursor_position;
        tab.scroll_position = scroll_position;
        true
    }

    /// Moves the saved baseline to `query` without running anything.
    pub fn commit_tab_query(&mut self, tab_id: TabId, query: &str) -> bool {
        let Some(tab) = self.tab_mut(tab_id) else {
            return false;
        };
        tab.last_executed_query = query.to_string();
        tab.recompute_unsaved();
        tab.touch();
        self.emit(&RegistryEvent::QueryCommitted { tab_id });
        true
    }

    /// Entering the executing state clears the previous error.
    pub fn set_tab_executing(&mut self, tab_id: TabId, is_executing: bool) -> bool {
        let Some(tab) = self.tab_mut(tab_id) else {
            return false;
        };
        tab.is_executing = is_executing;
        if is_executing {
            tab.error = None;
        }
        tab.touch();
        self.emit(&RegistryEvent::ExecutionStateChanged {
            tab_id,
            is_executing,
        });
        true
    }

    /// Attaches a fresh result, clears the error and settles execution.
    pub fn set_tab_result(&mut self, tab_id: TabId, result: QueryResult) -> bool {
        let Some(tab) = self.tab_mut(tab_id) else {
            return false;
        };
        tab.result = Some(result);
        tab.error = None;
        tab.is_executing = false;
        tab.touch();
        self.emit(&RegistryEvent::ResultAttached { tab_id });
        true
    }

    /// Attaches an error and settles execution. The last good result stays.
    pub fn set_tab_error(&mut self, tab_id: TabId, message: &str) -> bool {
        let Some(tab) = self.tab_mut(tab_id) else {
            return false;
        };
        tab.error = Some(message.to_string());
        tab.is_executing = false;
        tab.touch();
        self.emit(&RegistryEvent::ErrorAttached {
            tab_id,
            message: message.to_string(),
        });
        true
    }

    /// Marks every dirty draft as saved. Returns the tabs that changed.
    pub fn save_drafts(&mut self) -> Vec<TabId> {
        let mut saved = Vec::new();
        for tab in self.tabs.iter_mut().filter(|tab| tab.has_unsaved_changes) {
            tab.last_executed_query.clone_from(&tab.draft_query);
            tab.recompute_unsaved();
            tab.touch();
            saved.push(tab.id);
        }

        if !saved.is_empty() {
            self.emit(&RegistryEvent::DraftsSaved {
                tab_ids: saved.clone(),
            });
        }
        saved
    }

    fn next_query_name(&self) -> String {
        let used = self
            .tabs
            .iter()
            .filter_map(|tab| tab.name.strip_prefix(QUERY_NAME_PREFIX))
            .filter_map(|suffix| suffix.parse::<u32>().ok())
            .collect::<BTreeSet<_>>();
        format!("{QUERY_NAME_PREFIX}{}", lowest_unused(&used, 1))
    }

    fn copy_name(&self, source_name: &str) -> String {
        let base = copy_base_name(source_name);
        let used = self
            .tabs
            .iter()
            .filter_map(|tab| copy_number(&tab.name, base))
            .collect::<BTreeSet<_>>();

        if used.contains(&1) {
            format!("{base} (Copy {})", lowest_unused(&used, 2))
        } else {
            format!("{base}{COPY_SUFFIX}")
        }
    }

    fn allocate_id(&mut self) -> TabId {
        self.next_id = self.next_id.saturating_add(1);
        TabId(self.next_id)
    }

    fn position(&self, tab_id: TabId) -> Option<usize> {
        self.tabs.iter().position(|tab| tab.id == tab_id)
    }

    fn tab_mut(&mut self, tab_id: TabId) -> Option<&mut Tab> {
        let found = self.tabs.iter_mut().find(|tab| tab.id == tab_id);
        if found.is_none() {
            debug!(%tab_id, "ignoring operation on missing tab");
        }
        found
    }

    fn activate(&mut self, tab_id: Option<TabId>) {
        if self.active != tab_id {
            self.active = tab_id;
            self.emit(&RegistryEvent::ActiveTabChanged { tab_id });
        }
    }

    fn emit(&self, event: &RegistryEvent) {
        debug!(?event, "registry transition");
        if let Some(observer) = &self.observer.0 {
            observer.on_event(event);
        }
    }
}

#[must_use]
pub fn preview_query(table_name: &str) -> String {
    format!("SELECT * FROM {table_name} LIMIT {PREVIEW_LIMIT}")
}

fn lowest_unused(used: &BTreeSet<u32>, start: u32) -> u32 {
    let mut candidate = start;
    while used.contains(&candidate) {
        candidate += 1;
    }
    candidate
}

/// `Report (Copy 3)` and `Report (Copy)` both copy `Report`.
fn copy_base_name(name: &str) -> &str {
    if let Some(base) = name.strip_suffix(COPY_SUFFIX) {
        return base;
    }
    if let Some((base, rest)) = name.rsplit_once(" (Copy ") {
        if rest
            .strip_suffix(')')
            .is_some_and(|number| number.parse::<u32>().is_ok())
        {
            return base;
        }
    }
    name
}

/// `(Copy)` counts as copy number 1.
fn copy_number(name: &str, base: &str) -> Option<u32> {
    let rest = name.strip_prefix(base)?;
    if rest == COPY_SUFFIX {
        return Some(1);
    }
    rest.strip_prefix(" (Copy ")?
        .strip_suffix(')')?
        .parse::<u32>()
        .ok()
}
