//! Ties classification, confirmation and the Query Engine together.
//!
//! Per tab the coordinator moves through
//! `Idle -> AwaitingConfirmation -> Executing -> Idle`, skipping the pause for
//! safe single statements and for requests the caller marks as confirmed.
//! Re-runs and page fetches reuse a clearance only for the exact SQL that was
//! confirmed; a committed query that changed underneath (autosave, manual
//! commit) pauses again.
//! Engine failures never escape as errors: they are written into the tab and
//! reported as [`ExecutionOutcome::Failed`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::confirmation::{ConfirmationKind, ConfirmationPrompt, PendingConfirmation};
use crate::history::{unix_timestamp_millis, HistoryOutcome, HistoryRecord, QueryHistory};
use crate::notifications::{Notification, NotificationSink, TracingNotifier};
use crate::pagination::{plan_page, PageRequest};
use crate::query_result::{QueryEngine, QueryRequest, QueryResult, ResultKind};
use crate::registry::RegistryHandle;
use crate::safety::{classify, SafetyClassification};
use crate::tabs::{Tab, TabId};
use crate::validation::ValidationError;
use crate::ConnectionId;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPhase {
    Idle,
    AwaitingConfirmation(ConfirmationPrompt),
    Executing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(Box<QueryResult>),
    Failed { message: String },
    AwaitingConfirmation(ConfirmationPrompt),
    /// The tab disappeared before or during the request.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionRequestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0} already has a query in flight")]
    Busy(TabId),
    #[error("{0} has no query awaiting confirmation")]
    NoPendingConfirmation(TabId),
    #[error("confirmation is incomplete, still missing {missing:?}")]
    ConfirmationIncomplete { missing: Vec<ConfirmationKind> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPurpose {
    Execute,
    Page,
}

#[derive(Debug)]
struct RunPlan {
    sql: String,
    page: u32,
    page_size: u32,
    commit: bool,
    classification: SafetyClassification,
    purpose: RunPurpose,
}

/// Clears `is_executing` if a run is dropped before it settles.
struct ExecutingGuard<'a> {
    registry: &'a RegistryHandle,
    tab_id: TabId,
    armed: bool,
}

impl ExecutingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(tab_id = %self.tab_id, "execution abandoned before settling");
            self.registry
                .update(|registry| registry.set_tab_executing(self.tab_id, false));
        }
    }
}

pub struct ExecutionCoordinator<E: QueryEngine> {
    engine: E,
    registry: RegistryHandle,
    pending: Mutex<HashMap<TabId, PendingConfirmation>>,
    /// SQL each tab was last cleared to run. Safe SQL never needs clearance.
    cleared: Mutex<HashMap<TabId, String>>,
    notifier: Arc<dyn NotificationSink>,
    history: Option<Arc<dyn QueryHistory>>,
    default_page_size: u32,
}

impl<E: QueryEngine> ExecutionCoordinator<E> {
    #[must_use]
    pub fn new(engine: E, registry: RegistryHandle) -> Self {
        Self {
            engine,
            registry,
            pending: Mutex::new(HashMap::new()),
            cleared: Mutex::new(HashMap::new()),
            notifier: Arc::new(TracingNotifier),
            history: None,
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn QueryHistory>) -> Self {
        self.history = Some(history);
        self
    }

    #[must_use]
    pub fn with_default_page_size(mut self, page_size: u32) -> Self {
        self.default_page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    #[must_use]
    pub fn phase(&self, tab_id: TabId) -> ExecutionPhase {
        if self
            .registry
            .snapshot()
            .tab(tab_id)
            .is_some_and(Tab::is_executing)
        {
            return ExecutionPhase::Executing;
        }
        match self.pending_confirmations().get(&tab_id) {
            Some(pending) => ExecutionPhase::AwaitingConfirmation(pending.prompt()),
            None => ExecutionPhase::Idle,
        }
    }

    /// Runs the tab's draft, pausing for confirmation when it is dangerous or
    /// holds several statements.
    pub async fn execute(&self, tab_id: TabId) -> Result<ExecutionOutcome, ExecutionRequestError> {
        self.submit(tab_id, false).await
    }

    /// Runs the tab's draft without the confirmation pause.
    pub async fn execute_confirmed(
        &self,
        tab_id: TabId,
    ) -> Result<ExecutionOutcome, ExecutionRequestError> {
        self.submit(tab_id, true).await
    }

    pub fn set_confirmation(
        &self,
        tab_id: TabId,
        kind: ConfirmationKind,
        checked: bool,
    ) -> Result<ConfirmationPrompt, ExecutionRequestError> {
        let mut pending = self.pending_confirmations();
        let confirmation = pending
            .get_mut(&tab_id)
            .ok_or(ExecutionRequestError::NoPendingConfirmation(tab_id))?;
        confirmation.set_checked(kind, checked);
        Ok(confirmation.prompt())
    }

    /// Runs the SQL captured when confirmation was requested. Every shown
    /// checkbox must be ticked.
    pub async fn proceed(&self, tab_id: TabId) -> Result<ExecutionOutcome, ExecutionRequestError> {
        // Checked before the confirmation is taken so a busy tab keeps its ticks.
        if self
            .registry
            .snapshot()
            .tab(tab_id)
            .is_some_and(Tab::is_executing)
        {
            return Err(ExecutionRequestError::Busy(tab_id));
        }
        let confirmation = match self.pending_confirmations().entry(tab_id) {
            Entry::Vacant(_) => return Err(ExecutionRequestError::NoPendingConfirmation(tab_id)),
            Entry::Occupied(entry) if !entry.get().can_proceed() => {
                return Err(ExecutionRequestError::ConfirmationIncomplete {
                    missing: entry.get().missing(),
                });
            }
            Entry::Occupied(entry) => entry.remove(),
        };

        let page_size = self.page_size_for(tab_id);
        info!(%tab_id, "confirmation granted");
        let outcome = self
            .run(
                tab_id,
                RunPlan {
                    sql: confirmation.sql().to_string(),
                    page: 1,
                    page_size,
                    commit: true,
                    classification: confirmation.classification().clone(),
                    purpose: RunPurpose::Execute,
                },
            )
            .await;
        if outcome == Err(ExecutionRequestError::Busy(tab_id)) {
            self.pending_confirmations()
                .entry(tab_id)
                .or_insert(confirmation);
        }
        outcome
    }

    pub fn cancel_confirmation(&self, tab_id: TabId) -> bool {
        let cancelled = self.pending_confirmations().remove(&tab_id).is_some();
        if cancelled {
            info!(%tab_id, "confirmation cancelled");
        }
        cancelled
    }

    /// Drops any confirmation state held for a tab that was closed.
    pub fn forget_tab(&self, tab_id: TabId) {
        self.pending_confirmations().remove(&tab_id);
        self.cleared_queries().remove(&tab_id);
    }

    pub fn forget_all(&self) {
        self.pending_confirmations().clear();
        self.cleared_queries().clear();
    }

    /// Re-executes the committed query from page 1. A query that was already
    /// confirmed runs straight away; one that needs confirmation but was never
    /// cleared pauses like a fresh execution.
    pub async fn rerun(&self, tab_id: TabId) -> Result<ExecutionOutcome, ExecutionRequestError> {
        let Some(sql) = self.committed_query(tab_id)? else {
            return Ok(ExecutionOutcome::Discarded);
        };
        let classification = classify(&sql)?;
        if !self.is_cleared(tab_id, &sql, &classification) {
            return Ok(self.await_confirmation(tab_id, sql, classification));
        }
        let page_size = self.page_size_for(tab_id);
        self.run(
            tab_id,
            RunPlan {
                sql,
                page: 1,
                page_size,
                commit: false,
                classification,
                purpose: RunPurpose::Execute,
            },
        )
        .await
    }

    /// Fetches another page of the committed query. Out-of-range requests are
    /// rejected without contacting the engine and leave the tab untouched.
    pub async fn fetch_page(
        &self,
        tab_id: TabId,
        request: PageRequest,
    ) -> Result<ExecutionOutcome, ExecutionRequestError> {
        let cursor = {
            let snapshot = self.registry.snapshot();
            let Some(tab) = snapshot.tab(tab_id) else {
                debug!(%tab_id, "page request for missing tab");
                return Ok(ExecutionOutcome::Discarded);
            };
            if tab.is_executing() {
                return Err(ExecutionRequestError::Busy(tab_id));
            }
            match plan_page(tab, request) {
                Ok(cursor) => cursor,
                Err(error) => {
                    self.notifier
                        .notify(Notification::warning("Invalid page", error.to_string()));
                    return Err(error.into());
                }
            }
        };

        let classification = classify(&cursor.sql)?;
        if !self.is_cleared(tab_id, &cursor.sql, &classification) {
            return Ok(self.await_confirmation(tab_id, cursor.sql, classification));
        }
        self.run(
            tab_id,
            RunPlan {
                sql: cursor.sql,
                page: cursor.page,
                page_size: cursor.page_size,
                commit: false,
                classification,
                purpose: RunPurpose::Page,
            },
        )
        .await
    }

    async fn submit(
        &self,
        tab_id: TabId,
        confirmed: bool,
    ) -> Result<ExecutionOutcome, ExecutionRequestError> {
        let sql = {
            let snapshot = self.registry.snapshot();
            let Some(tab) = snapshot.tab(tab_id) else {
                debug!(%tab_id, "execute request for missing tab");
                return Ok(ExecutionOutcome::Discarded);
            };
            if tab.is_executing() {
                return Err(ExecutionRequestError::Busy(tab_id));
            }
            tab.draft_query().to_string()
        };

        let classification = match classify(&sql) {
            Ok(classification) => classification,
            Err(error) => {
                self.notifier
                    .notify(Notification::warning("Nothing to execute", error.to_string()));
                return Err(error.into());
            }
        };

        if classification.requires_confirmation() && !confirmed {
            return Ok(self.await_confirmation(tab_id, sql, classification));
        }

        self.pending_confirmations().remove(&tab_id);
        let page_size = self.page_size_for(tab_id);
        self.run(
            tab_id,
            RunPlan {
                sql,
                page: 1,
                page_size,
                commit: true,
                classification,
                purpose: RunPurpose::Execute,
            },
        )
        .await
    }

    fn await_confirmation(
        &self,
        tab_id: TabId,
        sql: String,
        classification: SafetyClassification,
    ) -> ExecutionOutcome {
        let pending = PendingConfirmation::new(sql, classification);
        let prompt = pending.prompt();
        self.pending_confirmations().insert(tab_id, pending);
        info!(%tab_id, warnings = ?prompt.warnings, "awaiting confirmation");
        self.notifier.notify(Notification::warning(
            "Confirmation required",
            prompt.warnings.join("; "),
        ));
        ExecutionOutcome::AwaitingConfirmation(prompt)
    }

    fn is_cleared(
        &self,
        tab_id: TabId,
        sql: &str,
        classification: &SafetyClassification,
    ) -> bool {
        !classification.requires_confirmation()
            || self
                .cleared_queries()
                .get(&tab_id)
                .is_some_and(|cleared| cleared == sql)
    }

    async fn run(
        &self,
        tab_id: TabId,
        plan: RunPlan,
    ) -> Result<ExecutionOutcome, ExecutionRequestError> {
        let started = self.registry.update(|registry| {
            let tab = registry.tab(tab_id)?;
            if tab.is_executing() {
                return Some(Err(ExecutionRequestError::Busy(tab_id)));
            }
            let context = (tab.name().to_string(), tab.connection_id());
            if plan.commit {
                registry.commit_tab_query(tab_id, &plan.sql);
            }
            registry.set_tab_executing(tab_id, true);
            Some(Ok(context))
        });
        if plan.commit && matches!(started, Some(Ok(_))) {
            self.cleared_queries().insert(tab_id, plan.sql.clone());
        }
        let (tab_name, connection_id) = match started {
            Some(started) => started?,
            None => {
                debug!(%tab_id, "tab closed before execution started");
                return Ok(ExecutionOutcome::Discarded);
            }
        };

        let mut guard = ExecutingGuard {
            registry: &self.registry,
            tab_id,
            armed: true,
        };
        let request = QueryRequest {
            connection_id,
            sql: plan.sql.trim().to_string(),
            page: plan.page,
            page_size: plan.page_size,
            allow_multiple: plan.classification.is_multi_statement,
            confirm_dangerous: plan.classification.is_dangerous,
        };
        info!(
            %tab_id,
            connection_id,
            page = request.page,
            page_size = request.page_size,
            statements = plan.classification.statement_count,
            "executing query"
        );

        let settled = match self.engine.execute(&request).await {
            Ok(result) if !result.is_error() => Ok(result),
            Ok(result) => Err(result
                .message
                .unwrap_or_else(|| "Query execution failed".to_string())),
            Err(error) => Err(error.message().to_string()),
        };
        self.record_history(connection_id, &tab_name, &request, &settled);

        let outcome = match settled {
            Ok(result) => {
                let attached = self
                    .registry
                    .update(|registry| registry.set_tab_result(tab_id, result.clone()));
                if attached {
                    info!(%tab_id, kind = ?result.kind, "query settled");
                    self.notifier.notify(success_notification(plan.purpose, &result));
                    ExecutionOutcome::Completed(Box::new(result))
                } else {
                    ExecutionOutcome::Discarded
                }
            }
            Err(message) => {
                let attached = self
                    .registry
                    .update(|registry| registry.set_tab_error(tab_id, &message));
                if attached {
                    warn!(%tab_id, error = %message, "query failed");
                    self.notifier
                        .notify(Notification::error("Query execution failed", message.clone()));
                    ExecutionOutcome::Failed { message }
                } else {
                    ExecutionOutcome::Discarded
                }
            }
        };

        guard.disarm();
        if outcome == ExecutionOutcome::Discarded {
            debug!(%tab_id, "tab closed mid-flight, response discarded");
        }
        Ok(outcome)
    }

    fn committed_query(&self, tab_id: TabId) -> Result<Option<String>, ExecutionRequestError> {
        let snapshot = self.registry.snapshot();
        let Some(tab) = snapshot.tab(tab_id) else {
            return Ok(None);
        };
        if tab.is_executing() {
            return Err(ExecutionRequestError::Busy(tab_id));
        }
        if tab.last_executed_query().trim().is_empty() {
            return Err(ValidationError::NothingExecuted.into());
        }
        Ok(Some(tab.last_executed_query().to_string()))
    }

    /// Keeps the page size the user last picked for this tab.
    fn page_size_for(&self, tab_id: TabId) -> u32 {
        self.registry
            .snapshot()
            .tab(tab_id)
            .and_then(Tab::result)
            .and_then(QueryResult::page_info)
            .map_or(self.default_page_size, |page| page.page_size)
    }

    fn record_history(
        &self,
        connection_id: ConnectionId,
        tab_name: &str,
        request: &QueryRequest,
        settled: &Result<QueryResult, String>,
    ) {
        let Some(history) = &self.history else {
            return;
        };
        let (outcome, execution_time_ms, error) = match settled {
            Ok(result) => (
                HistoryOutcome::Succeeded,
                Some(result.execution_time_ms),
                None,
            ),
            Err(message) => (HistoryOutcome::Failed, None, Some(message.clone())),
        };
        let record = HistoryRecord {
            timestamp_unix_ms: unix_timestamp_millis(),
            connection_id,
            tab_name: tab_name.to_string(),
            sql: request.sql.clone(),
            page: request.page,
            outcome,
            execution_time_ms,
            error,
        };
        if let Err(error) = history.record(&record) {
            warn!(%error, "failed to record query history");
        }
    }

    fn cleared_queries(&self) -> MutexGuard<'_, HashMap<TabId, String>> {
        self.cleared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_confirmations(&self) -> MutexGuard<'_, HashMap<TabId, PendingConfirmation>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn success_notification(purpose: RunPurpose, result: &QueryResult) -> Notification {
    if purpose == RunPurpose::Page {
        if let Some(page) = result.page_info() {
            return Notification::info(
                "Page loaded",
                format!("Page {} of {}", page.page, page.total_pages),
            );
        }
    }

    let description = match (result.kind, result.page_info()) {
        (ResultKind::Select, Some(page)) => format!(
            "{} row(s) in {:.1} ms, page {} of {}",
            page.total_rows, result.execution_time_ms, page.page, page.total_pages
        ),
        _ => result
            .message
            .clone()
            .unwrap_or_else(|| format!("Completed in {:.1} ms", result.execution_time_ms)),
    };
    Notification::info("Query executed", description)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::{mpsc, Semaphore};

    use super::{ExecutionCoordinator, ExecutionOutcome, ExecutionPhase, ExecutionRequestError};
    use crate::confirmation::ConfirmationKind;
    use crate::history::{HistoryError, HistoryOutcome, HistoryRecord, QueryHistory};
    use crate::notifications::{Notification, Severity};
    use crate::pagination::PageRequest;
    use crate::query_result::{
        ColumnInfo, PageInfo, QueryEngine, QueryEngineError, QueryRequest, QueryResult,
    };
    use crate::registry::RegistryHandle;
    use crate::tabs::TabId;
    use crate::validation::ValidationError;

    const TOTAL_ROWS: u64 = 50;

    #[derive(Debug, Default)]
    struct FakeEngine {
        calls: Mutex<Vec<QueryRequest>>,
        responses: Mutex<VecDeque<Result<QueryResult, QueryEngineError>>>,
        gate: Option<Arc<Semaphore>>,
    }

    impl FakeEngine {
        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        fn respond_with(&self, response: Result<QueryResult, QueryEngineError>) {
            self.responses
                .lock()
                .expect("responses lock")
                .push_back(response);
        }

        fn calls(&self) -> Vec<QueryRequest> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl QueryEngine for FakeEngine {
        async fn execute(&self, request: &QueryRequest) -> Result<QueryResult, QueryEngineError> {
            self.calls.lock().expect("calls lock").push(request.clone());
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate open").forget();
            }
            let scripted = self.responses.lock().expect("responses lock").pop_front();
            scripted.unwrap_or_else(|| {
                Ok(QueryResult::select(
                    vec![ColumnInfo::new("id", "LONG")],
                    vec![vec![json!(request.page)]],
                    PageInfo::new(request.page, request.page_size, TOTAL_ROWS),
                ))
            })
        }
    }

    #[derive(Debug, Default)]
    struct RecordingHistory {
        records: Mutex<Vec<HistoryRecord>>,
    }

    impl QueryHistory for RecordingHistory {
        fn record(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
            self.records
                .lock()
                .expect("history lock")
                .push(record.clone());
            Ok(())
        }
    }

    fn coordinator_with(engine: FakeEngine) -> ExecutionCoordinator<FakeEngine> {
        ExecutionCoordinator::new(engine, RegistryHandle::default())
    }

    fn open_tab(coordinator: &ExecutionCoordinator<FakeEngine>, sql: &str) -> TabId {
        coordinator.registry().update(|registry| {
            let tab_id = registry.add_tab(1, None, None);
            registry.update_tab_query(tab_id, sql);
            tab_id
        })
    }

    async fn wait_until_executing(registry: &RegistryHandle, tab_ids: &[TabId]) {
        loop {
            let snapshot = registry.snapshot();
            if tab_ids
                .iter()
                .all(|tab_id| snapshot.tab(*tab_id).is_some_and(|tab| tab.is_executing()))
            {
                return;
            }
            drop(snapshot);
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn safe_query_executes_and_commits_draft() {
        let coordinator = coordinator_with(FakeEngine::default());
        let tab_id = open_tab(&coordinator, "  SELECT * FROM t WHERE id=1  ");

        let outcome = coordinator.execute(tab_id).await.expect("request accepted");
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));

        let calls = coordinator.engine().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].sql, "SELECT * FROM t WHERE id=1");
        assert_eq!((calls[0].page, calls[0].page_size), (1, 10));
        assert!(!calls[0].allow_multiple);
        assert!(!calls[0].confirm_dangerous);

        let snapshot = coordinator.registry().snapshot();
        let tab = snapshot.tab(tab_id).expect("tab");
        assert!(!tab.is_executing());
        assert!(!tab.has_unsaved_changes());
        assert_eq!(tab.last_executed_query(), "  SELECT * FROM t WHERE id=1  ");
        assert!(tab.result().is_some());
        assert_eq!(tab.error(), None);
        assert_eq!(coordinator.phase(tab_id), ExecutionPhase::Idle);
    }

    #[tokio::test]
    async fn blank_draft_never_reaches_engine() {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Notification>();
        let coordinator = coordinator_with(FakeEngine::default()).with_notifier(Arc::new(sender));
        let tab_id = open_tab(&coordinator, "   \n ");

        let err = coordinator
            .execute(tab_id)
            .await
            .expect_err("blank query should be rejected");
        assert_eq!(
            err,
            ExecutionRequestError::Validation(ValidationError::EmptyQuery)
        );
        assert!(coordinator.engine().calls().is_empty());

        let snapshot = coordinator.registry().snapshot();
        let tab = snapshot.tab(tab_id).expect("tab");
        assert_eq!(tab.error(), None);
        assert!(!tab.is_executing());

        let notification = receiver.try_recv().expect("validation is surfaced");
        assert_eq!(notification.severity, Severity::Warning);
    }

    #[tokio::test]
    async fn dangerous_multi_statement_waits_for_both_checkboxes() {
        let coordinator = coordinator_with(FakeEngine::default());
        let sql = "DELETE FROM users; DROP TABLE sessions";
        let tab_id = open_tab(&coordinator, sql);

        let outcome = coordinator.execute(tab_id).await.expect("request accepted");
        let ExecutionOutcome::AwaitingConfirmation(prompt) = outcome else {
            panic!("dangerous multi-statement SQL must pause, got {outcome:?}");
        };
        assert_eq!(prompt.sql, sql);
        assert_eq!(prompt.checkboxes.len(), 2);
        assert!(!prompt.can_proceed);
        assert!(coordinator.engine().calls().is_empty());
        assert!(matches!(
            coordinator.phase(tab_id),
            ExecutionPhase::AwaitingConfirmation(_)
        ));

        let prompt = coordinator
            .set_confirmation(tab_id, ConfirmationKind::MultipleStatements, true)
            .expect("pending confirmation");
        assert!(!prompt.can_proceed);
        let err = coordinator
            .proceed(tab_id)
            .await
            .expect_err("one checkbox is not enough");
        assert_eq!(
            err,
            ExecutionRequestError::ConfirmationIncomplete {
                missing: vec![ConfirmationKind::DataModification]
            }
        );
        assert!(coordinator.engine().calls().is_empty());

        let prompt = coordinator
            .set_confirmation(tab_id, ConfirmationKind::DataModification, true)
            .expect("pending confirmation");
        assert!(prompt.can_proceed);

        let outcome = coordinator.proceed(tab_id).await.expect("confirmed run");
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
        let calls = coordinator.engine().calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].allow_multiple);
        assert!(calls[0].confirm_dangerous);
        assert_eq!(coordinator.phase(tab_id), ExecutionPhase::Idle);
    }

    #[tokio::test]
    async fn proceed_runs_the_sql_that_was_confirmed() {
        let coordinator = coordinator_with(FakeEngine::default());
        let tab_id = open_tab(&coordinator, "DELETE FROM users");
        coordinator.execute(tab_id).await.expect("request accepted");

        coordinator
            .registry()
            .update(|registry| registry.update_tab_query(tab_id, "DELETE FROM orders"));
        coordinator
            .set_confirmation(tab_id, ConfirmationKind::DataModification, true)
            .expect("pending confirmation");
        coordinator.proceed(tab_id).await.expect("confirmed run");

        assert_eq!(coordinator.engine().calls()[0].sql, "DELETE FROM users");
        let snapshot = coordinator.registry().snapshot();
        let tab = snapshot.tab(tab_id).expect("tab");
        assert_eq!(tab.last_executed_query(), "DELETE FROM users");
        assert!(tab.has_unsaved_changes());
    }

    #[tokio::test]
    async fn cancelling_confirmation_returns_to_idle() {
        let coordinator = coordinator_with(FakeEngine::default());
        let tab_id = open_tab(&coordinator, "TRUNCATE TABLE logs");
        coordinator.execute(tab_id).await.expect("request accepted");

        assert!(coordinator.cancel_confirmation(tab_id));
        assert!(!coordinator.cancel_confirmation(tab_id));
        assert_eq!(coordinator.phase(tab_id), ExecutionPhase::Idle);
        assert_eq!(
            coordinator.proceed(tab_id).await,
            Err(ExecutionRequestError::NoPendingConfirmation(tab_id))
        );
        assert!(coordinator.engine().calls().is_empty());

        let snapshot = coordinator.registry().snapshot();
        let tab = snapshot.tab(tab_id).expect("tab");
        assert!(!tab.is_executing());
        assert_eq!(tab.last_executed_query(), "");
    }

    #[tokio::test]
    async fn caller_confirmed_request_skips_the_pause() {
        let coordinator = coordinator_with(FakeEngine::default());
        let tab_id = open_tab(&coordinator, "SELECT 1; SELECT 2");

        let outcome = coordinator
            .execute_confirmed(tab_id)
            .await
            .expect("request accepted");
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
        assert!(coordinator.engine().calls()[0].allow_multiple);
    }

    #[tokio::test]
    async fn engine_failure_keeps_last_good_result() {
        let coordinator = coordinator_with(FakeEngine::default());
        let tab_id = open_tab(&coordinator, "SELECT * FROM t");
        coordinator.execute(tab_id).await.expect("first run");
        let first_result = coordinator
            .registry()
            .snapshot()
            .tab(tab_id)
            .and_then(|tab| tab.result().cloned())
            .expect("first result");

        coordinator
            .engine()
            .respond_with(Err(QueryEngineError::new("You have an error in your SQL syntax")));
        coordinator
            .registry()
            .update(|registry| registry.update_tab_query(tab_id, "SELEC * FROM t"));

        let outcome = coordinator.execute(tab_id).await.expect("request accepted");
        assert_eq!(
            outcome,
            ExecutionOutcome::Failed {
                message: "You have an error in your SQL syntax".to_string()
            }
        );

        let snapshot = coordinator.registry().snapshot();
        let tab = snapshot.tab(tab_id).expect("tab");
        assert!(!tab.is_executing());
        assert_eq!(tab.error(), Some("You have an error in your SQL syntax"));
        assert_eq!(tab.result(), Some(&first_result));
        assert_eq!(tab.last_executed_query(), "SELEC * FROM t");
    }

    #[tokio::test]
    async fn error_typed_result_counts_as_failure() {
        let coordinator = coordinator_with(FakeEngine::default());
        coordinator
            .engine()
            .respond_with(Ok(QueryResult::error("Table 'app.nope' doesn't exist")));
        let tab_id = open_tab(&coordinator, "SELECT * FROM nope");

        let outcome = coordinator.execute(tab_id).await.expect("request accepted");
        assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));
        let snapshot = coordinator.registry().snapshot();
        let tab = snapshot.tab(tab_id).expect("tab");
        assert!(tab.result().is_none());
        assert_eq!(tab.error(), Some("Table 'app.nope' doesn't exist"));
    }

    #[tokio::test]
    async fn out_of_range_pages_are_rejected_locally() {
        let coordinator = coordinator_with(FakeEngine::default());
        let tab_id = open_tab(&coordinator, "SELECT * FROM events");
        coordinator.execute(tab_id).await.expect("first run");
        let before = coordinator
            .registry()
            .snapshot()
            .tab(tab_id)
            .and_then(|tab| tab.result().cloned());

        for page in [0, 6] {
            let err = coordinator
                .fetch_page(tab_id, PageRequest::Goto(page))
                .await
                .expect_err("page is out of range");
            assert_eq!(
                err,
                ExecutionRequestError::Validation(ValidationError::PageOutOfRange {
                    page,
                    total_pages: 5
                })
            );
        }

        assert_eq!(coordinator.engine().calls().len(), 1);
        let snapshot = coordinator.registry().snapshot();
        let tab = snapshot.tab(tab_id).expect("tab");
        assert_eq!(tab.result().cloned(), before);
        assert_eq!(tab.error(), None);
    }

    #[tokio::test]
    async fn next_page_reissues_committed_query_and_leaves_draft_alone() {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Notification>();
        let coordinator = coordinator_with(FakeEngine::default()).with_notifier(Arc::new(sender));
        let tab_id = open_tab(&coordinator, "SELECT * FROM events");
        coordinator.execute(tab_id).await.expect("first run");
        coordinator
            .registry()
            .update(|registry| registry.update_tab_query(tab_id, "SELECT 'draft'"));

        let outcome = coordinator
            .fetch_page(tab_id, PageRequest::Next)
            .await
            .expect("page request accepted");
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));

        let calls = coordinator.engine().calls();
        assert_eq!(calls[1].sql, "SELECT * FROM events");
        assert_eq!(calls[1].page, 2);

        let snapshot = coordinator.registry().snapshot();
        let tab = snapshot.tab(tab_id).expect("tab");
        assert_eq!(tab.draft_query(), "SELECT 'draft'");
        assert_eq!(tab.last_executed_query(), "SELECT * FROM events");
        assert!(tab.has_unsaved_changes());
        assert_eq!(
            tab.result().and_then(QueryResult::page_info).map(|p| p.page),
            Some(2)
        );

        let titles = std::iter::from_fn(|| receiver.try_recv().ok())
            .map(|notification| notification.title)
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["Query executed", "Page loaded"]);
    }

    #[tokio::test]
    async fn resizing_restarts_at_page_one_and_sticks_for_reruns() {
        let coordinator = coordinator_with(FakeEngine::default());
        let tab_id = open_tab(&coordinator, "SELECT * FROM events");
        coordinator.execute(tab_id).await.expect("first run");
        coordinator
            .fetch_page(tab_id, PageRequest::Goto(3))
            .await
            .expect("page 3");

        coordinator
            .fetch_page(tab_id, PageRequest::Resize(25))
            .await
            .expect("resize");
        coordinator.rerun(tab_id).await.expect("rerun");

        let calls = coordinator.engine().calls();
        assert_eq!((calls[2].page, calls[2].page_size), (1, 25));
        assert_eq!((calls[3].page, calls[3].page_size), (1, 25));
    }

    #[tokio::test]
    async fn rerun_of_dangerous_committed_query_needs_no_confirmation() {
        let coordinator = coordinator_with(FakeEngine::default());
        let tab_id = open_tab(&coordinator, "DELETE FROM audit_log");
        coordinator
            .execute_confirmed(tab_id)
            .await
            .expect("confirmed run");

        let outcome = coordinator.rerun(tab_id).await.expect("rerun accepted");
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
        let calls = coordinator.engine().calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].confirm_dangerous);
    }

    #[tokio::test]
    async fn autosaved_dangerous_draft_pauses_before_rerun_or_paging() {
        let coordinator = coordinator_with(FakeEngine::default());
        let tab_id = open_tab(&coordinator, "SELECT * FROM events");
        coordinator.execute(tab_id).await.expect("first run");
        coordinator.registry().update(|registry| {
            registry.update_tab_query(tab_id, "DELETE FROM events");
            registry.save_drafts()
        });

        let outcome = coordinator
            .fetch_page(tab_id, PageRequest::Next)
            .await
            .expect("page request accepted");
        let ExecutionOutcome::AwaitingConfirmation(prompt) = outcome else {
            panic!("unconfirmed DELETE must pause, got {outcome:?}");
        };
        assert_eq!(prompt.sql, "DELETE FROM events");
        assert!(coordinator.cancel_confirmation(tab_id));

        let outcome = coordinator.rerun(tab_id).await.expect("rerun accepted");
        assert!(matches!(outcome, ExecutionOutcome::AwaitingConfirmation(_)));
        assert_eq!(coordinator.engine().calls().len(), 1);

        coordinator
            .set_confirmation(tab_id, ConfirmationKind::DataModification, true)
            .expect("pending confirmation");
        coordinator.proceed(tab_id).await.expect("confirmed run");
        coordinator.rerun(tab_id).await.expect("cleared rerun");

        let calls = coordinator.engine().calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1..].iter().all(|call| call.sql == "DELETE FROM events"));
        assert!(calls[2].confirm_dangerous);
    }

    #[tokio::test]
    async fn committing_different_sql_revokes_earlier_clearance() {
        let coordinator = coordinator_with(FakeEngine::default());
        let tab_id = open_tab(&coordinator, "DELETE FROM audit_log");
        coordinator
            .execute_confirmed(tab_id)
            .await
            .expect("confirmed run");
        coordinator
            .registry()
            .update(|registry| registry.commit_tab_query(tab_id, "DROP TABLE audit_log"));

        let outcome = coordinator.rerun(tab_id).await.expect("rerun accepted");
        assert!(matches!(outcome, ExecutionOutcome::AwaitingConfirmation(_)));
        assert_eq!(coordinator.engine().calls().len(), 1);
    }

    #[tokio::test]
    async fn busy_proceed_keeps_ticked_checkboxes() {
        let gate = Arc::new(Semaphore::new(0));
        let coordinator = coordinator_with(FakeEngine::gated(Arc::clone(&gate)));
        let tab_id = open_tab(&coordinator, "SELECT * FROM events");
        gate.add_permits(1);
        coordinator.execute(tab_id).await.expect("first run");

        coordinator
            .registry()
            .update(|registry| registry.update_tab_query(tab_id, "TRUNCATE TABLE events"));
        coordinator.execute(tab_id).await.expect("request accepted");
        coordinator
            .set_confirmation(tab_id, ConfirmationKind::DataModification, true)
            .expect("pending confirmation");
        let registry = coordinator.registry().clone();

        let (page, busy) = tokio::join!(
            coordinator.fetch_page(tab_id, PageRequest::Next),
            async {
                wait_until_executing(&registry, &[tab_id]).await;
                let busy = coordinator.proceed(tab_id).await;
                gate.add_permits(1);
                busy
            }
        );

        assert!(matches!(page, Ok(ExecutionOutcome::Completed(_))));
        assert_eq!(busy, Err(ExecutionRequestError::Busy(tab_id)));
        let ExecutionPhase::AwaitingConfirmation(prompt) = coordinator.phase(tab_id) else {
            panic!("confirmation should survive a busy tab");
        };
        assert!(prompt.can_proceed);
    }

    #[tokio::test]
    async fn rerun_without_committed_query_is_a_validation_error() {
        let coordinator = coordinator_with(FakeEngine::default());
        let tab_id = open_tab(&coordinator, "SELECT 1");
        assert_eq!(
            coordinator.rerun(tab_id).await,
            Err(ExecutionRequestError::Validation(
                ValidationError::NothingExecuted
            ))
        );
    }

    #[tokio::test]
    async fn closing_a_tab_mid_flight_discards_the_response() {
        let gate = Arc::new(Semaphore::new(0));
        let coordinator = coordinator_with(FakeEngine::gated(Arc::clone(&gate)));
        let tab_id = open_tab(&coordinator, "SELECT * FROM slow");
        let registry = coordinator.registry().clone();

        let (outcome, ()) = tokio::join!(coordinator.execute(tab_id), async {
            wait_until_executing(&registry, &[tab_id]).await;
            registry.update(|registry| registry.remove_tab(tab_id));
            gate.add_permits(1);
        });

        assert_eq!(outcome, Ok(ExecutionOutcome::Discarded));
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn tabs_execute_independently_and_reject_resubmission() {
        let gate = Arc::new(Semaphore::new(0));
        let coordinator = coordinator_with(FakeEngine::gated(Arc::clone(&gate)));
        let first = open_tab(&coordinator, "SELECT 1");
        let second = open_tab(&coordinator, "SELECT 2");
        let registry = coordinator.registry().clone();

        let (first_outcome, second_outcome, busy) = tokio::join!(
            coordinator.execute(first),
            coordinator.execute(second),
            async {
                wait_until_executing(&registry, &[first, second]).await;
                assert_eq!(coordinator.phase(first), ExecutionPhase::Executing);
                let busy = coordinator.execute(first).await;
                gate.add_permits(2);
                busy
            }
        );

        assert_eq!(busy, Err(ExecutionRequestError::Busy(first)));
        assert!(matches!(first_outcome, Ok(ExecutionOutcome::Completed(_))));
        assert!(matches!(second_outcome, Ok(ExecutionOutcome::Completed(_))));
        let snapshot = registry.snapshot();
        assert!(snapshot.tabs().iter().all(|tab| !tab.is_executing()));
        assert_eq!(coordinator.engine().calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_request_still_clears_executing_flag() {
        let gate = Arc::new(Semaphore::new(0));
        let coordinator = coordinator_with(FakeEngine::gated(gate));
        let tab_id = open_tab(&coordinator, "SELECT SLEEP(60)");

        let timed_out =
            tokio::time::timeout(Duration::from_secs(1), coordinator.execute(tab_id)).await;
        assert!(timed_out.is_err());

        let snapshot = coordinator.registry().snapshot();
        assert!(!snapshot.tab(tab_id).expect("tab").is_executing());
        assert_eq!(coordinator.phase(tab_id), ExecutionPhase::Idle);
    }

    #[tokio::test]
    async fn missing_tab_requests_are_discarded() {
        let coordinator = coordinator_with(FakeEngine::default());
        let tab_id = open_tab(&coordinator, "SELECT 1");
        coordinator
            .registry()
            .update(|registry| registry.remove_tab(tab_id));

        assert_eq!(
            coordinator.execute(tab_id).await,
            Ok(ExecutionOutcome::Discarded)
        );
        assert_eq!(
            coordinator.fetch_page(tab_id, PageRequest::Next).await,
            Ok(ExecutionOutcome::Discarded)
        );
        assert!(coordinator.engine().calls().is_empty());
    }

    #[tokio::test]
    async fn every_engine_round_trip_is_recorded_in_history() {
        let history = Arc::new(RecordingHistory::default());
        let coordinator =
            coordinator_with(FakeEngine::default()).with_history(history.clone());
        let tab_id = open_tab(&coordinator, "SELECT * FROM events");
        coordinator.execute(tab_id).await.expect("first run");
        coordinator
            .engine()
            .respond_with(Err(QueryEngineError::new("connection lost")));
        coordinator
            .fetch_page(tab_id, PageRequest::Next)
            .await
            .expect("page request accepted");

        let records = history.records.lock().expect("history lock").clone();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, HistoryOutcome::Succeeded);
        assert_eq!(records[0].tab_name, "Query 1");
        assert_eq!(records[1].outcome, HistoryOutcome::Failed);
        assert_eq!(records[1].page, 2);
        assert_eq!(records[1].error.as_deref(), Some("connection lost"));
    }
}
