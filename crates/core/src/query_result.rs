use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ConnectionId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Select,
    Write,
    Ddl,
    Multi,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

impl ColumnInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Position of one page inside a paginated result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub total_rows: u64,
}

impl PageInfo {
    #[must_use]
    pub fn new(page: u32, page_size: u32, total_rows: u64) -> Self {
        Self {
            page,
            page_size,
            total_pages: total_pages_for(total_rows, page_size),
            total_rows,
        }
    }
}

/// `max(1, ceil(total_rows / page_size))`; an empty result still has one page.
#[must_use]
pub fn total_pages_for(total_rows: u64, page_size: u32) -> u32 {
    if total_rows == 0 || page_size == 0 {
        return 1;
    }
    let pages = total_rows.div_ceil(u64::from(page_size));
    u32::try_from(pages).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    #[serde(rename = "type")]
    pub kind: ResultKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
    #[serde(default)]
    pub results: Vec<QueryResult>,
    #[serde(default)]
    pub execution_time_ms: f64,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub is_dangerous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl QueryResult {
    fn empty(kind: ResultKind) -> Self {
        Self {
            kind,
            query_type: None,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: None,
            total_rows: None,
            page: None,
            page_size: None,
            total_pages: None,
            affected_rows: None,
            results: Vec::new(),
            execution_time_ms: 0.0,
            warnings: Vec::new(),
            is_dangerous: false,
            message: None,
        }
    }

    #[must_use]
    pub fn select(
        columns: Vec<ColumnInfo>,
        rows: Vec<Vec<serde_json::Value>>,
        page: PageInfo,
    ) -> Self {
        let mut result = Self::empty(ResultKind::Select);
        result.query_type = Some("select".to_string());
        result.row_count = Some(rows.len() as u64);
        result.columns = columns;
        result.rows = rows;
        result.set_page(page);
        result
    }

    #[must_use]
    pub fn write(query_type: impl Into<String>, affected_rows: u64) -> Self {
        let query_type = query_type.into();
        let mut result = Self::empty(ResultKind::Write);
        result.message = Some(format!(
            "{} completed successfully - {affected_rows} row(s) affected",
            query_type.to_ascii_uppercase()
        ));
        result.query_type = Some(query_type);
        result.affected_rows = Some(affected_rows);
        result
    }

    #[must_use]
    pub fn ddl(query_type: impl Into<String>, message: impl Into<String>) -> Self {
        let mut result = Self::empty(ResultKind::Ddl);
        result.query_type = Some(query_type.into());
        result.message = Some(message.into());
        result
    }

    /// Wraps per-statement results. Page data of a trailing select is lifted
    /// to the top level so a multi-statement script can still be paged.
    #[must_use]
    pub fn multi(results: Vec<QueryResult>) -> Self {
        let mut result = Self::empty(ResultKind::Multi);
        result.query_type = Some("multiple".to_string());
        result.message = Some(format!("Executed {} statements successfully", results.len()));

        let total_affected = results
            .iter()
            .filter_map(|statement| statement.affected_rows)
            .sum::<u64>();
        result.affected_rows = (total_affected > 0).then_some(total_affected);

        if let Some(last) = results.last().filter(|last| last.kind == ResultKind::Select) {
            result.columns.clone_from(&last.columns);
            result.rows.clone_from(&last.rows);
            result.row_count = last.row_count;
            if let Some(page) = last.page_info() {
                result.set_page(page);
            }
        }

        result.warnings = results
            .iter()
            .flat_map(|statement| statement.warnings.iter().cloned())
            .collect();
        result.is_dangerous = results.iter().any(|statement| statement.is_dangerous);
        result.results = results;
        result
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        let mut result = Self::empty(ResultKind::Error);
        result.message = Some(message.into());
        result
    }

    #[must_use]
    pub fn with_execution_time_ms(mut self, execution_time_ms: f64) -> Self {
        self.execution_time_ms = execution_time_ms;
        self
    }

    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>, is_dangerous: bool) -> Self {
        self.warnings = warnings;
        self.is_dangerous = is_dangerous;
        self
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == ResultKind::Error
    }

    #[must_use]
    pub fn page_info(&self) -> Option<PageInfo> {
        let page = self.page?;
        let page_size = self.page_size?;
        Some(PageInfo {
            page,
            page_size,
            total_pages: self
                .total_pages
                .unwrap_or_else(|| total_pages_for(self.total_rows.unwrap_or(0), page_size)),
            total_rows: self.total_rows.unwrap_or(0),
        })
    }

    fn set_page(&mut self, page: PageInfo) {
        self.page = Some(page.page);
        self.page_size = Some(page.page_size);
        self.total_pages = Some(page.total_pages);
        self.total_rows = Some(page.total_rows);
    }
}

/// Everything a Query Engine needs to run one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub connection_id: ConnectionId,
    pub sql: String,
    pub page: u32,
    pub page_size: u32,
    pub allow_multiple: bool,
    pub confirm_dangerous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct QueryEngineError {
    message: String,
}

impl QueryEngineError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn execute(&self, request: &QueryRequest) -> Result<QueryResult, QueryEngineError>;
}
