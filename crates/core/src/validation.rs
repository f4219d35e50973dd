use thiserror::Error;

/// Rejections raised before the Query Engine is contacted. They never end up
/// in a tab's `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("query is empty")]
    EmptyQuery,
    #[error("page {page} is outside the valid range 1..={total_pages}")]
    PageOutOfRange { page: u32, total_pages: u32 },
    #[error("page size must be greater than 0")]
    InvalidPageSize,
    #[error("no query has been executed in this tab yet")]
    NothingExecuted,
    #[error("the current result is not paginated")]
    NotPaginated,
}
