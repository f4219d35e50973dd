use crate::query_result::{PageInfo, QueryResult};
use crate::tabs::Tab;
use crate::validation::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRequest {
    Goto(u32),
    Next,
    Previous,
    First,
    Last,
    /// Changes the page size and always restarts from page 1.
    Resize(u32),
}

/// The `(sql, page, page_size)` triple sent to the engine for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub sql: String,
    pub page: u32,
    pub page_size: u32,
}

/// Resolves a page request against the tab's committed query and current
/// result. Only the committed text is ever paged; the draft is ignored.
pub fn plan_page(tab: &Tab, request: PageRequest) -> Result<PageCursor, ValidationError> {
    let sql = tab.last_executed_query();
    if sql.trim().is_empty() {
        return Err(ValidationError::NothingExecuted);
    }

    let target = match request {
        PageRequest::Resize(page_size) => {
            if page_size == 0 {
                return Err(ValidationError::InvalidPageSize);
            }
            return Ok(PageCursor {
                sql: sql.to_string(),
                page: 1,
                page_size,
            });
        }
        PageRequest::Goto(page) => page,
        PageRequest::Next => current_page(tab)?.page.saturating_add(1),
        PageRequest::Previous => current_page(tab)?.page.saturating_sub(1),
        PageRequest::First => 1,
        PageRequest::Last => current_page(tab)?.total_pages,
    };

    let current = current_page(tab)?;
    if target < 1 || target > current.total_pages {
        return Err(ValidationError::PageOutOfRange {
            page: target,
            total_pages: current.total_pages,
        });
    }

    Ok(PageCursor {
        sql: sql.to_string(),
        page: target,
        page_size: current.page_size,
    })
}

fn current_page(tab: &Tab) -> Result<PageInfo, ValidationError> {
    tab.result()
        .and_then(QueryResult::page_info)
        .ok_or(ValidationError::NotPaginated)
}
