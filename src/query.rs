//! Pure filter/sort/paginate over a snapshot of the task collection.
//!
//! No clock, no mutation — callers take a read lock, run query(), drop
//! the lock. Filter stages run in a fixed order and the sort is stable,
//! so two queries over the same snapshot always agree on tie order.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::store::{Priority, Task, TaskStatus};

// ── Criteria ───────────────────────────────────────────────────

/// Which date the range filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateField {
    #[default]
    CreatedAt,
    DueDate,
}

/// Inclusive on both ends. A task with no due date never falls inside a
/// DueDate range.
#[derive(Debug, Clone, Copy)]
pub struct DateRange {
    pub field: DateField,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One optional field per filter dimension. An empty/absent dimension
/// filters nothing.
#[derive(Debug, Clone, Default)]
pub struct FilterCriteria {
    /// Case-insensitive substring against title or description.
    pub keyword: Option<String>,
    pub status: Vec<TaskStatus>,
    pub priority: Vec<Priority>,
    /// Matches tasks that list this assignee, exact name.
    pub assignee: Option<String>,
    pub date_range: Option<DateRange>,
}

// ── Sort ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    DueDate,
    Title,
    Priority,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Defaults to created_at descending — newest first, like the console's
/// initial table view.
#[derive(Debug, Clone, Copy, Default)]
pub struct SortSpec {
    pub field: SortField,
    pub order: SortOrder,
}

impl std::str::FromStr for SortField {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, QueryError> {
        match s {
            "created_at" => Ok(SortField::CreatedAt),
            "updated_at" => Ok(SortField::UpdatedAt),
            "due_date" => Ok(SortField::DueDate),
            "title" => Ok(SortField::Title),
            "priority" => Ok(SortField::Priority),
            "status" => Ok(SortField::Status),
            _ => Err(QueryError::UnknownSortField),
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, QueryError> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(QueryError::UnknownSortOrder),
        }
    }
}

// ── Pagination ─────────────────────────────────────────────────

/// 1-based. Zero page or page size is rejected, never clamped.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest { page: 1, page_size: 10 }
    }
}

/// One page of results plus the size of the whole filtered set. `total`
/// is what the console uses to compute its page count.
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub items: Vec<Task>,
    pub total: usize,
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryError {
    InvalidPage,
    InvalidPageSize,
    UnknownSortField,
    UnknownSortOrder,
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::InvalidPage => write!(f, "page must be at least 1"),
            QueryError::InvalidPageSize => write!(f, "page size must be at least 1"),
            QueryError::UnknownSortField => write!(f, "unknown sort field"),
            QueryError::UnknownSortOrder => write!(f, "unknown sort order"),
        }
    }
}

// ── Query ──────────────────────────────────────────────────────

/// Filter, sort, count, slice — in that order.
pub fn query(
    tasks: &[Task],
    criteria: &FilterCriteria,
    sort: &SortSpec,
    page: &PageRequest,
) -> Result<QueryPage, QueryError> {
    if page.page == 0 {
        return Err(QueryError::InvalidPage);
    }
    if page.page_size == 0 {
        return Err(QueryError::InvalidPageSize);
    }

    let mut hits: Vec<&Task> = tasks.iter().collect();
    hits.retain(|t| matches_keyword(t, criteria.keyword.as_deref()));
    hits.retain(|t| criteria.status.is_empty() || criteria.status.contains(&t.status));
    hits.retain(|t| criteria.priority.is_empty() || criteria.priority.contains(&t.priority));
    hits.retain(|t| matches_assignee(t, criteria.assignee.as_deref()));
    hits.retain(|t| matches_date_range(t, criteria.date_range.as_ref()));

    // Vec::sort_by is stable: equal keys keep their collection order.
    hits.sort_by(|a, b| compare(a, b, sort));

    let total = hits.len();
    let start = (page.page as usize - 1) * page.page_size as usize;
    let items = hits
        .into_iter()
        .skip(start)
        .take(page.page_size as usize)
        .cloned()
        .collect();

    Ok(QueryPage { items, total })
}

fn matches_keyword(task: &Task, keyword: Option<&str>) -> bool {
    let Some(keyword) = keyword else { return true };
    if keyword.is_empty() {
        return true;
    }
    let needle = keyword.to_lowercase();
    if task.title.to_lowercase().contains(&needle) {
        return true;
    }
    task.description
        .as_deref()
        .is_some_and(|d| d.to_lowercase().contains(&needle))
}

fn matches_assignee(task: &Task, assignee: Option<&str>) -> bool {
    let Some(assignee) = assignee else { return true };
    if assignee.is_empty() {
        return true;
    }
    task.assignees.iter().any(|a| a == assignee)
}

fn matches_date_range(task: &Task, range: Option<&DateRange>) -> bool {
    let Some(range) = range else { return true };
    match range.field {
        DateField::CreatedAt => task.created_at >= range.start && task.created_at <= range.end,
        DateField::DueDate => task
            .due_date
            .is_some_and(|due| due >= range.start && due <= range.end),
    }
}

fn compare(a: &Task, b: &Task, sort: &SortSpec) -> Ordering {
    // Tasks without a due date sort after every dated task, in both
    // directions — only the dated portion flips with the order.
    if sort.field == SortField::DueDate {
        return match (a.due_date, b.due_date) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => directed(x.cmp(&y), sort.order),
        };
    }

    let ord = match sort.field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        // Numeric weight (urgent > high > medium > low), not the label.
        SortField::Priority => a.priority.cmp(&b.priority),
        SortField::Status => a.status.cmp(&b.status),
        SortField::DueDate => unreachable!("handled above"),
    };
    directed(ord, sort.order)
}

fn directed(ord: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Asc => ord,
        SortOrder::Desc => ord.reverse(),
    }
}

// ── Tests ──────────────────────────────────────────────────────
