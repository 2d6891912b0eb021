use serde::{Deserialize, Serialize};

use crate::domain::{MemberProfile, Sex};
use crate::error::{AppError, Result};

/// Optional predicates of a member search. Empty values are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    /// When usable, every demographic predicate below is ignored.
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<u32>,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub height: Option<i64>,
    pub weight: Option<i64>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub sex: Vec<Sex>,
    pub match_sex: Option<Sex>,
    pub online: bool,
    pub avatar: bool,
    pub order: Option<SearchOrder>,
    pub sort: Option<SortDirection>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SearchOrder {
    #[default]
    Latest,
    LastActivity,
    Views,
    Rating,
    Username,
    FirstName,
    LastName,
    Email,
}

impl SearchOrder {
    pub fn column(&self) -> &'static str {
        match self {
            SearchOrder::Latest => "m.joinDate",
            SearchOrder::LastActivity => "m.lastActivity",
            SearchOrder::Views => "m.views",
            SearchOrder::Rating => "m.votes",
            SearchOrder::Username => "m.username",
            SearchOrder::FirstName => "m.firstName",
            SearchOrder::LastName => "m.lastName",
            SearchOrder::Email => "m.email",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Renders a closed-set `ORDER BY` clause.
pub fn order_clause(order: SearchOrder, sort: SortDirection) -> String {
    format!(" ORDER BY {} {}", order.column(), sort.as_sql())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: i64,
    pub limit: i64,
}

impl Pagination {
    pub fn new(offset: i64, limit: i64) -> Result<Self> {
        if offset < 0 || limit < 0 {
            return Err(AppError::InvalidArgument(format!(
                "Pagination must not be negative (offset {}, limit {})",
                offset, limit
            )));
        }
        Ok(Self { offset, limit })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Count,
    Page { offset: i64, limit: i64 },
}

#[derive(Debug, Clone)]
pub enum SearchResult {
    Count(i64),
    Rows(Vec<MemberProfile>),
}

impl SearchResult {
    pub fn count(&self) -> i64 {
        match self {
            SearchResult::Count(n) => *n,
            SearchResult::Rows(rows) => rows.len() as i64,
        }
    }

    pub fn into_rows(self) -> Vec<MemberProfile> {
        match self {
            SearchResult::Count(_) => Vec::new(),
            SearchResult::Rows(rows) => rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_clause() {
        assert_eq!(order_clause(SearchOrder::default(), SortDirection::default()), " ORDER BY m.joinDate ASC");
        assert_eq!(order_clause(SearchOrder::Rating, SortDirection::Desc), " ORDER BY m.votes DESC");
    }

    #[test]
    fn test_negative_pagination_is_rejected() {
        assert!(Pagination::new(0, 10).is_ok());
        assert!(matches!(Pagination::new(-1, 10), Err(AppError::InvalidArgument(_))));
        assert!(matches!(Pagination::new(0, -5), Err(AppError::InvalidArgument(_))));
    }
}
