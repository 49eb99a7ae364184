use serde::{Deserialize, Serialize};

use super::model::{Role, User, UserFilter, UserStats};
use crate::error::{AppError, FieldError};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;
pub const MAX_SEARCH_LEN: usize = 100;

/// Raw `GET /users` query. Everything arrives as text so each bad value
/// becomes its own field error instead of a blanket rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    pub page: i64,
    pub limit: i64,
    pub filter: UserFilter,
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

impl ListUsersQuery {
    pub fn validate(self) -> Result<ListParams, AppError> {
        let mut errors = Vec::new();

        let page = match self.page.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_PAGE,
            Some(raw) => match raw.parse::<i64>() {
                Ok(p) if p >= 1 => p,
                _ => {
                    errors.push(FieldError::new("page", "Page must be a positive integer"));
                    DEFAULT_PAGE
                }
            },
        };

        let limit = match self.limit.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_LIMIT,
            Some(raw) => match raw.parse::<i64>() {
                Ok(l) if (1..=MAX_LIMIT).contains(&l) => l,
                _ => {
                    errors.push(FieldError::new("limit", "Limit must be between 1 and 100"));
                    DEFAULT_LIMIT
                }
            },
        };

        let search = match self.search.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) if s.chars().count() > MAX_SEARCH_LEN => {
                errors.push(FieldError::new("search", "Search query too long"));
                None
            }
            Some(s) => Some(s.to_string()),
        };

        let role = match self.role.as_deref() {
            None | Some("") => None,
            Some(raw) => {
                let parsed = Role::parse(raw);
                if parsed.is_none() {
                    errors.push(FieldError::new("role", "Invalid role"));
                }
                parsed
            }
        };

        let is_active = match self.is_active.as_deref() {
            None | Some("") => None,
            Some(raw) => {
                let parsed = parse_bool(raw);
                if parsed.is_none() {
                    errors.push(FieldError::new("isActive", "isActive must be a boolean"));
                }
                parsed
            }
        };

        if !errors.is_empty() {
            return Err(AppError::invalid_fields(errors));
        }

        Ok(ListParams {
            page,
            limit,
            filter: UserFilter {
                search,
                role,
                is_active,
            },
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub is_active: Option<String>,
}

impl StatusQuery {
    pub fn validate(&self) -> Result<bool, AppError> {
        self.is_active.as_deref().and_then(parse_bool).ok_or_else(|| {
            AppError::invalid_fields(vec![FieldError::new("isActive", "isActive must be a boolean")])
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RoleQuery {
    pub role: Option<String>,
}

impl RoleQuery {
    pub fn validate(&self) -> Result<Role, AppError> {
        self.role
            .as_deref()
            .and_then(Role::parse)
            .ok_or_else(|| AppError::invalid_fields(vec![FieldError::new("role", "Invalid role")]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_users: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
    pub limit: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        Self {
            current_page: page,
            total_pages,
            total_users: total,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
            limit,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserList {
    pub users: Vec<User>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsEnvelope {
    pub stats: UserStats,
}
