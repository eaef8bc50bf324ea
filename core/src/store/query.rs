use super::{
    complaint::{attach_children_in, complaint_row_mapper, COMPLAINT_COLUMNS},
    ts, DeskStore,
};
use crate::{
    complaint::{Category, Complaint, Department, Priority, Status},
    error::{DeskError, DeskResult},
    types::Timestamp,
};
use rusqlite::{params_from_iter, ToSql};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Priority,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filtered, paginated complaint listing. Every filter is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComplaintQuery {
    pub department: Option<Department>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub category: Option<Category>,
    pub assigned_to: Option<String>,
    pub created_from: Option<Timestamp>,
    pub created_to: Option<Timestamp>,
    /// 1-based.
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: SortField,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub total_pages: u64,
    pub current_page: u32,
}

impl ComplaintQuery {
    pub fn department(department: Department) -> Self {
        Self {
            department: Some(department),
            ..Self::default()
        }
    }

    pub fn assigned_to(agent_id: impl Into<String>) -> Self {
        Self {
            assigned_to: Some(agent_id.into()),
            ..Self::default()
        }
    }

    fn where_clause(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(d) = self.department {
            clauses.push("department = ?");
            args.push(Box::new(d));
        }
        if let Some(s) = self.status {
            clauses.push("status = ?");
            args.push(Box::new(s));
        }
        if let Some(p) = self.priority {
            clauses.push("priority = ?");
            args.push(Box::new(p));
        }
        if let Some(c) = self.category {
            clauses.push("category = ?");
            args.push(Box::new(c));
        }
        if let Some(a) = &self.assigned_to {
            clauses.push("assigned_to = ?");
            args.push(Box::new(a.clone()));
        }
        if let Some(from) = &self.created_from {
            clauses.push("created_at >= ?");
            args.push(Box::new(ts(from)));
        }
        if let Some(to) = &self.created_to {
            clauses.push("created_at <= ?");
            args.push(Box::new(ts(to)));
        }
        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (sql, args)
    }

    fn order_clause(&self) -> String {
        let dir = match self.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let column = match self.sort_by {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            // Severity rank, not the alphabetical code.
            SortField::Priority => {
                "CASE priority WHEN 'critical' THEN 3 WHEN 'high' THEN 2 WHEN 'medium' THEN 1 ELSE 0 END"
            }
        };
        format!(" ORDER BY {column} {dir}, complaint_id {dir}")
    }

    fn page_and_limit(&self) -> DeskResult<(u32, u32)> {
        let page = self.page.unwrap_or(1);
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if page == 0 {
            return Err(DeskError::Validation("Page must be at least 1".into()));
        }
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(DeskError::Validation(format!(
                "Limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }
        Ok((page, limit))
    }
}

impl DeskStore {
    // ── Complaint queries ──────────────────────────────────────────

    pub fn list_complaints(&self, query: &ComplaintQuery) -> DeskResult<Page<Complaint>> {
        let (page, limit) = query.page_and_limit()?;
        let (where_sql, mut args) = query.where_clause();
        let order_sql = query.order_clause();

        self.read_txn(|conn| {
            let total: u64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM complaint{where_sql}"),
                params_from_iter(args.iter()),
                |row| row.get(0),
            )?;

            args.push(Box::new(i64::from(limit)));
            args.push(Box::new(i64::from(page - 1) * i64::from(limit)));
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMPLAINT_COLUMNS} FROM complaint{where_sql}{order_sql} LIMIT ? OFFSET ?"
            ))?;
            let rows = stmt.query_map(params_from_iter(args.iter()), complaint_row_mapper)?;
            let mut items = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            for c in items.iter_mut() {
                attach_children_in(conn, c)?;
            }

            Ok(Page {
                items,
                total,
                total_pages: total.div_ceil(u64::from(limit)),
                current_page: page,
            })
        })
    }

    pub fn complaints_by_department(
        &self,
        department: Department,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> DeskResult<Page<Complaint>> {
        self.list_complaints(&ComplaintQuery {
            page,
            limit,
            ..ComplaintQuery::department(department)
        })
    }

    pub fn complaints_assigned_to(
        &self,
        agent_id: &str,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> DeskResult<Page<Complaint>> {
        self.list_complaints(&ComplaintQuery {
            page,
            limit,
            ..ComplaintQuery::assigned_to(agent_id)
        })
    }
}
