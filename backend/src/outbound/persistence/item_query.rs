//! Dynamic SQL construction for filtered item reads.
//!
//! Table names come from the router and column names from the allow-listed
//! sort enum; every user-supplied value travels as a bind parameter. The
//! builder is a pure function so the generated SQL is testable without a
//! database.

use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types;

use crate::domain::{ItemFilter, ItemSort};

/// Columns selected for every item read, in row-struct order.
pub const ITEM_COLUMNS: &str = "item_id, list_id, content, name, description, status, priority, \
     due_date, tags, is_done, created_at, updated_at";

/// A bind parameter in statement order.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    BigInt(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// A built statement plus its ordered binds.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemQuery {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

impl ItemQuery {
    /// Attach the binds to a boxed query ready for execution.
    pub fn into_boxed(self) -> BoxedSqlQuery<'static, Pg, SqlQuery> {
        let mut query = diesel::sql_query(self.sql).into_boxed();
        for bind in self.binds {
            query = match bind {
                BindValue::BigInt(value) => query.bind::<sql_types::BigInt, _>(value),
                BindValue::Text(value) => query.bind::<sql_types::Text, _>(value),
                BindValue::Timestamp(value) => query.bind::<sql_types::Timestamptz, _>(value),
            };
        }
        query
    }
}

/// Build the filtered, sorted item SELECT for one logical table.
///
/// Optional conjuncts attach in a fixed order (status, priority, due-date
/// bounds, tag disjunction); the tag match is a coarse substring match on
/// the comma-joined column.
pub fn filtered_items(table: &str, list_id: i64, filter: &ItemFilter, sort: ItemSort) -> ItemQuery {
    let mut sql = format!("SELECT {ITEM_COLUMNS} FROM {table} WHERE list_id = $1");
    let mut binds = vec![BindValue::BigInt(list_id)];

    if let Some(status) = filter.status {
        binds.push(BindValue::Text(status.as_str().to_owned()));
        sql.push_str(&format!(" AND status = ${}", binds.len()));
    }
    if let Some(priority) = filter.priority {
        binds.push(BindValue::Text(priority.as_str().to_owned()));
        sql.push_str(&format!(" AND priority = ${}", binds.len()));
    }
    if let Some(due_before) = filter.due_before {
        binds.push(BindValue::Timestamp(due_before));
        sql.push_str(&format!(" AND due_date < ${}", binds.len()));
    }
    if let Some(due_after) = filter.due_after {
        binds.push(BindValue::Timestamp(due_after));
        sql.push_str(&format!(" AND due_date > ${}", binds.len()));
    }
    if !filter.tags.is_empty() {
        sql.push_str(" AND (");
        for (i, tag) in filter.tags.iter().enumerate() {
            if i > 0 {
                sql.push_str(" OR ");
            }
            binds.push(BindValue::Text(format!("%{tag}%")));
            sql.push_str(&format!("tags LIKE ${}", binds.len()));
        }
        sql.push(')');
    }

    sql.push_str(&format!(
        " ORDER BY {} {}",
        sort.field.column(),
        if sort.descending { "DESC" } else { "ASC" }
    ));

    ItemQuery { sql, binds }
}
