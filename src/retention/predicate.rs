//! Eligibility predicates and their SQL rendering.
//!
//! A predicate is built once per category and rendered per partition. All
//! identifiers come from validated configuration and are double-quoted; all
//! values are bound parameters.

use chrono::{DateTime, Utc};

use crate::{
    config::{ColumnFilter, FilterOp, FilterValue},
    models::PartitionKey,
};

/// SQL flavour used when rendering placeholders and null-safe comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    fn null_safe_eq(self) -> &'static str {
        match self {
            Dialect::Sqlite => "IS",
            Dialect::Postgres => "IS NOT DISTINCT FROM",
        }
    }
}

/// A value bound to a rendered statement, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Timestamp(DateTime<Utc>),
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<&FilterValue> for BindValue {
    fn from(value: &FilterValue) -> Self {
        match value {
            FilterValue::Bool(b) => BindValue::Bool(*b),
            FilterValue::Int(i) => BindValue::Int(*i),
            FilterValue::Text(s) => BindValue::Text(s.clone()),
        }
    }
}

/// Rendered SQL plus its bind values.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

struct SqlWriter {
    dialect: Dialect,
    sql: String,
    binds: Vec<BindValue>,
}

impl SqlWriter {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::with_capacity(256),
            binds: Vec::new(),
        }
    }

    fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    fn push_column(&mut self, qualifier: &str, column: &str) -> &mut Self {
        self.sql.push_str(&quote_ident(qualifier));
        self.sql.push('.');
        self.sql.push_str(&quote_ident(column));
        self
    }

    /// A timestamp column in comparable form. SQLite keeps timestamps as text
    /// in more than one layout, so both sides are compared as Julian days.
    fn push_instant_column(&mut self, qualifier: &str, column: &str) -> &mut Self {
        match self.dialect {
            Dialect::Sqlite => self
                .push("julianday(")
                .push_column(qualifier, column)
                .push(")"),
            Dialect::Postgres => self.push_column(qualifier, column),
        }
    }

    fn push_instant_bind(&mut self, value: DateTime<Utc>) -> &mut Self {
        match self.dialect {
            Dialect::Sqlite => self
                .push("julianday(")
                .push_bind(BindValue::Timestamp(value))
                .push(")"),
            Dialect::Postgres => self.push_bind(BindValue::Timestamp(value)),
        }
    }

    fn push_bind(&mut self, value: BindValue) -> &mut Self {
        self.binds.push(value);
        match self.dialect {
            Dialect::Sqlite => self.sql.push('?'),
            Dialect::Postgres => {
                self.sql.push('$');
                self.sql.push_str(&self.binds.len().to_string());
            }
        }
        self
    }

    fn finish(self) -> SqlFragment {
        SqlFragment {
            sql: self.sql,
            binds: self.binds,
        }
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

const KEEP_SOURCE_ALIAS: &str = "keep_src";
const KEEP_NEWEST_ALIAS: &str = "keep_newest";

/// Keep-last exemption: the newest age value per group is never eligible.
#[derive(Debug, Clone, PartialEq)]
pub struct KeepLastRule {
    /// Only rows matching every filter take part in finding the newest value.
    pub filters: Vec<ColumnFilter>,
    /// Group column; `None` makes the whole table one group.
    pub group_by: Option<String>,
}

/// Which rows of a table are old enough to delete.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibilityPredicate {
    pub age_column: String,
    pub cutoff: DateTime<Utc>,
    pub keep_last: Option<KeepLastRule>,
}

impl EligibilityPredicate {
    fn write(&self, table: &str, w: &mut SqlWriter) {
        w.push_instant_column(table, &self.age_column)
            .push(" <= ")
            .push_instant_bind(self.cutoff);

        let Some(rule) = &self.keep_last else {
            return;
        };

        // Protection is value-based: every row equal to its group's maximum
        // is kept, including ties.
        w.push(" AND NOT EXISTS (SELECT 1 FROM (SELECT ");
        if let Some(group_by) = &rule.group_by {
            w.push_column(KEEP_SOURCE_ALIAS, group_by)
                .push(" AS \"grp\", ");
        }
        w.push("MAX(")
            .push_instant_column(KEEP_SOURCE_ALIAS, &self.age_column)
            .push(") AS \"newest\" FROM ")
            .push(&quote_ident(table))
            .push(" AS ")
            .push(&quote_ident(KEEP_SOURCE_ALIAS));

        for (i, filter) in rule.filters.iter().enumerate() {
            w.push(if i == 0 { " WHERE " } else { " AND " });
            write_filter(filter, w);
        }

        if let Some(group_by) = &rule.group_by {
            w.push(" GROUP BY ").push_column(KEEP_SOURCE_ALIAS, group_by);
        }

        w.push(") AS ")
            .push(&quote_ident(KEEP_NEWEST_ALIAS))
            .push(" WHERE ")
            .push_column(KEEP_NEWEST_ALIAS, "newest")
            .push(" = ")
            .push_instant_column(table, &self.age_column);

        if let Some(group_by) = &rule.group_by {
            let null_safe_eq = w.dialect.null_safe_eq();
            w.push(" AND ")
                .push_column(KEEP_NEWEST_ALIAS, "grp")
                .push(" ")
                .push(null_safe_eq)
                .push(" ")
                .push_column(table, group_by);
        }

        w.push(")");
    }
}

fn write_filter(filter: &ColumnFilter, w: &mut SqlWriter) {
    w.push_column(KEEP_SOURCE_ALIAS, &filter.column);
    match (filter.op, &filter.value) {
        (FilterOp::Eq, Some(value)) => {
            w.push(" = ").push_bind(value.into());
        }
        (FilterOp::Ne, Some(value)) => {
            w.push(" <> ").push_bind(value.into());
        }
        (FilterOp::IsNull, _) => {
            w.push(" IS NULL");
        }
        (FilterOp::IsNotNull, _) => {
            w.push(" IS NOT NULL");
        }
        // Rejected by config validation; render something that matches nothing.
        (FilterOp::Eq | FilterOp::Ne, None) => {
            w.push(" IS NULL AND 1 = 0");
        }
    }
}

/// An eligibility predicate applied to one partition of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionFilter {
    pub table: String,
    /// Owner column; `None` for categories that are not partition-scoped.
    pub owner_column: Option<String>,
    pub predicate: EligibilityPredicate,
    pub partition: PartitionKey,
}

impl DeletionFilter {
    fn write_where(&self, w: &mut SqlWriter) {
        w.push(" WHERE ");
        self.predicate.write(&self.table, w);

        let Some(owner_column) = &self.owner_column else {
            return;
        };
        match &self.partition {
            PartitionKey::Global => {}
            PartitionKey::Owner(owner) => {
                w.push(" AND ")
                    .push_column(&self.table, owner_column)
                    .push(" = ")
                    .push_bind(BindValue::Text(owner.clone()));
            }
            PartitionKey::Unowned => {
                w.push(" AND ")
                    .push_column(&self.table, owner_column)
                    .push(" IS NULL");
            }
        }
    }

    /// `SELECT owner_value, age_value` for every matched row, oldest first.
    pub fn select_sql(&self, dialect: Dialect) -> SqlFragment {
        let mut w = SqlWriter::new(dialect);
        w.push("SELECT ");
        match &self.owner_column {
            Some(owner_column) => {
                w.push("CAST(")
                    .push_column(&self.table, owner_column)
                    .push(" AS TEXT)");
            }
            None => {
                w.push("CAST(NULL AS TEXT)");
            }
        }
        w.push(" AS owner_value, ")
            .push_column(&self.table, &self.predicate.age_column)
            .push(" AS age_value FROM ")
            .push(&quote_ident(&self.table));
        self.write_where(&mut w);
        w.push(" ORDER BY ")
            .push_instant_column(&self.table, &self.predicate.age_column);
        w.finish()
    }

    pub fn count_sql(&self, dialect: Dialect) -> SqlFragment {
        let mut w = SqlWriter::new(dialect);
        w.push("SELECT COUNT(*) FROM ").push(&quote_ident(&self.table));
        self.write_where(&mut w);
        w.finish()
    }

    pub fn delete_sql(&self, dialect: Dialect) -> SqlFragment {
        let mut w = SqlWriter::new(dialect);
        w.push("DELETE FROM ").push(&quote_ident(&self.table));
        self.write_where(&mut w);
        w.finish()
    }
}

/// Distinct non-null owner values of a table, sorted.
pub fn distinct_owners_sql(table: &str, owner_column: &str) -> String {
    let column = format!("{}.{}", quote_ident(table), quote_ident(owner_column));
    format!(
        "SELECT DISTINCT CAST({column} AS TEXT) AS owner_value FROM {} WHERE {column} IS NOT NULL ORDER BY owner_value",
        quote_ident(table)
    )
}
