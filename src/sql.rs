//! SQL assembly from optional filter fields.
//!
//! Values never enter the query text. Each clause carries its own `?`
//! placeholders and the matching typed parameters, in order.

use sqlx::query::{Query, QueryAs};
use sqlx::sqlite::{Sqlite, SqliteArguments};

/// Compound `CLASS.CODE` expression over the features table.
pub const COMPOUND_CODE_EXPR: &str = "(feature_class || '.' || feature_code)";

/// A bound query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
    Real(f64),
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        SqlParam::Integer(value)
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        SqlParam::Real(value)
    }
}

/// Ordered list of predicates joined with `AND`.
#[derive(Debug, Default, Clone)]
pub struct Predicates {
    clauses: Vec<String>,
    params: Vec<SqlParam>,
}

impl Predicates {
    pub fn new() -> Self {
        Self::default()
    }

    /// `column = ?`
    pub fn eq(&mut self, column: &str, value: impl Into<SqlParam>) -> &mut Self {
        self.clauses.push(format!("{column} = ?"));
        self.params.push(value.into());
        self
    }

    /// `column = ?` when a value is present, nothing otherwise.
    pub fn eq_opt<V: Into<SqlParam>>(&mut self, column: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.eq(column, value);
        }
        self
    }

    /// `column BETWEEN ? AND ?`
    pub fn between(&mut self, column: &str, low: f64, high: f64) -> &mut Self {
        self.clauses.push(format!("{column} BETWEEN ? AND ?"));
        self.params.push(SqlParam::Real(low));
        self.params.push(SqlParam::Real(high));
        self
    }

    /// `expr IN (?, ?, ...)`; an empty list adds no constraint.
    pub fn in_list<V, I>(&mut self, expr: &str, values: I) -> &mut Self
    where
        V: Into<SqlParam>,
        I: IntoIterator<Item = V>,
    {
        let values: Vec<SqlParam> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return self;
        }
        self.clauses
            .push(format!("{expr} IN ({})", placeholders(values.len())));
        self.params.extend(values);
        self
    }

    /// A clause without parameters.
    pub fn raw(&mut self, clause: &str) -> &mut Self {
        self.clauses.push(clause.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Conjunction of all clauses, `1=1` when there are none.
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            "1=1".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }
}

/// `?, ?, ?` with `count` placeholders.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Fixed-size slices over `keys`, the last one possibly shorter.
///
/// Used to keep `IN (...)` lists under the engine's expression limits.
pub fn chunked<T>(keys: &[T], chunk_size: usize) -> std::slice::Chunks<'_, T> {
    keys.chunks(chunk_size.max(1))
}

/// Bind every parameter, in order, onto a plain query.
pub fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [SqlParam],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Text(v) => query.bind(v.as_str()),
            SqlParam::Integer(v) => query.bind(*v),
            SqlParam::Real(v) => query.bind(*v),
        };
    }
    query
}

/// Bind every parameter, in order, onto a typed query.
pub fn bind_all_as<'q, O>(
    mut query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    params: &'q [SqlParam],
) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Text(v) => query.bind(v.as_str()),
            SqlParam::Integer(v) => query.bind(*v),
            SqlParam::Real(v) => query.bind(*v),
        };
    }
    query
}
