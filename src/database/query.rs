//! CRUD statement building.
//!
//! Turns a [`CrudOperation`] (table name + string parameters) into a
//! [`Statement`]: SQL text with positional `?N` placeholders and the values to
//! bind to them, in order. Caller-supplied values are never spliced into the
//! SQL text. Identifiers cannot be bound, so table names, column names and
//! `_order` terms are checked against `[A-Za-z_][A-Za-z0-9_]*` and then quoted.
//!
//! Keys starting with `_` are control parameters. `_order` and `_limit` are
//! read by selects; every other `_` key is ignored by every operation.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use thiserror::Error;

use crate::http::StatusCode;

/// Parameter mapping of one CRUD call. Ordered, so statements are reproducible.
pub type Params = BTreeMap<String, String>;

/// Row identifier column used by updates and deletes.
pub const ID_COLUMN: &str = "id";

const ORDER_KEY: &str = "_order";
const LIMIT_KEY: &str = "_limit";

/// Rejections raised before any statement reaches the database.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Invalid table name: {0:?}")]
    InvalidTableName(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No data provided")]
    NoDataProvided,

    #[error("No fields to update")]
    NoFieldsToUpdate,

    #[error("Missing required parameter: id")]
    MissingId,
}

impl QueryError {
    /// Every builder rejection is a client error.
    pub fn status(&self) -> StatusCode {
        StatusCode::BadRequest
    }
}

/// One table-level operation requested through the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrudOperation {
    Select { table: String, params: Params },
    Insert { table: String, params: Params },
    Update { table: String, params: Params },
    Delete { table: String, params: Params },
}

impl CrudOperation {
    /// The target table, as given (not yet validated).
    pub fn table(&self) -> &str {
        match self {
            Self::Select { table, .. }
            | Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. } => table,
        }
    }

    /// The `id` parameter, for operations that address a single row.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Update { params, .. } | Self::Delete { params, .. } => {
                params.get(ID_COLUMN).map(String::as_str)
            }
            Self::Select { .. } | Self::Insert { .. } => None,
        }
    }

    /// Short lowercase name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Select { .. } => "select",
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Whether a statement yields rows or only a write count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Write,
}

/// A parameterized statement ready for an [`Executor`](super::Executor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<String>,
    pub kind: StatementKind,
}

/// Builds the statement for `operation`.
///
/// # Errors
///
/// Returns a [`QueryError`] for a bad table name, a bad column or control
/// parameter, an empty insert, an update with nothing to set, or an update or
/// delete without `id`.
///
/// # Examples
///
/// ```
/// use webgate::database::query::{CrudOperation, Params, build};
///
/// let mut params = Params::new();
/// params.insert("name".into(), "alice".into());
/// params.insert("_limit".into(), "5".into());
///
/// let statement = build(&CrudOperation::Select { table: "users".into(), params }).unwrap();
/// assert_eq!(statement.sql, r#"SELECT * FROM "users" WHERE "name" = ?1 LIMIT 5"#);
/// assert_eq!(statement.params, vec!["alice".to_string()]);
/// ```
pub fn build(operation: &CrudOperation) -> Result<Statement, QueryError> {
    let table = quote_table(operation.table())?;

    match operation {
        CrudOperation::Select { params, .. } => build_select(&table, params),
        CrudOperation::Insert { params, .. } => build_insert(&table, params),
        CrudOperation::Update { params, .. } => build_update(&table, params),
        CrudOperation::Delete { params, .. } => build_delete(&table, params),
    }
}

fn build_select(table: &str, params: &Params) -> Result<Statement, QueryError> {
    let mut sql = format!("SELECT * FROM {table}");
    let mut values = Vec::new();

    let mut conditions = Vec::new();
    for (column, value) in data_params(params) {
        values.push(value.clone());
        conditions.push(format!("{} = ?{}", quote_column(column)?, values.len()));
    }
    if !conditions.is_empty() {
        let _ = write!(sql, " WHERE {}", conditions.join(" AND "));
    }

    if let Some(order) = params.get(ORDER_KEY) {
        let _ = write!(sql, " ORDER BY {}", order_clause(order)?);
    }

    if let Some(limit) = params.get(LIMIT_KEY) {
        // SQLite integers are signed 64-bit; anything larger is not a valid limit.
        let limit: i64 = limit
            .trim()
            .parse()
            .ok()
            .filter(|n: &i64| *n >= 0)
            .ok_or_else(|| {
                QueryError::InvalidParameter(format!(
                    "_limit must be a non-negative integer, got {limit:?}"
                ))
            })?;
        let _ = write!(sql, " LIMIT {limit}");
    }

    Ok(Statement {
        sql,
        params: values,
        kind: StatementKind::Query,
    })
}

fn build_insert(table: &str, params: &Params) -> Result<Statement, QueryError> {
    let mut columns = Vec::new();
    let mut values = Vec::new();
    for (column, value) in data_params(params) {
        columns.push(quote_column(column)?);
        values.push(value.clone());
    }

    if columns.is_empty() {
        return Err(QueryError::NoDataProvided);
    }

    let placeholders: Vec<String> = (1..=values.len()).map(|n| format!("?{n}")).collect();
    Ok(Statement {
        sql: format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        ),
        params: values,
        kind: StatementKind::Write,
    })
}

fn build_update(table: &str, params: &Params) -> Result<Statement, QueryError> {
    let id = required_id(params)?;

    let mut assignments = Vec::new();
    let mut values = Vec::new();
    for (column, value) in data_params(params).filter(|(column, _)| *column != ID_COLUMN) {
        values.push(value.clone());
        assignments.push(format!("{} = ?{}", quote_column(column)?, values.len()));
    }

    if assignments.is_empty() {
        return Err(QueryError::NoFieldsToUpdate);
    }

    values.push(id.to_owned());
    Ok(Statement {
        sql: format!(
            "UPDATE {table} SET {} WHERE \"{ID_COLUMN}\" = ?{}",
            assignments.join(", "),
            values.len()
        ),
        params: values,
        kind: StatementKind::Write,
    })
}

fn build_delete(table: &str, params: &Params) -> Result<Statement, QueryError> {
    let id = required_id(params)?;
    Ok(Statement {
        sql: format!("DELETE FROM {table} WHERE \"{ID_COLUMN}\" = ?1"),
        params: vec![id.to_owned()],
        kind: StatementKind::Write,
    })
}

/// Non-control parameters, in key order.
fn data_params(params: &Params) -> impl Iterator<Item = (&str, &String)> {
    params
        .iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .map(|(key, value)| (key.as_str(), value))
}

fn required_id(params: &Params) -> Result<&str, QueryError> {
    params
        .get(ID_COLUMN)
        .map(String::as_str)
        .filter(|id| !id.is_empty())
        .ok_or(QueryError::MissingId)
}

/// `_order` is a comma-separated list of `column [ASC|DESC]` terms.
fn order_clause(raw: &str) -> Result<String, QueryError> {
    let invalid = || QueryError::InvalidParameter(format!("_order is not a column list: {raw:?}"));

    let mut terms = Vec::new();
    for term in raw.split(',') {
        let mut words = term.split_whitespace();
        let column = words.next().ok_or_else(invalid)?;
        if !is_identifier(column) {
            return Err(invalid());
        }
        let direction = match words.next() {
            None => "",
            Some(dir) if dir.eq_ignore_ascii_case("asc") => " ASC",
            Some(dir) if dir.eq_ignore_ascii_case("desc") => " DESC",
            Some(_) => return Err(invalid()),
        };
        if words.next().is_some() {
            return Err(invalid());
        }
        terms.push(format!("\"{column}\"{direction}"));
    }
    Ok(terms.join(", "))
}

fn quote_table(table: &str) -> Result<String, QueryError> {
    if is_identifier(table) {
        Ok(format!("\"{table}\""))
    } else {
        Err(QueryError::InvalidTableName(table.to_owned()))
    }
}

fn quote_column(column: &str) -> Result<String, QueryError> {
    if is_identifier(column) {
        Ok(format!("\"{column}\""))
    } else {
        Err(QueryError::InvalidParameter(format!(
            "invalid column name {column:?}"
        )))
    }
}

/// ASCII letters, digits and underscores, not starting with a digit.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
