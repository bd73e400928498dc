//! Translation of the query vocabulary into SQLite statements.
//!
//! Every column name is resolved through [`Table::column`] before it reaches
//! a statement; every value is bound as a parameter.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::query::{fold_case, Direction, Embed, EmbedShape, Filter, Order, Row};
use crate::schema::{Column, ColumnDefault, ColumnKind, Table};

/// Name of the Unicode case-folding scalar function.
pub(crate) const FOLD_FUNCTION: &str = "fold";

/// Register `fold(text)` on `conn`.  NULL folds to NULL.
pub(crate) fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        FOLD_FUNCTION,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| fold_case(&t)))
        },
    )?;
    Ok(())
}

/// Current instant in the canonical stored form.
pub(crate) fn now_timestamp() -> String {
    canonical_timestamp(Utc::now())
}

fn canonical_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn invalid(table: Table, column: &str, reason: impl Into<String>) -> StoreError {
    StoreError::InvalidValue {
        table: table.name(),
        column: column.to_string(),
        reason: reason.into(),
    }
}

fn to_sql(table: Table, column: &Column, value: &Value) -> Result<SqlValue> {
    match (column.kind, value) {
        (_, Value::Null) if column.nullable => Ok(SqlValue::Null),
        (_, Value::Null) => Err(invalid(table, column.name, "null not allowed")),
        (ColumnKind::Uuid, Value::String(s)) => Uuid::parse_str(s)
            .map(|id| SqlValue::Text(id.hyphenated().to_string()))
            .map_err(|e| invalid(table, column.name, e.to_string())),
        (ColumnKind::Text, Value::String(s)) => Ok(SqlValue::Text(s.clone())),
        (ColumnKind::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| SqlValue::Text(canonical_timestamp(dt.with_timezone(&Utc))))
            .map_err(|e| invalid(table, column.name, e.to_string())),
        (ColumnKind::Bool, Value::Bool(b)) => Ok(SqlValue::Integer(i64::from(*b))),
        (kind, other) => Err(invalid(
            table,
            column.name,
            format!("expected {kind:?}, got {other}"),
        )),
    }
}

fn from_sql(column: &Column, value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if column.kind == ColumnKind::Bool => Value::Bool(i != 0),
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

fn compile_filter(table: Table, filter: &Filter, params: &mut Vec<SqlValue>) -> Result<String> {
    match filter {
        Filter::Eq(name, Value::Null) => Ok(format!("{} IS NULL", table.column(name)?.name)),
        Filter::Neq(name, Value::Null) => Ok(format!("{} IS NOT NULL", table.column(name)?.name)),
        Filter::Eq(name, value) => {
            let column = table.column(name)?;
            params.push(to_sql(table, column, value)?);
            Ok(format!("{} = ?", column.name))
        }
        Filter::Neq(name, value) => {
            let column = table.column(name)?;
            params.push(to_sql(table, column, value)?);
            Ok(format!("{} <> ?", column.name))
        }
        Filter::ILike(name, needle) => {
            let column = table.column(name)?;
            if column.kind != ColumnKind::Text {
                return Err(invalid(table, name, "pattern match on a non-text column"));
            }
            // SQLite's LOWER and LIKE only fold ASCII; `fold` is registered
            // on every connection and folds the same way `Filter::matches` does.
            params.push(SqlValue::Text(fold_case(needle)));
            Ok(format!("instr({FOLD_FUNCTION}({}), ?) > 0", column.name))
        }
        Filter::Or(filters) => join_filters(table, filters, " OR ", "0", params),
        Filter::And(filters) => join_filters(table, filters, " AND ", "1", params),
    }
}

fn join_filters(
    table: Table,
    filters: &[Filter],
    separator: &str,
    empty: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    if filters.is_empty() {
        return Ok(empty.to_string());
    }
    let parts = filters
        .iter()
        .map(|f| compile_filter(table, f, params).map(|sql| format!("({sql})")))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("({})", parts.join(separator)))
}

fn where_clause(table: Table, filters: &[Filter], params: &mut Vec<SqlValue>) -> Result<String> {
    join_filters(table, filters, " AND ", "1", params)
}

/// Full rows of `table` matching every filter.  Ties on the ordering column
/// fall back to insertion order in the same direction.
pub(crate) fn select_rows(
    conn: &Connection,
    table: Table,
    filters: &[Filter],
    order: Option<&Order>,
    limit: Option<usize>,
) -> Result<Vec<Row>> {
    let columns = table.columns();
    let names: Vec<&str> = columns.iter().map(|c| c.name).collect();

    let mut params = Vec::new();
    let where_sql = where_clause(table, filters, &mut params)?;

    let order_sql = match order {
        Some(order) => {
            let column = table.column(&order.column)?;
            let dir = match order.direction {
                Direction::Ascending => "ASC",
                Direction::Descending => "DESC",
            };
            format!("{} {dir}, rowid {dir}", column.name)
        }
        None => "rowid ASC".to_string(),
    };

    let mut sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {}",
        names.join(", "),
        table.name(),
        where_sql,
        order_sql
    );
    if let Some(limit) = limit {
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        let mut out = Row::new();
        for (i, column) in columns.iter().enumerate() {
            out.insert(column.name.to_string(), from_sql(column, row.get_ref(i)?));
        }
        Ok(out)
    })?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

/// Keep only the requested columns (all of them when `columns` is empty).
pub(crate) fn project(row: &Row, table: Table, columns: &[String]) -> Result<Row> {
    if columns.is_empty() {
        return Ok(row.clone());
    }
    let mut out = Row::new();
    for name in columns {
        let column = table.column(name)?;
        let value = row.get(column.name).cloned().unwrap_or(Value::Null);
        out.insert(column.name.to_string(), value);
    }
    Ok(out)
}

/// Resolve one embed for one outer row.
pub(crate) fn resolve_embed(
    conn: &Connection,
    outer: Table,
    embed: &Embed,
    row: &Row,
) -> Result<Value> {
    outer.column(&embed.via)?;

    let found = match row.get(&embed.via) {
        Some(Value::String(target)) => {
            select_rows(conn, embed.table, &[Filter::eq("id", target.as_str())], None, Some(1))?
                .into_iter()
                .next()
        }
        _ => None,
    };
    let found = found
        .map(|r| project(&r, embed.table, &embed.columns))
        .transpose()?;

    Ok(match embed.shape {
        EmbedShape::One => found.map(Value::Object).unwrap_or(Value::Null),
        EmbedShape::Many => Value::Array(found.into_iter().map(Value::Object).collect()),
    })
}

/// Insert one row, filling server-side defaults, and return it as stored.
pub(crate) fn insert_row(conn: &Connection, table: Table, row: &Row) -> Result<Row> {
    for key in row.keys() {
        table.column(key)?;
    }

    let mut names = Vec::new();
    let mut values = Vec::new();
    let mut inserted_id = None;

    for column in table.columns() {
        let supplied = row.get(column.name).filter(|v| !v.is_null() || column.default.is_none());
        let value = match (supplied, column.default) {
            (Some(v), _) => to_sql(table, column, v)?,
            (None, Some(ColumnDefault::NewUuid)) => SqlValue::Text(Uuid::new_v4().to_string()),
            (None, Some(ColumnDefault::Now)) => SqlValue::Text(now_timestamp()),
            (None, Some(ColumnDefault::False)) => SqlValue::Integer(0),
            (None, None) if column.nullable => SqlValue::Null,
            (None, None) => {
                return Err(StoreError::MissingColumn {
                    table: table.name(),
                    column: column.name.to_string(),
                })
            }
        };
        if column.name == "id" {
            if let SqlValue::Text(id) = &value {
                inserted_id = Some(id.clone());
            }
        }
        names.push(column.name);
        values.push(value);
    }

    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.name(),
            names.join(", "),
            placeholders.join(", ")
        ),
        params_from_iter(values.iter()),
    )?;

    let id = inserted_id.ok_or(StoreError::NotFound)?;
    select_rows(conn, table, &[Filter::eq("id", id)], None, Some(1))?
        .into_iter()
        .next()
        .ok_or(StoreError::NotFound)
}

/// Delete every row matching the filters, returning what was removed.
pub(crate) fn delete_rows(conn: &Connection, table: Table, filters: &[Filter]) -> Result<Vec<Row>> {
    let doomed = select_rows(conn, table, filters, None, None)?;
    if doomed.is_empty() {
        return Ok(doomed);
    }

    let mut params = Vec::new();
    let where_sql = where_clause(table, filters, &mut params)?;
    conn.execute(
        &format!("DELETE FROM {} WHERE {}", table.name(), where_sql),
        params_from_iter(params.iter()),
    )?;
    Ok(doomed)
}

/// Refresh the denormalised last-message summary of a chat.  Returns the
/// row before and after, or `None` if the chat does not exist.
pub(crate) fn record_last_message(
    conn: &Connection,
    chat_id: &str,
    content: &str,
    at: &str,
) -> Result<Option<(Row, Row)>> {
    let lookup = [Filter::eq("id", chat_id)];
    let Some(before) = select_rows(conn, Table::Chats, &lookup, None, Some(1))?
        .into_iter()
        .next()
    else {
        return Ok(None);
    };

    conn.execute(
        "UPDATE chats SET last_message = ?1, last_message_at = ?2 WHERE id = ?3",
        params![content, at, chat_id],
    )?;

    let after = select_rows(conn, Table::Chats, &lookup, None, Some(1))?
        .into_iter()
        .next();
    Ok(after.map(|after| (before, after)))
}
