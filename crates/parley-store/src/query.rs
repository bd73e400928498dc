//! Query vocabulary of the [`Backend`](crate::Backend) capability.
//!
//! A [`Select`] names one table, an AND-ed list of [`Filter`]s, an optional
//! ordering and limit, and any number of [`Embed`]s that resolve a foreign
//! key of each result row into the referenced row inline.

use serde_json::Value;

use crate::schema::Table;

/// Case folding shared by in-memory matching and the SQL `fold()` function.
pub(crate) fn fold_case(text: &str) -> String {
    text.to_lowercase()
}

/// One record as exchanged with the backing service.
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    /// Case-insensitive substring match.
    ILike(String, String),
    Or(Vec<Filter>),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn neq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Neq(column.into(), value.into())
    }

    pub fn ilike(column: impl Into<String>, needle: impl Into<String>) -> Self {
        Filter::ILike(column.into(), needle.into())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    /// Evaluate the filter against an in-memory row.  Missing columns read
    /// as `null`.
    pub fn matches(&self, row: &Row) -> bool {
        let get = |column: &str| row.get(column).unwrap_or(&Value::Null);
        match self {
            Filter::Eq(column, value) => get(column) == value,
            Filter::Neq(column, value) => {
                let actual = get(column);
                !actual.is_null() && actual != value
            }
            Filter::ILike(column, needle) => match get(column) {
                Value::String(s) => fold_case(s).contains(&fold_case(needle)),
                _ => false,
            },
            Filter::Or(filters) => filters.iter().any(|f| f.matches(row)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(row)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// Whether an embedded relation comes back as a single object (or `null`)
/// or as an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedShape {
    One,
    Many,
}

/// Inline resolution of the row referenced by `via` (a column of the outer
/// row holding the target's `id`).
#[derive(Debug, Clone, PartialEq)]
pub struct Embed {
    pub alias: String,
    pub table: Table,
    pub via: String,
    pub columns: Vec<String>,
    pub shape: EmbedShape,
}

impl Embed {
    pub fn one(alias: &str, table: Table, via: &str, columns: &[&str]) -> Self {
        Self::build(alias, table, via, columns, EmbedShape::One)
    }

    pub fn many(alias: &str, table: Table, via: &str, columns: &[&str]) -> Self {
        Self::build(alias, table, via, columns, EmbedShape::Many)
    }

    fn build(alias: &str, table: Table, via: &str, columns: &[&str], shape: EmbedShape) -> Self {
        Self {
            alias: alias.to_string(),
            table,
            via: via.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            shape,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: Table,
    /// Projected columns; empty means all.
    pub columns: Vec<String>,
    pub embeds: Vec<Embed>,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            columns: Vec::new(),
            embeds: Vec::new(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
