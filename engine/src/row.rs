//! Rows and the differences the scanner reports between the two databases.

use crate::{Pair, Side};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A table row: column name to value, primary key columns included.
pub type Row = BTreeMap<String, serde_json::Value>;

/// Classification of a [`Difference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffKind {
    /// Row exists only in the left table
    LeftOnly,
    /// Row exists only in the right table
    RightOnly,
    /// Row exists on both sides with differing non-key values
    Conflict,
}

impl DiffKind {
    /// The kind describing a row that exists only on `side`.
    pub fn only_on(side: Side) -> Self {
        match side {
            Side::Left => DiffKind::LeftOnly,
            Side::Right => DiffKind::RightOnly,
        }
    }

    /// The side a one-sided difference lives on, `None` for conflicts.
    pub fn side(self) -> Option<Side> {
        match self {
            DiffKind::LeftOnly => Some(Side::Left),
            DiffKind::RightOnly => Some(Side::Right),
            DiffKind::Conflict => None,
        }
    }
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiffKind::LeftOnly => "left",
            DiffKind::RightOnly => "right",
            DiffKind::Conflict => "conflict",
        })
    }
}

/// One detected mismatch between corresponding left and right rows.
///
/// This is the `(kind, payload)` shape handed to both report printers and
/// syncers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum Difference {
    LeftOnly(Row),
    RightOnly(Row),
    /// Rows share primary key values and differ in at least one other column
    Conflict(Pair<Row>),
}

impl Difference {
    /// A row found only on `side`.
    pub fn only_on(side: Side, row: Row) -> Self {
        match side {
            Side::Left => Difference::LeftOnly(row),
            Side::Right => Difference::RightOnly(row),
        }
    }

    pub fn conflict(left: Row, right: Row) -> Self {
        Difference::Conflict(Pair::new(left, right))
    }

    pub fn kind(&self) -> DiffKind {
        match self {
            Difference::LeftOnly(_) => DiffKind::LeftOnly,
            Difference::RightOnly(_) => DiffKind::RightOnly,
            Difference::Conflict(_) => DiffKind::Conflict,
        }
    }

    /// The row as it exists on `side`, if it exists there.
    pub fn row(&self, side: Side) -> Option<&Row> {
        match (self, side) {
            (Difference::LeftOnly(row), Side::Left) => Some(row),
            (Difference::RightOnly(row), Side::Right) => Some(row),
            (Difference::Conflict(pair), side) => Some(pair.get(side)),
            _ => None,
        }
    }

    /// Any row of the difference, left preferred. Used for key extraction.
    pub fn any_row(&self) -> &Row {
        match self {
            Difference::LeftOnly(row) | Difference::RightOnly(row) => row,
            Difference::Conflict(pair) => &pair.left,
        }
    }
}

/// Project `row` onto the given key columns.
///
/// Returns `None` if any key column is missing.
pub fn extract_key(row: &Row, key_columns: &[String]) -> Option<Row> {
    key_columns
        .iter()
        .map(|column| row.get(column).map(|value| (column.clone(), value.clone())))
        .collect()
}

/// Render a key row as `col=value` pairs for logs and events.
pub fn format_key(key: &Row) -> String {
    key.iter()
        .map(|(column, value)| format!("{}={}", column, value))
        .collect::<Vec<_>>()
        .join(", ")
}
