//! Query builder.
//!
//! Pure functions that turn templates into [`Query`] values. Templates use two
//! markers:
//!
//! - `$$` takes one scalar fill value and becomes one positional placeholder.
//! - `$$$` takes a list fill value and becomes one placeholder per element,
//!   comma-separated, for `IN (...)` clauses.
//!
//! Values never end up in the query text. Placeholder numbering is local to a single
//! call, so building the same query twice yields identical output.

use crate::error::{DbError, DbResult};
use crate::models::{DbValue, Fill, Query};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use tracing::error;

const SCALAR_MARKER: &str = "$$";
const LIST_MARKER: &str = "$$$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Scalar,
    List,
}

impl Marker {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Scalar => SCALAR_MARKER,
            Self::List => LIST_MARKER,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Marker(Marker),
}

/// Split a template into literal text and markers, left to right.
/// Where both markers match, `$$$` wins.
fn scan(template: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(pos) = rest.find(SCALAR_MARKER) {
        segments.push(Segment::Text(&rest[..pos]));
        let tail = &rest[pos..];
        if tail.starts_with(LIST_MARKER) {
            segments.push(Segment::Marker(Marker::List));
            rest = &tail[LIST_MARKER.len()..];
        } else {
            segments.push(Segment::Marker(Marker::Scalar));
            rest = &tail[SCALAR_MARKER.len()..];
        }
    }
    segments.push(Segment::Text(rest));
    segments
}

fn count_markers(segments: &[Segment<'_>]) -> usize {
    segments
        .iter()
        .filter(|s| matches!(s, Segment::Marker(_)))
        .count()
}

/// Append the next positional placeholder. `values` already holds the bound value.
fn push_placeholder(text: &mut String, values: &[DbValue]) {
    let _ = write!(text, "${}", values.len());
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Substitute fill values into a template.
///
/// The number of markers must equal the number of fill values. A mismatch is a
/// programming error and is reported before anything reaches the database.
pub fn prepare(template: &str, fills: &[Fill]) -> DbResult<Query> {
    let segments = scan(template);
    let placeholders = count_markers(&segments);
    if placeholders != fills.len() {
        error!(
            placeholders,
            fillers = fills.len(),
            sql = %template,
            "Query placeholders do not match the provided fillers"
        );
        return Err(DbError::PlaceholderMismatch {
            placeholders,
            fillers: fills.len(),
        });
    }

    let mut fills = fills.iter();
    let init = (String::with_capacity(template.len()), Vec::new());
    let (text, values) = segments
        .into_iter()
        .try_fold(init, |(mut text, mut values), segment| {
            let marker = match segment {
                Segment::Text(literal) => {
                    text.push_str(literal);
                    return Ok((text, values));
                }
                Segment::Marker(marker) => marker,
            };
            let fill = fills
                .next()
                .ok_or_else(|| DbError::internal("ran out of fill values"))?;

            match (marker, fill) {
                (_, Fill::Scalar(value)) => {
                    values.push(value.clone());
                    push_placeholder(&mut text, &values);
                }
                (Marker::List, Fill::List(items)) => {
                    if items.is_empty() {
                        return Err(DbError::invalid_input(format!(
                            "Placeholder({}) was given an empty list",
                            LIST_MARKER
                        )));
                    }
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            text.push(',');
                        }
                        values.push(item.clone());
                        push_placeholder(&mut text, &values);
                    }
                }
                (Marker::Scalar, list @ Fill::List(_)) => {
                    return Err(DbError::placeholder_type(
                        marker.as_str(),
                        list.to_string(),
                    ));
                }
            }
            Ok((text, values))
        })?;

    Ok(Query { text, values })
}

/// Build a multi-row INSERT.
///
/// `columns` is a comma-separated column list; each name is quoted as an identifier.
/// `row_pattern` is expanded once per row, e.g. `$$,$$` or `$$,now()`, with markers
/// numbered across the whole statement. `extra` is appended verbatim, typically an
/// [`on_conflict`] clause or `RETURNING ...`.
pub fn insert(
    table: &str,
    columns: &str,
    row_pattern: &str,
    rows: &[Vec<DbValue>],
    extra: &str,
) -> DbResult<Query> {
    if rows.is_empty() {
        return Err(DbError::invalid_input(format!(
            "INSERT INTO {} needs at least one row",
            table
        )));
    }

    let pattern = scan(row_pattern);
    if pattern.contains(&Segment::Marker(Marker::List)) {
        return Err(DbError::invalid_input(format!(
            "Row pattern may only use {} markers: {}",
            SCALAR_MARKER, row_pattern
        )));
    }
    let per_row = count_markers(&pattern);

    let columns = columns
        .split(',')
        .map(|c| quote_identifier(c.trim()))
        .collect::<Vec<_>>()
        .join(",");

    let mut values = Vec::with_capacity(per_row * rows.len());
    let mut expanded = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != per_row {
            return Err(DbError::PlaceholderMismatch {
                placeholders: per_row,
                fillers: row.len(),
            });
        }
        let mut row_values = row.iter();
        let mut text = String::with_capacity(row_pattern.len());
        for segment in &pattern {
            match segment {
                Segment::Text(literal) => text.push_str(literal),
                Segment::Marker(_) => {
                    if let Some(value) = row_values.next() {
                        values.push(value.clone());
                        push_placeholder(&mut text, &values);
                    }
                }
            }
        }
        expanded.push(text);
    }

    let text = format!(
        "INSERT INTO {}({}) VALUES ({}) {};",
        table,
        columns,
        expanded.join("),("),
        extra
    );
    Ok(Query { text, values })
}

/// Build an upsert clause: `ON CONFLICT (column) DO UPDATE SET c = excluded.c,... WHERE ...`.
pub fn on_conflict(
    column: &str,
    update_columns: &[&str],
    where_clause: Option<&str>,
) -> DbResult<String> {
    if update_columns.is_empty() {
        return Err(DbError::invalid_input(
            "ON CONFLICT needs at least one column to update",
        ));
    }
    let set = update_columns
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(",");
    Ok(format!(
        "ON CONFLICT ({}) DO UPDATE SET {} WHERE {}",
        column,
        set,
        where_clause.unwrap_or("TRUE")
    ))
}

/// Format a timestamp as a database literal: second precision, space separator, no zone.
pub fn date(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S").to_string()
}
