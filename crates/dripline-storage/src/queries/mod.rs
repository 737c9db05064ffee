// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for the scheduler's tables.
//!
//! Every function takes a [`Database`](crate::Database) and runs on its
//! background thread. State transitions are single conditional statements or
//! immediate transactions that re-check their precondition.

pub mod campaigns;
pub mod devices;
pub mod leads;
pub mod messages;
pub mod progress;
pub mod sequences;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use dripline_core::types::{format_timestamp, parse_timestamp};
use rusqlite::Row;
use rusqlite::types::Type;

/// Format a timestamp as a bound parameter.
pub(crate) fn ts(value: DateTime<Utc>) -> String {
    format_timestamp(value)
}

/// Read a non-null timestamp column.
pub(crate) fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a nullable timestamp column.
pub(crate) fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        parse_timestamp(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Read a status column into its enum.
pub(crate) fn get_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    T::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Count rows grouped by a status column, for the `status` command.
pub(crate) fn status_counts(
    conn: &rusqlite::Connection,
    table: &'static str,
) -> rusqlite::Result<Vec<(String, i64)>> {
    let sql = format!("SELECT status, COUNT(*) FROM {table} GROUP BY status ORDER BY status");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
