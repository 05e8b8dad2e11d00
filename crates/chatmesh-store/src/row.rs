//! Column decoding shared by the `row_to_*` mappers.

use std::str::FromStr;

use chatmesh_shared::timestamp;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use uuid::Uuid;

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion(idx, e))
}

pub(crate) fn opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| conversion(idx, e))
}

pub(crate) fn ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    timestamp::parse(&raw).map_err(|e| conversion(idx, e))
}

pub(crate) fn opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| timestamp::parse(&s))
        .transpose()
        .map_err(|e| conversion(idx, e))
}

/// Decode a TEXT column holding one of the shared enums.
pub(crate) fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion(idx, e))
}

/// Canonical TEXT form of a timestamp column.
pub(crate) fn fmt_ts(dt: &DateTime<Utc>) -> String {
    timestamp::format(dt)
}

pub(crate) fn fmt_opt_ts(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(timestamp::format)
}

/// Map `QueryReturnedNoRows` to `Ok(None)`.
pub(crate) fn optional<T>(result: rusqlite::Result<T>) -> crate::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(other) => Err(other.into()),
    }
}

/// Map `QueryReturnedNoRows` to `StoreError::NotFound`.
pub(crate) fn required<T>(result: rusqlite::Result<T>) -> crate::Result<T> {
    result.map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => crate::StoreError::NotFound,
        other => crate::StoreError::Sqlite(other),
    })
}
