//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! This module provides a `FromRow` trait that models can implement to
//! define how they are constructed from database rows, plus helper functions
//! for common query patterns.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// This provides graceful error handling instead of panicking when the database
/// contains invalid enum values (from corruption, manual edits, etc.).
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Parse an optional JSON text column.
fn parse_json(row: &Row, col: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(col)?;
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

/// Trait for constructing a type from a database row.
///
/// Implementing this trait allows using the `query_one` and `query_all`
/// helper functions, reducing repetitive row mapping closures.
pub trait FromRow: Sized {
    /// Construct an instance from a database row.
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const TEACHER_COLS: &str = "id, full_name, email, cin, phone, level, subject, classes_count, tests_per_term, created_at, updated_at";

pub const LICENSE_COLS: &str = "id, teacher_id, key, allowed_devices, valid_until, status, upload_limit, upload_count, created_at, updated_at";

pub const LICENSE_WITH_TEACHER_COLS: &str = "l.id, l.teacher_id, l.key, l.allowed_devices, l.valid_until, l.status, l.upload_limit, l.upload_count, l.created_at, l.updated_at, t.full_name, t.email";

pub const ACTIVATION_COLS: &str =
    "id, license_id, device_id, user_agent, ip, metadata, activated_at, last_seen_at, last_ip";

pub const EVENT_COLS: &str = "id, license_id, teacher_id, type, message, metadata, created_at";

// ============ FromRow Implementations ============

impl FromRow for Teacher {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Teacher {
            id: row.get(0)?,
            full_name: row.get(1)?,
            email: row.get(2)?,
            cin: row.get(3)?,
            phone: row.get(4)?,
            level: row.get(5)?,
            subject: row.get(6)?,
            classes_count: row.get(7)?,
            tests_per_term: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            teacher_id: row.get(1)?,
            key: row.get(2)?,
            allowed_devices: row.get(3)?,
            valid_until: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            upload_limit: row.get(6)?,
            upload_count: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

impl FromRow for LicenseWithTeacher {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(LicenseWithTeacher {
            license: License::from_row(row)?,
            teacher_name: row.get(10)?,
            teacher_email: row.get(11)?,
        })
    }
}

impl FromRow for Activation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Activation {
            id: row.get(0)?,
            license_id: row.get(1)?,
            device_id: row.get(2)?,
            user_agent: row.get(3)?,
            ip: row.get(4)?,
            metadata: parse_json(row, 5)?,
            activated_at: row.get(6)?,
            last_seen_at: row.get(7)?,
            last_ip: row.get(8)?,
        })
    }
}

impl FromRow for EventLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(EventLog {
            id: row.get(0)?,
            license_id: row.get(1)?,
            teacher_id: row.get(2)?,
            event_type: row.get(3)?,
            message: row.get(4)?,
            metadata: parse_json(row, 5)?,
            created_at: row.get(6)?,
        })
    }
}
