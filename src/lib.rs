//! MarkFiller licensing server.
//!
//! This library provides the license lifecycle and device-binding engine for
//! the MarkFiller Excel add-in: issuance, per-device activation against a
//! slot capacity, upload-quota metering with auto-suspension, and an
//! append-only event log, exposed over a small HTTP API.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod quota;
pub mod rate_limit;
pub mod util;
