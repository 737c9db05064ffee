// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Dripline outbound scheduler.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, async access
//! via `tokio-rusqlite`, and typed operations for leads, devices, sequences,
//! contact progress, campaigns, and the outbound message table.

pub mod database;
pub mod migrations;
pub mod queries;

pub use database::Database;
pub use queries::devices::SqliteDeviceStatus;
