// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! Each [`Database`] owns one tokio-rusqlite background thread; clones share it.
//! Several handles (or processes) may open the same file: every mutation that
//! reads before it writes runs in a `BEGIN IMMEDIATE` transaction, so writers
//! queue on SQLite's lock instead of racing.

use std::path::Path;
use std::time::Duration;

use dripline_config::model::StorageConfig;
use dripline_core::DriplineError;
use tracing::{debug, info};

/// Shared handle to the scheduler's SQLite datastore.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
    path: String,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

impl Database {
    /// Open (creating if needed) the database at `path` with default settings.
    pub async fn open(path: &str) -> Result<Self, DriplineError> {
        let config = StorageConfig {
            database_path: path.to_string(),
            ..StorageConfig::default()
        };
        Self::open_with(&config).await
    }

    /// Open the database described by `config`, applying PRAGMAs and migrations.
    pub async fn open_with(config: &StorageConfig) -> Result<Self, DriplineError> {
        let path = config.database_path.clone();
        if let Some(parent) = Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DriplineError::storage)?;
            }
        }

        let settings = PragmaSettings {
            wal_mode: config.wal_mode,
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
        };

        // Migrations need a plain `&mut rusqlite::Connection`, so they run on a
        // short-lived blocking connection before the async handle is opened.
        let migrate_path = path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), DriplineError> {
            let mut conn =
                rusqlite::Connection::open(&migrate_path).map_err(DriplineError::storage)?;
            apply_pragmas(&conn, settings).map_err(DriplineError::storage)?;
            crate::migrations::run_migrations(&mut conn)
        })
        .await
        .map_err(|e| DriplineError::Internal(format!("migration task failed: {e}")))??;

        let conn = tokio_rusqlite::Connection::open(&path)
            .await
            .map_err(DriplineError::storage)?;
        conn.call(move |conn| -> Result<(), rusqlite::Error> { apply_pragmas(conn, settings) })
            .await
            .map_err(map_tr_err)?;

        info!(path = %path, wal = config.wal_mode, "database opened");
        Ok(Self { conn, path })
    }

    /// The async connection used by the query modules.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Filesystem path the database was opened from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Checkpoint the WAL so the main database file is self-contained.
    pub async fn close(&self) -> Result<(), DriplineError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!(path = %self.path, "WAL checkpoint complete");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct PragmaSettings {
    wal_mode: bool,
    busy_timeout: Duration,
}

fn apply_pragmas(conn: &rusqlite::Connection, settings: PragmaSettings) -> rusqlite::Result<()> {
    conn.busy_timeout(settings.busy_timeout)?;
    if settings.wal_mode {
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Map a tokio-rusqlite error into a [`DriplineError::Storage`].
pub fn map_tr_err(err: tokio_rusqlite::Error<rusqlite::Error>) -> DriplineError {
    DriplineError::Storage {
        source: err.to_string().into(),
    }
}
