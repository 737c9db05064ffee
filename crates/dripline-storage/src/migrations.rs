// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded database migrations using refinery.
//!
//! SQL migration files are compiled into the binary at build time via
//! `embed_migrations!`. Migrations run automatically on database open.

use dripline_core::DriplineError;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Run all pending migrations against the given connection.
///
/// Refinery tracks applied migrations in its own `refinery_schema_history` table.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<(), DriplineError> {
    let report = embedded::migrations::runner()
        .run(conn)
        .map_err(DriplineError::storage)?;
    for migration in report.applied_migrations() {
        tracing::info!(version = migration.version(), name = %migration.name(), "applied migration");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_create_every_table_and_are_idempotent() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        for expected in [
            "broadcast_messages",
            "campaigns",
            "leads",
            "sequence_contacts",
            "sequence_steps",
            "sequences",
            "user_devices",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[test]
    fn message_must_have_exactly_one_source() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();

        let both = conn.execute(
            "INSERT INTO broadcast_messages
                (id, user_id, device_id, campaign_id, sequence_id, sequence_step_id,
                 recipient_phone, content, scheduled_at)
             VALUES ('m1', 'u', 'd', NULL, NULL, NULL, '6011', 'hi', '2026-01-01T00:00:00.000Z')",
            [],
        );
        assert!(both.is_err(), "a message without a source must be rejected");
    }
}
