// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sequence store: sequence definitions and their ordered steps.

use dripline_core::{DriplineError, SequenceDefinition, SequenceStep};
use rusqlite::{OptionalExtension, params};

use crate::database::Database;

const SEQUENCE_COLUMNS: &str =
    "id, user_id, name, entry_trigger, is_active, min_delay_secs, max_delay_secs";

const STEP_COLUMNS: &str = "id, sequence_id, day_number, trigger_tag, next_trigger, \
     trigger_delay_hours, min_delay_secs, max_delay_secs, content, media_url, is_entry_point";

fn sequence_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SequenceDefinition> {
    Ok(SequenceDefinition {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        entry_trigger: row.get(3)?,
        is_active: row.get(4)?,
        min_delay_secs: row.get(5)?,
        max_delay_secs: row.get(6)?,
    })
}

fn step_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SequenceStep> {
    Ok(SequenceStep {
        id: row.get(0)?,
        sequence_id: row.get(1)?,
        day_number: row.get(2)?,
        trigger: row.get(3)?,
        next_trigger: row.get(4)?,
        trigger_delay_hours: row.get(5)?,
        min_delay_secs: row.get(6)?,
        max_delay_secs: row.get(7)?,
        content: row.get(8)?,
        media_url: row.get(9)?,
        is_entry_point: row.get(10)?,
    })
}

/// Insert or replace a sequence definition.
pub async fn upsert_sequence(
    db: &Database,
    sequence: &SequenceDefinition,
) -> Result<(), DriplineError> {
    let seq = sequence.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO sequences (id, user_id, name, entry_trigger, is_active, min_delay_secs, max_delay_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (id) DO UPDATE SET
                    user_id = excluded.user_id,
                    name = excluded.name,
                    entry_trigger = excluded.entry_trigger,
                    is_active = excluded.is_active,
                    min_delay_secs = excluded.min_delay_secs,
                    max_delay_secs = excluded.max_delay_secs,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![
                    seq.id,
                    seq.user_id,
                    seq.name,
                    seq.entry_trigger,
                    seq.is_active,
                    seq.min_delay_secs,
                    seq.max_delay_secs,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Insert or replace a sequence step.
pub async fn upsert_step(db: &Database, step: &SequenceStep) -> Result<(), DriplineError> {
    let step = step.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO sequence_steps ({STEP_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                     ON CONFLICT (id) DO UPDATE SET
                        sequence_id = excluded.sequence_id,
                        day_number = excluded.day_number,
                        trigger_tag = excluded.trigger_tag,
                        next_trigger = excluded.next_trigger,
                        trigger_delay_hours = excluded.trigger_delay_hours,
                        min_delay_secs = excluded.min_delay_secs,
                        max_delay_secs = excluded.max_delay_secs,
                        content = excluded.content,
                        media_url = excluded.media_url,
                        is_entry_point = excluded.is_entry_point"
                ),
                params![
                    step.id,
                    step.sequence_id,
                    step.day_number,
                    step.trigger,
                    step.next_trigger,
                    step.trigger_delay_hours,
                    step.min_delay_secs,
                    step.max_delay_secs,
                    step.content,
                    step.media_url,
                    step.is_entry_point,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch one sequence by id.
pub async fn get_sequence(
    db: &Database,
    id: &str,
) -> Result<Option<SequenceDefinition>, DriplineError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {SEQUENCE_COLUMNS} FROM sequences WHERE id = ?1"),
                params![id],
                sequence_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Every sequence with `is_active` set.
pub async fn active_sequences(db: &Database) -> Result<Vec<SequenceDefinition>, DriplineError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SEQUENCE_COLUMNS} FROM sequences WHERE is_active = 1 ORDER BY id"
            ))?;
            let sequences = stmt
                .query_map([], sequence_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(sequences)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Steps of a sequence in `day_number` order.
pub async fn steps_for_sequence(
    db: &Database,
    sequence_id: &str,
) -> Result<Vec<SequenceStep>, DriplineError> {
    let sequence_id = sequence_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STEP_COLUMNS} FROM sequence_steps
                 WHERE sequence_id = ?1 ORDER BY day_number, id"
            ))?;
            let steps = stmt
                .query_map(params![sequence_id], step_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(steps)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch one step by id.
pub async fn get_step(db: &Database, id: &str) -> Result<Option<SequenceStep>, DriplineError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {STEP_COLUMNS} FROM sequence_steps WHERE id = ?1"),
                params![id],
                step_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}
