// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contact progress (`sequence_contacts`) operations.
//!
//! Status moves pending -> active -> completed|failed. The activation and
//! resolution statements here are the only writers of `status`; each one is
//! conditional on the current status so concurrent callers cannot double-act.

use chrono::{DateTime, Utc};
use dripline_core::{AdvanceOutcome, ContactProgress, DriplineError, ProgressStatus};
use rusqlite::{OptionalExtension, TransactionBehavior, params};

use super::{get_enum, get_opt_ts, get_ts, ts};
use crate::database::Database;

const PROGRESS_COLUMNS: &str = "sc.id, sc.sequence_id, sc.contact_phone, sc.contact_name, \
     sc.user_id, sc.sequence_step_id, sc.current_step, sc.enrolled_trigger, sc.status, \
     sc.next_trigger_time, sc.assigned_device_id, sc.completed_at";

fn progress_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContactProgress> {
    Ok(ContactProgress {
        id: row.get(0)?,
        sequence_id: row.get(1)?,
        contact_phone: row.get(2)?,
        contact_name: row.get(3)?,
        user_id: row.get(4)?,
        sequence_step_id: row.get(5)?,
        current_step: row.get(6)?,
        enrolled_trigger: row.get(7)?,
        status: get_enum(row, 8)?,
        next_trigger_time: get_ts(row, 9)?,
        assigned_device_id: row.get(10)?,
        completed_at: get_opt_ts(row, 11)?,
    })
}

/// One planned progress row for an enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProgress {
    pub sequence_id: String,
    pub contact_phone: String,
    pub contact_name: String,
    pub user_id: String,
    pub sequence_step_id: String,
    pub current_step: u32,
    pub enrolled_trigger: String,
    pub next_trigger_time: DateTime<Utc>,
    pub assigned_device_id: Option<String>,
}

/// Outcome of [`enroll_contact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollResult {
    /// Rows were inserted-if-absent; the count excludes rows that already existed.
    Created(usize),
    /// The contact is still in another sequence and exclusivity was requested.
    Busy,
}

/// How the terminal transition of a step is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResolution {
    Completed,
    Failed,
}

impl StepResolution {
    fn status(self) -> ProgressStatus {
        match self {
            Self::Completed => ProgressStatus::Completed,
            Self::Failed => ProgressStatus::Failed,
        }
    }
}

/// Lead bookkeeping applied when a contact runs out of steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionPolicy {
    pub remove_trigger_on_complete: bool,
}

/// Insert every planned row of one contact's enrollment in one immediate
/// transaction, skipping rows that already exist.
///
/// With `exclusive` set the contact is left alone while it has pending or
/// active rows in any other sequence.
pub async fn enroll_contact(
    db: &Database,
    rows: Vec<NewProgress>,
    exclusive: bool,
) -> Result<EnrollResult, DriplineError> {
    db.connection()
        .call(move |conn| {
            let Some(first) = rows.first() else {
                return Ok(EnrollResult::Created(0));
            };
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if exclusive {
                let busy: bool = tx.query_row(
                    "SELECT EXISTS (
                        SELECT 1 FROM sequence_contacts
                        WHERE contact_phone = ?1 AND sequence_id <> ?2
                          AND status IN ('pending', 'active'))",
                    params![first.contact_phone, first.sequence_id],
                    |row| row.get(0),
                )?;
                if busy {
                    return Ok(EnrollResult::Busy);
                }
            }

            let mut created = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO sequence_contacts
                        (sequence_id, contact_phone, contact_name, user_id, sequence_step_id,
                         current_step, enrolled_trigger, status, next_trigger_time, assigned_device_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9)
                     ON CONFLICT (sequence_id, contact_phone, sequence_step_id) DO NOTHING",
                )?;
                for row in &rows {
                    created += stmt.execute(params![
                        row.sequence_id,
                        row.contact_phone,
                        row.contact_name,
                        row.user_id,
                        row.sequence_step_id,
                        row.current_step,
                        row.enrolled_trigger,
                        ts(row.next_trigger_time),
                        row.assigned_device_id,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(EnrollResult::Created(created))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch one progress row.
pub async fn get_progress(db: &Database, id: i64) -> Result<Option<ContactProgress>, DriplineError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {PROGRESS_COLUMNS} FROM sequence_contacts sc WHERE sc.id = ?1"),
                params![id],
                progress_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// All rows of one contact in one sequence, ordered by step.
pub async fn progress_for_contact(
    db: &Database,
    sequence_id: &str,
    contact_phone: &str,
) -> Result<Vec<ContactProgress>, DriplineError> {
    let sequence_id = sequence_id.to_string();
    let contact_phone = contact_phone.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROGRESS_COLUMNS} FROM sequence_contacts sc
                 WHERE sc.sequence_id = ?1 AND sc.contact_phone = ?2
                 ORDER BY sc.current_step, sc.id"
            ))?;
            let rows = stmt
                .query_map(params![sequence_id, contact_phone], progress_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// The progress row a sequence message was created for.
pub async fn find_for_step(
    db: &Database,
    sequence_id: &str,
    contact_phone: &str,
    sequence_step_id: &str,
) -> Result<Option<ContactProgress>, DriplineError> {
    let sequence_id = sequence_id.to_string();
    let contact_phone = contact_phone.to_string();
    let step_id = sequence_step_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {PROGRESS_COLUMNS} FROM sequence_contacts sc
                     WHERE sc.sequence_id = ?1 AND sc.contact_phone = ?2
                       AND sc.sequence_step_id = ?3"
                ),
                params![sequence_id, contact_phone, step_id],
                progress_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Activate, in one statement, the earliest-due pending row of every
/// (sequence, contact) of an active sequence that has no active row.
///
/// Ties on `next_trigger_time` go to the lower `current_step`.
pub async fn activate_due_heads(db: &Database, now: DateTime<Utc>) -> Result<usize, DriplineError> {
    let now = ts(now);
    db.connection()
        .call(move |conn| {
            let activated = conn.execute(
                "UPDATE sequence_contacts SET status = 'active', updated_at = ?1
                 WHERE id IN (
                    SELECT sc.id FROM sequence_contacts sc
                    JOIN sequences s ON s.id = sc.sequence_id AND s.is_active = 1
                    WHERE sc.status = 'pending' AND sc.next_trigger_time <= ?1
                      AND NOT EXISTS (
                          SELECT 1 FROM sequence_contacts a
                          WHERE a.sequence_id = sc.sequence_id
                            AND a.contact_phone = sc.contact_phone
                            AND a.status = 'active')
                      AND sc.id = (
                          SELECT p.id FROM sequence_contacts p
                          WHERE p.sequence_id = sc.sequence_id
                            AND p.contact_phone = sc.contact_phone
                            AND p.status = 'pending' AND p.next_trigger_time <= ?1
                          ORDER BY p.next_trigger_time, p.current_step, p.id
                          LIMIT 1)
                 )",
                params![now],
            )?;
            Ok(activated)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Active rows of active sequences that are due and have no live message.
pub async fn due_without_message(
    db: &Database,
    now: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<ContactProgress>, DriplineError> {
    let now = ts(now);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROGRESS_COLUMNS} FROM sequence_contacts sc
                 JOIN sequences s ON s.id = sc.sequence_id AND s.is_active = 1
                 WHERE sc.status = 'active' AND sc.next_trigger_time <= ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM broadcast_messages m
                       WHERE m.recipient_phone = sc.contact_phone
                         AND m.sequence_step_id = sc.sequence_step_id
                         AND m.status <> 'failed')
                 ORDER BY sc.next_trigger_time, sc.id
                 LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![now, limit], progress_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Active rows whose step message was already sent.
///
/// These are left behind when the process stops between a send and the
/// advancement that should follow it.
pub async fn active_with_sent_message(db: &Database) -> Result<Vec<i64>, DriplineError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sc.id FROM sequence_contacts sc
                 WHERE sc.status = 'active'
                   AND EXISTS (
                       SELECT 1 FROM broadcast_messages m
                       WHERE m.sequence_id = sc.sequence_id
                         AND m.recipient_phone = sc.contact_phone
                         AND m.sequence_step_id = sc.sequence_step_id
                         AND m.status = 'sent')
                 ORDER BY sc.id",
            )?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Resolve an active step and move the contact forward, atomically.
///
/// 1. Marks the row completed/failed if it is still active; otherwise
///    returns [`AdvanceOutcome::AlreadyResolved`].
/// 2. Activates the contact's earliest-due pending row, if any.
/// 3. Reports `Waiting` when pending rows remain but none is due.
/// 4. With no pending rows left, rewrites the lead's triggers and reports
///    `SequenceCompleted`.
pub async fn resolve_active_step(
    db: &Database,
    progress_id: i64,
    resolution: StepResolution,
    now: DateTime<Utc>,
    policy: CompletionPolicy,
) -> Result<AdvanceOutcome, DriplineError> {
    let now = ts(now);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let resolved = tx
                .query_row(
                    "UPDATE sequence_contacts
                     SET status = ?2, completed_at = ?3, updated_at = ?3
                     WHERE id = ?1 AND status = 'active'
                     RETURNING sequence_id, contact_phone, enrolled_trigger",
                    params![progress_id, resolution.status().as_ref(), now],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;
            let Some((sequence_id, contact_phone, enrolled_trigger)) = resolved else {
                return Ok(AdvanceOutcome::AlreadyResolved);
            };

            let next = tx
                .query_row(
                    "SELECT id, current_step FROM sequence_contacts
                     WHERE sequence_id = ?1 AND contact_phone = ?2
                       AND status = 'pending' AND next_trigger_time <= ?3
                     ORDER BY next_trigger_time, current_step, id
                     LIMIT 1",
                    params![sequence_id, contact_phone, now],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, u32>(1)?)),
                )
                .optional()?;

            if let Some((next_id, current_step)) = next {
                let activated = tx.execute(
                    "UPDATE sequence_contacts SET status = 'active', updated_at = ?2
                     WHERE id = ?1 AND status = 'pending'
                       AND NOT EXISTS (
                           SELECT 1 FROM sequence_contacts a
                           WHERE a.sequence_id = ?3 AND a.contact_phone = ?4
                             AND a.status = 'active')",
                    params![next_id, now, sequence_id, contact_phone],
                )?;
                if activated == 1 {
                    tx.commit()?;
                    return Ok(AdvanceOutcome::Activated {
                        progress_id: next_id,
                        current_step,
                    });
                }
            }

            let next_due: Option<String> = tx.query_row(
                "SELECT MIN(next_trigger_time) FROM sequence_contacts
                 WHERE sequence_id = ?1 AND contact_phone = ?2 AND status IN ('pending', 'active')",
                params![sequence_id, contact_phone],
                |row| row.get(0),
            )?;
            if let Some(raw) = next_due {
                tx.commit()?;
                return Ok(AdvanceOutcome::Waiting {
                    next_due: dripline_core::types::parse_timestamp(&raw).ok(),
                });
            }

            let next_trigger: Option<String> = tx
                .query_row(
                    "SELECT st.next_trigger FROM sequence_contacts sc
                     JOIN sequence_steps st ON st.id = sc.sequence_step_id
                     WHERE sc.sequence_id = ?1 AND sc.contact_phone = ?2
                     ORDER BY sc.current_step DESC
                     LIMIT 1",
                    params![sequence_id, contact_phone],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?
                .flatten()
                .filter(|t: &String| !t.trim().is_empty());

            let remove = policy
                .remove_trigger_on_complete
                .then_some(enrolled_trigger.as_str());
            super::leads::rewrite_triggers(
                &tx,
                &contact_phone,
                remove,
                next_trigger.as_deref(),
                &now,
            )?;
            tx.commit()?;

            Ok(AdvanceOutcome::SequenceCompleted {
                sequence_id,
                contact_phone,
                next_trigger,
            })
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Row counts per status.
pub async fn status_counts(db: &Database) -> Result<Vec<(String, i64)>, DriplineError> {
    db.connection()
        .call(|conn| super::status_counts(conn, "sequence_contacts"))
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use dripline_core::{Lead, SequenceDefinition, SequenceStep, TriggerSet};
    use tempfile::tempdir;

    use crate::queries::{leads, sequences};

    async fn setup(steps: u32) -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        sequences::upsert_sequence(
            &db,
            &SequenceDefinition {
                id: "seq-1".into(),
                user_id: "user-1".into(),
                name: "Warm".into(),
                entry_trigger: "WARM".into(),
                is_active: true,
                min_delay_secs: 1,
                max_delay_secs: 2,
            },
        )
        .await
        .unwrap();
        for day in 1..=steps {
            sequences::upsert_step(
                &db,
                &SequenceStep {
                    id: format!("step-{day}"),
                    sequence_id: "seq-1".into(),
                    day_number: day,
                    trigger: "WARM".into(),
                    next_trigger: (day == steps).then(|| "HOT".to_string()),
                    trigger_delay_hours: 24,
                    min_delay_secs: None,
                    max_delay_secs: None,
                    content: format!("day {day}"),
                    media_url: None,
                    is_entry_point: day == 1,
                },
            )
            .await
            .unwrap();
        }
        leads::upsert_lead(
            &db,
            &Lead {
                phone: "601".into(),
                user_id: "user-1".into(),
                name: "Aina".into(),
                device_id: Some("dev-1".into()),
                niche: "".into(),
                triggers: TriggerSet::parse("WARM"),
                target_status: "prospect".into(),
            },
        )
        .await
        .unwrap();
        (db, dir)
    }

    fn plan(step: u32, at: DateTime<Utc>) -> NewProgress {
        NewProgress {
            sequence_id: "seq-1".into(),
            contact_phone: "601".into(),
            contact_name: "Aina".into(),
            user_id: "user-1".into(),
            sequence_step_id: format!("step-{step}"),
            current_step: step,
            enrolled_trigger: "WARM".into(),
            next_trigger_time: at,
            assigned_device_id: Some("dev-1".into()),
        }
    }

    const POLICY: CompletionPolicy = CompletionPolicy {
        remove_trigger_on_complete: true,
    };

    #[tokio::test]
    async fn enrollment_is_insert_if_absent() {
        let (db, _dir) = setup(2).await;
        let now = Utc::now();
        let rows = vec![plan(1, now), plan(2, now + Duration::hours(24))];

        assert_eq!(
            enroll_contact(&db, rows.clone(), true).await.unwrap(),
            EnrollResult::Created(2)
        );
        assert_eq!(
            enroll_contact(&db, rows, true).await.unwrap(),
            EnrollResult::Created(0)
        );
        let stored = progress_for_contact(&db, "seq-1", "601").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|p| p.status == ProgressStatus::Pending));
    }

    #[tokio::test]
    async fn only_one_head_is_activated() {
        let (db, _dir) = setup(3).await;
        let now = Utc::now();
        let rows = vec![
            plan(1, now - Duration::seconds(5)),
            plan(2, now - Duration::seconds(3)),
            plan(3, now + Duration::hours(1)),
        ];
        enroll_contact(&db, rows, false).await.unwrap();

        assert_eq!(activate_due_heads(&db, now).await.unwrap(), 1);
        assert_eq!(activate_due_heads(&db, now).await.unwrap(), 0);

        let stored = progress_for_contact(&db, "seq-1", "601").await.unwrap();
        let active: Vec<u32> = stored
            .iter()
            .filter(|p| p.status == ProgressStatus::Active)
            .map(|p| p.current_step)
            .collect();
        assert_eq!(active, vec![1]);
    }

    #[tokio::test]
    async fn resolving_twice_is_a_no_op() {
        let (db, _dir) = setup(2).await;
        let now = Utc::now();
        enroll_contact(&db, vec![plan(1, now), plan(2, now + Duration::hours(24))], false)
            .await
            .unwrap();
        activate_due_heads(&db, now).await.unwrap();
        let head = progress_for_contact(&db, "seq-1", "601").await.unwrap()[0].clone();

        let first = resolve_active_step(&db, head.id, StepResolution::Completed, now, POLICY)
            .await
            .unwrap();
        assert!(matches!(first, AdvanceOutcome::Waiting { next_due: Some(_) }));
        let second = resolve_active_step(&db, head.id, StepResolution::Completed, now, POLICY)
            .await
            .unwrap();
        assert_eq!(second, AdvanceOutcome::AlreadyResolved);
    }

    #[tokio::test]
    async fn last_step_completion_swaps_lead_triggers() {
        let (db, _dir) = setup(1).await;
        let now = Utc::now();
        enroll_contact(&db, vec![plan(1, now)], false).await.unwrap();
        activate_due_heads(&db, now).await.unwrap();
        let head = progress_for_contact(&db, "seq-1", "601").await.unwrap()[0].clone();

        let outcome = resolve_active_step(&db, head.id, StepResolution::Failed, now, POLICY)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::SequenceCompleted {
                sequence_id: "seq-1".into(),
                contact_phone: "601".into(),
                next_trigger: Some("HOT".into()),
            }
        );
        let lead = leads::get_lead(&db, "601").await.unwrap().unwrap();
        assert!(!lead.triggers.contains("WARM"));
        assert!(lead.triggers.contains("HOT"));

        let stored = get_progress(&db, head.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProgressStatus::Failed);
        assert!(stored.completed_at.is_some());
    }
}
