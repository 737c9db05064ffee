// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound message table (`broadcast_messages`) operations.
//!
//! Claiming is optimistic: a batch is stamped with a unique worker id in one
//! UPDATE and read back by that id. Every later transition is guarded by
//! `status = 'processing' AND processing_worker_id = <worker>`, so a row that
//! was swept or reclaimed in the meantime is left untouched.

use chrono::{DateTime, Utc};
use dripline_core::{DriplineError, Message, MessageSource};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, TransactionBehavior, params};

use super::{get_enum, get_opt_ts, get_ts, ts};
use crate::database::Database;

const MESSAGE_COLUMNS: &str = "id, user_id, device_id, campaign_id, sequence_id, \
     sequence_step_id, recipient_phone, recipient_name, content, media_url, status, \
     scheduled_at, processing_worker_id, processing_started_at, sent_at, error_message, \
     min_delay_secs, max_delay_secs, group_id, group_order";

/// Order in which a device sends its claimed messages.
const SEND_ORDER: &str = "scheduled_at, group_id, group_order";

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let campaign_id: Option<i64> = row.get(3)?;
    let sequence_id: Option<String> = row.get(4)?;
    let sequence_step_id: Option<String> = row.get(5)?;
    let source = match (campaign_id, sequence_id, sequence_step_id) {
        (Some(campaign_id), None, None) => MessageSource::Campaign { campaign_id },
        (None, Some(sequence_id), Some(sequence_step_id)) => MessageSource::Sequence {
            sequence_id,
            sequence_step_id,
        },
        _ => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Null,
                "message must have exactly one source".into(),
            ));
        }
    };

    Ok(Message {
        id: row.get(0)?,
        user_id: row.get(1)?,
        device_id: row.get(2)?,
        source,
        recipient_phone: row.get(6)?,
        recipient_name: row.get(7)?,
        content: row.get(8)?,
        media_url: row.get(9)?,
        status: get_enum(row, 10)?,
        scheduled_at: get_ts(row, 11)?,
        processing_worker_id: row.get(12)?,
        processing_started_at: get_opt_ts(row, 13)?,
        sent_at: get_opt_ts(row, 14)?,
        error_message: row.get(15)?,
        min_delay_secs: row.get(16)?,
        max_delay_secs: row.get(17)?,
        group_id: row.get(18)?,
        group_order: row.get(19)?,
    })
}

/// Insert a message unless a uniqueness rule already covers it.
///
/// Returns the number of rows inserted (0 or 1).
pub(crate) fn insert_message_tx(
    conn: &rusqlite::Connection,
    msg: &Message,
) -> rusqlite::Result<usize> {
    let (campaign_id, sequence_id, step_id) = match &msg.source {
        MessageSource::Campaign { campaign_id } => (Some(*campaign_id), None, None),
        MessageSource::Sequence {
            sequence_id,
            sequence_step_id,
        } => (None, Some(sequence_id.as_str()), Some(sequence_step_id.as_str())),
    };
    conn.execute(
        &format!(
            "INSERT INTO broadcast_messages ({MESSAGE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
             ON CONFLICT DO NOTHING"
        ),
        params![
            msg.id,
            msg.user_id,
            msg.device_id,
            campaign_id,
            sequence_id,
            step_id,
            msg.recipient_phone,
            msg.recipient_name,
            msg.content,
            msg.media_url,
            msg.status.as_ref(),
            ts(msg.scheduled_at),
            msg.processing_worker_id,
            msg.processing_started_at.map(ts),
            msg.sent_at.map(ts),
            msg.error_message,
            msg.min_delay_secs,
            msg.max_delay_secs,
            msg.group_id,
            msg.group_order,
        ],
    )
}

/// Insert one message, insert-if-absent. Returns `true` when a row was created.
pub async fn insert_message(db: &Database, msg: &Message) -> Result<bool, DriplineError> {
    let msg = msg.clone();
    db.connection()
        .call(move |conn| Ok(insert_message_tx(conn, &msg)? == 1))
        .await
        .map_err(crate::database::map_tr_err)
}

/// Insert the message for an active progress row.
///
/// Re-checks, inside one immediate transaction, that the row is still active
/// and that no non-failed message exists for (recipient, step).
pub async fn insert_step_message(
    db: &Database,
    progress_id: i64,
    msg: &Message,
) -> Result<bool, DriplineError> {
    let msg = msg.clone();
    db.connection()
        .call(move |conn| {
            let Some((_, step_id)) = msg.sequence_step() else {
                return Ok(false);
            };
            let step_id = step_id.to_string();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let eligible: bool = tx.query_row(
                "SELECT EXISTS (
                    SELECT 1 FROM sequence_contacts
                    WHERE id = ?1 AND status = 'active')
                 AND NOT EXISTS (
                    SELECT 1 FROM broadcast_messages
                    WHERE recipient_phone = ?2 AND sequence_step_id = ?3 AND status <> 'failed')",
                params![progress_id, msg.recipient_phone, step_id],
                |row| row.get(0),
            )?;
            if !eligible {
                return Ok(false);
            }
            let inserted = insert_message_tx(&tx, &msg)?;
            tx.commit()?;
            Ok(inserted == 1)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch one message.
pub async fn get_message(db: &Database, id: &str) -> Result<Option<Message>, DriplineError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM broadcast_messages WHERE id = ?1"),
                params![id],
                message_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Messages of one campaign, in send order.
pub async fn messages_for_campaign(
    db: &Database,
    campaign_id: i64,
) -> Result<Vec<Message>, DriplineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM broadcast_messages
                 WHERE campaign_id = ?1 ORDER BY {SEND_ORDER}"
            ))?;
            let rows = stmt
                .query_map(params![campaign_id], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Messages of one device, in send order.
pub async fn messages_for_device(
    db: &Database,
    device_id: &str,
) -> Result<Vec<Message>, DriplineError> {
    let device_id = device_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM broadcast_messages
                 WHERE device_id = ?1 ORDER BY {SEND_ORDER}"
            ))?;
            let rows = stmt
                .query_map(params![device_id], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Bounds of one claim.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub device_id: String,
    pub worker_id: String,
    pub now: DateTime<Utc>,
    /// Oldest `scheduled_at` still eligible.
    pub window_start: DateTime<Utc>,
    /// Latest `scheduled_at` already eligible.
    pub window_end: DateTime<Utc>,
    pub limit: u32,
}

/// Claim up to `limit` due pending messages of a device for `worker_id`.
///
/// The UPDATE and the read-back run in one `BEGIN IMMEDIATE` transaction,
/// so two workers can never stamp the same row. The read-back selects
/// exactly the rows carrying this worker id, in send order.
pub async fn claim_batch(db: &Database, req: ClaimRequest) -> Result<Vec<Message>, DriplineError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = ts(req.now);
            let claimed = tx.execute(
                &format!(
                    "UPDATE broadcast_messages
                     SET status = 'processing', processing_worker_id = ?1,
                         processing_started_at = ?2, updated_at = ?2
                     WHERE id IN (
                        SELECT id FROM broadcast_messages
                        WHERE device_id = ?3 AND status = 'pending'
                          AND processing_worker_id IS NULL
                          AND scheduled_at >= ?4 AND scheduled_at <= ?5
                        ORDER BY {SEND_ORDER}
                        LIMIT ?6)"
                ),
                params![
                    req.worker_id,
                    now,
                    req.device_id,
                    ts(req.window_start),
                    ts(req.window_end),
                    req.limit,
                ],
            )?;

            let messages = if claimed == 0 {
                Vec::new()
            } else {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM broadcast_messages
                     WHERE processing_worker_id = ?1 AND status = 'processing'
                     ORDER BY {SEND_ORDER}"
                ))?;
                stmt.query_map(params![req.worker_id], message_from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            };
            tx.commit()?;
            Ok(messages)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Mark a claimed message as sent.
pub async fn mark_sent(
    db: &Database,
    id: &str,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DriplineError> {
    let id = id.to_string();
    let worker_id = worker_id.to_string();
    let now = ts(now);
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE broadcast_messages
                 SET status = 'sent', sent_at = ?3, error_message = NULL, updated_at = ?3
                 WHERE id = ?1 AND status = 'processing' AND processing_worker_id = ?2",
                params![id, worker_id, now],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Mark a claimed message as permanently failed.
pub async fn mark_failed(
    db: &Database,
    id: &str,
    worker_id: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<bool, DriplineError> {
    let id = id.to_string();
    let worker_id = worker_id.to_string();
    let reason = reason.to_string();
    let now = ts(now);
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE broadcast_messages
                 SET status = 'failed', error_message = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = 'processing' AND processing_worker_id = ?2",
                params![id, worker_id, reason, now],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Return a claimed message to `pending`, clearing the worker fields.
pub async fn release(
    db: &Database,
    id: &str,
    worker_id: &str,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, DriplineError> {
    let id = id.to_string();
    let worker_id = worker_id.to_string();
    let reason = reason.map(str::to_string);
    let now = ts(now);
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE broadcast_messages
                 SET status = 'pending', processing_worker_id = NULL,
                     processing_started_at = NULL,
                     error_message = COALESCE(?3, error_message), updated_at = ?4
                 WHERE id = ?1 AND status = 'processing' AND processing_worker_id = ?2",
                params![id, worker_id, reason, now],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Release every message still claimed by `worker_id`.
pub async fn release_worker(
    db: &Database,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<usize, DriplineError> {
    let worker_id = worker_id.to_string();
    let now = ts(now);
    db.connection()
        .call(move |conn| {
            let released = conn.execute(
                "UPDATE broadcast_messages
                 SET status = 'pending', processing_worker_id = NULL,
                     processing_started_at = NULL, updated_at = ?2
                 WHERE status = 'processing' AND processing_worker_id = ?1",
                params![worker_id, now],
            )?;
            Ok(released)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Reset `processing` rows claimed before `started_before` to `pending`,
/// rescheduled at `now` so the next poll can claim them.
pub async fn reset_stuck(
    db: &Database,
    started_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<usize, DriplineError> {
    let cutoff = ts(started_before);
    let now = ts(now);
    db.connection()
        .call(move |conn| {
            let reset = conn.execute(
                "UPDATE broadcast_messages
                 SET status = 'pending', processing_worker_id = NULL,
                     processing_started_at = NULL, error_message = 'Message timeout',
                     scheduled_at = ?2, updated_at = ?2
                 WHERE status = 'processing'
                   AND (processing_started_at IS NULL OR processing_started_at < ?1)",
                params![cutoff, now],
            )?;
            Ok(reset)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fail pending rows scheduled before `scheduled_before`; no worker will
/// ever claim them.
pub async fn expire_overdue(
    db: &Database,
    scheduled_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<usize, DriplineError> {
    let cutoff = ts(scheduled_before);
    let now = ts(now);
    db.connection()
        .call(move |conn| {
            let expired = conn.execute(
                "UPDATE broadcast_messages
                 SET status = 'failed', error_message = 'expired: missed send window',
                     updated_at = ?2
                 WHERE status = 'pending' AND scheduled_at < ?1",
                params![cutoff, now],
            )?;
            Ok(expired)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Messages a device sent at or after `since`.
pub async fn count_sent_since(
    db: &Database,
    device_id: &str,
    since: DateTime<Utc>,
) -> Result<u32, DriplineError> {
    let device_id = device_id.to_string();
    let since = ts(since);
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM broadcast_messages
                 WHERE device_id = ?1 AND status = 'sent' AND sent_at >= ?2",
                params![device_id, since],
                |row| row.get(0),
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Earliest `sent_at` of a device at or after `since`.
pub async fn oldest_sent_since(
    db: &Database,
    device_id: &str,
    since: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, DriplineError> {
    let device_id = device_id.to_string();
    let since = ts(since);
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT MIN(sent_at) FROM broadcast_messages
                 WHERE device_id = ?1 AND status = 'sent' AND sent_at >= ?2",
                params![device_id, since],
                |row| get_opt_ts(row, 0),
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Move a device's pending rows scheduled in `[from, until)` to `until`.
///
/// Used when the device has hit its hourly cap: the rows stay claimable
/// once the cap frees up instead of ageing out of the claim window.
pub async fn defer_pending(
    db: &Database,
    device_id: &str,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<usize, DriplineError> {
    let device_id = device_id.to_string();
    let (from, until, now) = (ts(from), ts(until), ts(now));
    db.connection()
        .call(move |conn| {
            let deferred = conn.execute(
                "UPDATE broadcast_messages
                 SET scheduled_at = ?3, updated_at = ?4
                 WHERE device_id = ?1 AND status = 'pending'
                   AND scheduled_at >= ?2 AND scheduled_at < ?3",
                params![device_id, from, until, now],
            )?;
            Ok(deferred)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Row counts per status.
pub async fn status_counts(db: &Database) -> Result<Vec<(String, i64)>, DriplineError> {
    db.connection()
        .call(|conn| super::status_counts(conn, "broadcast_messages"))
        .await
        .map_err(crate::database::map_tr_err)
}
