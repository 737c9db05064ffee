// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lead/contact store operations.

use dripline_core::{CampaignDefinition, DriplineError, Lead, TriggerSet};
use rusqlite::{OptionalExtension, params};

use crate::database::Database;

const LEAD_COLUMNS: &str = "phone, user_id, name, device_id, niche, trigger_tags, target_status";

fn lead_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lead> {
    let tags: String = row.get(5)?;
    Ok(Lead {
        phone: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        device_id: row.get(3)?,
        niche: row.get(4)?,
        triggers: TriggerSet::parse(&tags),
        target_status: row.get(6)?,
    })
}

/// Insert or replace a lead.
pub async fn upsert_lead(db: &Database, lead: &Lead) -> Result<(), DriplineError> {
    let lead = lead.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO leads (phone, user_id, name, device_id, niche, trigger_tags, target_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (phone) DO UPDATE SET
                    user_id = excluded.user_id,
                    name = excluded.name,
                    device_id = excluded.device_id,
                    niche = excluded.niche,
                    trigger_tags = excluded.trigger_tags,
                    target_status = excluded.target_status,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![
                    lead.phone,
                    lead.user_id,
                    lead.name,
                    lead.device_id,
                    lead.niche,
                    lead.triggers.to_string(),
                    lead.target_status,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch one lead by phone.
pub async fn get_lead(db: &Database, phone: &str) -> Result<Option<Lead>, DriplineError> {
    let phone = phone.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE phone = ?1"),
                params![phone],
                lead_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Leads of `user_id` whose trigger set contains `trigger`.
///
/// The `LIKE` prefilter narrows the scan; the exact set membership check
/// happens on the parsed [`TriggerSet`] so `vip` never matches `vip2`.
pub async fn leads_with_trigger(
    db: &Database,
    user_id: &str,
    trigger: &str,
) -> Result<Vec<Lead>, DriplineError> {
    let user_id = user_id.to_string();
    let trigger = trigger.trim().to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LEAD_COLUMNS} FROM leads
                 WHERE user_id = ?1 AND instr(trigger_tags, ?2) > 0
                 ORDER BY phone"
            ))?;
            let leads = stmt
                .query_map(params![user_id, trigger], lead_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(leads
                .into_iter()
                .filter(|lead| lead.triggers.contains(&trigger))
                .collect())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Leads a campaign should reach that have no message for it yet.
///
/// Matches the campaign owner, a niche containing the campaign niche, the
/// target status (`all` matches every status), and requires an assigned
/// device.
pub async fn campaign_recipients(
    db: &Database,
    campaign: &CampaignDefinition,
) -> Result<Vec<Lead>, DriplineError> {
    let campaign_id = campaign.id;
    let user_id = campaign.user_id.clone();
    let niche = campaign.niche.trim().to_string();
    let target_status = campaign.target_status.trim().to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LEAD_COLUMNS} FROM leads l
                 WHERE l.user_id = ?1
                   AND (?2 = '' OR instr(lower(l.niche), lower(?2)) > 0)
                   AND (?3 = '' OR lower(?3) = 'all' OR l.target_status = ?3)
                   AND l.device_id IS NOT NULL AND l.device_id <> ''
                   AND NOT EXISTS (
                       SELECT 1 FROM broadcast_messages m
                       WHERE m.campaign_id = ?4 AND m.recipient_phone = l.phone
                   )
                 ORDER BY l.device_id, l.phone"
            ))?;
            let leads = stmt
                .query_map(params![user_id, niche, target_status, campaign_id], lead_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(leads)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Rewrite a lead's trigger set inside an open transaction.
///
/// Returns `true` when the stored set changed.
pub(crate) fn rewrite_triggers(
    conn: &rusqlite::Connection,
    phone: &str,
    remove: Option<&str>,
    add: Option<&str>,
    now: &str,
) -> rusqlite::Result<bool> {
    let Some(raw) = conn
        .query_row(
            "SELECT trigger_tags FROM leads WHERE phone = ?1",
            params![phone],
            |row| row.get::<_, String>(0),
        )
        .optional()?
    else {
        return Ok(false);
    };

    let mut triggers = TriggerSet::parse(&raw);
    let mut changed = false;
    if let Some(tag) = remove {
        changed |= triggers.remove(tag);
    }
    if let Some(tag) = add {
        changed |= triggers.insert(tag);
    }
    if changed {
        conn.execute(
            "UPDATE leads SET trigger_tags = ?2, updated_at = ?3 WHERE phone = ?1",
            params![phone, triggers.to_string(), now],
        )?;
    }
    Ok(changed)
}
