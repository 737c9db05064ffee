// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign store operations.

use chrono::{DateTime, Utc};
use dripline_core::{CampaignDefinition, CampaignStatus, DriplineError, Message};
use rusqlite::{OptionalExtension, TransactionBehavior, params};

use super::{get_enum, get_opt_ts, ts};
use crate::database::Database;

const CAMPAIGN_COLUMNS: &str = "id, user_id, title, niche, target_status, message, media_url, \
     campaign_date, time_schedule, scheduled_at, min_delay_secs, max_delay_secs, status";

fn campaign_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CampaignDefinition> {
    Ok(CampaignDefinition {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        niche: row.get(3)?,
        target_status: row.get(4)?,
        message: row.get(5)?,
        media_url: row.get(6)?,
        campaign_date: row.get(7)?,
        time_schedule: row.get(8)?,
        scheduled_at: get_opt_ts(row, 9)?,
        min_delay_secs: row.get(10)?,
        max_delay_secs: row.get(11)?,
        status: get_enum(row, 12)?,
    })
}

/// Fields needed to create a campaign. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub user_id: String,
    pub title: String,
    pub niche: String,
    pub target_status: String,
    pub message: String,
    pub media_url: Option<String>,
    pub campaign_date: Option<String>,
    pub time_schedule: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub min_delay_secs: u32,
    pub max_delay_secs: u32,
}

impl Default for NewCampaign {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            title: String::new(),
            niche: String::new(),
            target_status: "all".to_string(),
            message: String::new(),
            media_url: None,
            campaign_date: None,
            time_schedule: None,
            scheduled_at: None,
            min_delay_secs: 10,
            max_delay_secs: 30,
        }
    }
}

/// Create a pending campaign and return its id.
pub async fn insert_campaign(db: &Database, campaign: &NewCampaign) -> Result<i64, DriplineError> {
    let c = campaign.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO campaigns
                    (user_id, title, niche, target_status, message, media_url, campaign_date,
                     time_schedule, scheduled_at, min_delay_secs, max_delay_secs, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'pending')",
                params![
                    c.user_id,
                    c.title,
                    c.niche,
                    c.target_status,
                    c.message,
                    c.media_url,
                    c.campaign_date,
                    c.time_schedule,
                    c.scheduled_at.map(ts),
                    c.min_delay_secs,
                    c.max_delay_secs,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch one campaign.
pub async fn get_campaign(
    db: &Database,
    id: i64,
) -> Result<Option<CampaignDefinition>, DriplineError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![id],
                campaign_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Campaigns that may still produce messages: pending or active.
pub async fn open_campaigns(db: &Database) -> Result<Vec<CampaignDefinition>, DriplineError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
                 WHERE status IN ('pending', 'active') ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([], campaign_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Result of [`launch_campaign`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignLaunch {
    /// This call moved the campaign from pending to active.
    pub activated: bool,
    /// Messages actually inserted.
    pub inserted: usize,
}

/// Flip a campaign `pending -> active` (if still pending) and insert its
/// messages insert-if-absent, in one immediate transaction.
///
/// A campaign that was completed in the meantime gets no new messages.
pub async fn launch_campaign(
    db: &Database,
    campaign_id: i64,
    messages: Vec<Message>,
    now: DateTime<Utc>,
) -> Result<CampaignLaunch, DriplineError> {
    let now = ts(now);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let activated = tx.execute(
                "UPDATE campaigns SET status = 'active', updated_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![campaign_id, now],
            )? == 1;

            let status: Option<CampaignStatus> = tx
                .query_row(
                    "SELECT status FROM campaigns WHERE id = ?1",
                    params![campaign_id],
                    |row| get_enum(row, 0),
                )
                .optional()?;
            if status != Some(CampaignStatus::Active) {
                return Ok(CampaignLaunch {
                    activated: false,
                    inserted: 0,
                });
            }

            let mut inserted = 0;
            for msg in &messages {
                inserted += super::messages::insert_message_tx(&tx, msg)?;
            }
            tx.commit()?;
            Ok(CampaignLaunch {
                activated,
                inserted,
            })
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Flip an active campaign to completed once none of its messages is
/// pending or processing. Returns `true` when the campaign was completed.
pub async fn complete_if_drained(
    db: &Database,
    campaign_id: i64,
    now: DateTime<Utc>,
) -> Result<bool, DriplineError> {
    let now = ts(now);
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE campaigns SET status = 'completed', updated_at = ?2
                 WHERE id = ?1 AND status = 'active'
                   AND NOT EXISTS (
                       SELECT 1 FROM broadcast_messages
                       WHERE campaign_id = ?1 AND status IN ('pending', 'processing'))",
                params![campaign_id, now],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Row counts per status.
pub async fn status_counts(db: &Database) -> Result<Vec<(String, i64)>, DriplineError> {
    db.connection()
        .call(|conn| super::status_counts(conn, "campaigns"))
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dripline_core::MessageSource;
    use tempfile::tempdir;

    use crate::queries::messages;

    fn msg(id: &str, campaign_id: i64, phone: &str) -> Message {
        Message::pending(
            id.into(),
            "user-1".into(),
            "dev-1".into(),
            MessageSource::Campaign { campaign_id },
            phone.into(),
            "".into(),
            "hello".into(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn launch_activates_once_and_completes_when_drained() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        let id = insert_campaign(
            &db,
            &NewCampaign {
                user_id: "user-1".into(),
                title: "promo".into(),
                message: "hello".into(),
                ..NewCampaign::default()
            },
        )
        .await
        .unwrap();
        let now = Utc::now();

        let first = launch_campaign(&db, id, vec![msg("m1", id, "601")], now)
            .await
            .unwrap();
        assert_eq!(
            first,
            CampaignLaunch {
                activated: true,
                inserted: 1
            }
        );
        let again = launch_campaign(&db, id, vec![msg("m2", id, "601"), msg("m3", id, "602")], now)
            .await
            .unwrap();
        assert_eq!(
            again,
            CampaignLaunch {
                activated: false,
                inserted: 1
            }
        );
        assert_eq!(open_campaigns(&db).await.unwrap().len(), 1);

        assert!(!complete_if_drained(&db, id, now).await.unwrap());
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute("UPDATE broadcast_messages SET status = 'sent'", [])?;
                Ok(())
            })
            .await
            .unwrap();
        assert!(complete_if_drained(&db, id, now).await.unwrap());

        let stored = get_campaign(&db, id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Completed);
        assert!(open_campaigns(&db).await.unwrap().is_empty());

        let late = launch_campaign(&db, id, vec![msg("m4", id, "603")], now)
            .await
            .unwrap();
        assert_eq!(late.inserted, 0);
        assert_eq!(messages::messages_for_campaign(&db, id).await.unwrap().len(), 2);
    }
}
