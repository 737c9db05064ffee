// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message materializer.
//!
//! Turns due campaigns and due sequence steps into rows of the outbound
//! message table. Every insert is insert-if-absent against the table's
//! uniqueness rules, so running a tick twice creates nothing the second
//! time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use dripline_config::model::{DispatchConfig, DriplineConfig, MaterializerConfig};
use dripline_core::{
    CampaignDefinition, CampaignStatus, ContactProgress, DeviceStatus, DriplineError, Message,
    MessageSource, SequenceDefinition, SequenceStep,
};
use dripline_storage::Database;
use dripline_storage::queries::{campaigns, leads, messages, progress, sequences};
use tracing::{debug, info, warn};

use crate::advancement::StepAdvancer;
use crate::dispatch::random_delay;
use crate::template::{Recipient, Renderer};

/// Counters of one materializer tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    pub campaigns_activated: usize,
    pub campaigns_completed: usize,
    pub campaign_messages: usize,
    /// Campaign recipients and sequence steps whose device was offline.
    pub skipped_offline: usize,
    pub heads_activated: usize,
    pub sequence_messages: usize,
    /// Sequence steps with no assigned device or a missing step definition.
    pub skipped_unroutable: usize,
}

/// Creates message rows for due campaigns and sequence steps.
pub struct Materializer {
    db: Database,
    devices: Arc<dyn DeviceStatus>,
    advancer: Arc<StepAdvancer>,
    config: MaterializerConfig,
    dispatch: DispatchConfig,
    renderer: Renderer,
}

/// Online lookups memoized for one tick.
struct DeviceCache<'a> {
    devices: &'a dyn DeviceStatus,
    known: HashMap<String, bool>,
}

impl DeviceCache<'_> {
    async fn is_online(&mut self, device_id: &str) -> Result<bool, DriplineError> {
        if let Some(online) = self.known.get(device_id) {
            return Ok(*online);
        }
        let online = self.devices.is_device_online(device_id).await?;
        self.known.insert(device_id.to_string(), online);
        Ok(online)
    }
}

impl Materializer {
    pub fn new(
        db: Database,
        devices: Arc<dyn DeviceStatus>,
        advancer: Arc<StepAdvancer>,
        config: &DriplineConfig,
    ) -> Self {
        Self {
            db,
            devices,
            advancer,
            config: config.materializer.clone(),
            dispatch: config.dispatch.clone(),
            renderer: Renderer::new(&config.template),
        }
    }

    pub async fn materialize_ready_work(&self) -> Result<MaterializeReport, DriplineError> {
        self.materialize_ready_work_at(Utc::now()).await
    }

    pub async fn materialize_ready_work_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<MaterializeReport, DriplineError> {
        let mut report = MaterializeReport::default();
        let mut cache = DeviceCache {
            devices: self.devices.as_ref(),
            known: HashMap::new(),
        };

        self.materialize_campaigns(now, &mut cache, &mut report)
            .await?;
        report.heads_activated = self.advancer.activate_due_heads(now).await?;
        self.materialize_sequences(now, &mut cache, &mut report)
            .await?;

        if report.campaign_messages + report.sequence_messages > 0 {
            info!(
                campaign_messages = report.campaign_messages,
                sequence_messages = report.sequence_messages,
                skipped_offline = report.skipped_offline,
                "materialized messages"
            );
        } else {
            debug!("materializer tick created nothing");
        }
        Ok(report)
    }

    async fn materialize_campaigns(
        &self,
        now: DateTime<Utc>,
        cache: &mut DeviceCache<'_>,
        report: &mut MaterializeReport,
    ) -> Result<(), DriplineError> {
        let offset = self.utc_offset();
        for campaign in campaigns::open_campaigns(&self.db).await? {
            let due_at = match campaign.resolve_schedule(offset) {
                Ok(due_at) => due_at,
                Err(e) => {
                    warn!(campaign_id = campaign.id, error = %e, "skipping campaign with bad schedule");
                    continue;
                }
            };
            if campaign.status == CampaignStatus::Pending && !campaign.is_due(now, offset)? {
                continue;
            }
            self.expand_campaign(&campaign, due_at, now, cache, report)
                .await?;
        }
        Ok(())
    }

    async fn expand_campaign(
        &self,
        campaign: &CampaignDefinition,
        due_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        cache: &mut DeviceCache<'_>,
        report: &mut MaterializeReport,
    ) -> Result<(), DriplineError> {
        let (min_delay, max_delay) = self.delay_bounds(campaign.min_delay_secs, campaign.max_delay_secs);
        let start = due_at.map_or(now, |at| at.max(now));
        let mut cursors: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut skipped = 0usize;
        let mut batch = Vec::new();

        for lead in leads::campaign_recipients(&self.db, campaign).await? {
            let Some(device_id) = lead.device_id.clone() else {
                continue;
            };
            if !cache.is_online(&device_id).await? {
                skipped += 1;
                continue;
            }
            let cursor = cursors.entry(device_id.clone()).or_insert(start);
            let scheduled_at = *cursor;
            let gap = random_delay(min_delay, max_delay).max(std::time::Duration::from_secs(1));
            *cursor = scheduled_at + chrono::Duration::seconds(gap.as_secs() as i64);

            let content = self.renderer.render(
                &campaign.message,
                &Recipient {
                    name: &lead.name,
                    phone: &lead.phone,
                },
                scheduled_at,
                &mut rand::thread_rng(),
            );
            let order = batch.len() as i64;
            batch.push(
                Message::pending(
                    uuid::Uuid::new_v4().to_string(),
                    campaign.user_id.clone(),
                    device_id,
                    MessageSource::Campaign {
                        campaign_id: campaign.id,
                    },
                    lead.phone.clone(),
                    lead.name.clone(),
                    content,
                    scheduled_at,
                )
                .with_media_url(campaign.media_url.clone())
                .with_delay_bounds(min_delay, max_delay)
                .with_group(format!("campaign-{}", campaign.id), order),
            );
        }

        if skipped > 0 {
            warn!(
                campaign_id = campaign.id,
                skipped, "campaign recipients skipped, device offline"
            );
            report.skipped_offline += skipped;
        }

        if campaign.status == CampaignStatus::Pending || !batch.is_empty() {
            let launch = campaigns::launch_campaign(&self.db, campaign.id, batch, now).await?;
            if launch.activated {
                info!(campaign_id = campaign.id, title = %campaign.title, "campaign activated");
                report.campaigns_activated += 1;
            }
            report.campaign_messages += launch.inserted;
        }

        if skipped == 0 && campaigns::complete_if_drained(&self.db, campaign.id, now).await? {
            info!(campaign_id = campaign.id, "campaign completed");
            report.campaigns_completed += 1;
        }
        Ok(())
    }

    async fn materialize_sequences(
        &self,
        now: DateTime<Utc>,
        cache: &mut DeviceCache<'_>,
        report: &mut MaterializeReport,
    ) -> Result<(), DriplineError> {
        let due = progress::due_without_message(&self.db, now, self.config.sequence_batch_size).await?;
        let mut definitions: HashMap<String, Option<SequenceDefinition>> = HashMap::new();

        for row in due {
            let Some(device_id) = row.assigned_device_id.clone().filter(|d| !d.is_empty()) else {
                warn!(progress_id = row.id, phone = %row.contact_phone, "step has no assigned device, skipping");
                report.skipped_unroutable += 1;
                continue;
            };
            if !cache.is_online(&device_id).await? {
                warn!(progress_id = row.id, device_id = %device_id, "device offline, step stays due");
                report.skipped_offline += 1;
                continue;
            }
            let Some(step) = sequences::get_step(&self.db, &row.sequence_step_id).await? else {
                warn!(progress_id = row.id, step_id = %row.sequence_step_id, "step definition missing, skipping");
                report.skipped_unroutable += 1;
                continue;
            };
            if !definitions.contains_key(&row.sequence_id) {
                let definition = sequences::get_sequence(&self.db, &row.sequence_id).await?;
                definitions.insert(row.sequence_id.clone(), definition);
            }
            let sequence = definitions.get(&row.sequence_id).and_then(Option::as_ref);

            let message = self.step_message(&row, &step, sequence, device_id, now);
            if messages::insert_step_message(&self.db, row.id, &message).await? {
                debug!(progress_id = row.id, message_id = %message.id, "sequence message created");
                report.sequence_messages += 1;
            }
        }
        Ok(())
    }

    fn step_message(
        &self,
        row: &ContactProgress,
        step: &SequenceStep,
        sequence: Option<&SequenceDefinition>,
        device_id: String,
        now: DateTime<Utc>,
    ) -> Message {
        let (min_delay, max_delay) = match (step.min_delay_secs, step.max_delay_secs, sequence) {
            (Some(min), Some(max), _) => (min, max),
            (min, max, Some(seq)) => self.delay_bounds(
                min.unwrap_or(seq.min_delay_secs),
                max.unwrap_or(seq.max_delay_secs),
            ),
            (min, max, None) => (
                min.unwrap_or(self.dispatch.default_min_delay_secs),
                max.unwrap_or(self.dispatch.default_max_delay_secs),
            ),
        };
        let content = self.renderer.render(
            &step.content,
            &Recipient {
                name: &row.contact_name,
                phone: &row.contact_phone,
            },
            now,
            &mut rand::thread_rng(),
        );
        Message::pending(
            uuid::Uuid::new_v4().to_string(),
            row.user_id.clone(),
            device_id,
            MessageSource::Sequence {
                sequence_id: row.sequence_id.clone(),
                sequence_step_id: row.sequence_step_id.clone(),
            },
            row.contact_phone.clone(),
            row.contact_name.clone(),
            content,
            now,
        )
        .with_media_url(step.media_url.clone())
        .with_delay_bounds(min_delay, max_delay)
        .with_group(
            format!("sequence-{}-{}", row.sequence_id, row.contact_phone),
            i64::from(row.current_step),
        )
    }

    /// Configured bounds fill in when a definition leaves both at zero.
    fn delay_bounds(&self, min_secs: u32, max_secs: u32) -> (u32, u32) {
        if min_secs == 0 && max_secs == 0 {
            (
                self.dispatch.default_min_delay_secs,
                self.dispatch.default_max_delay_secs,
            )
        } else {
            (min_secs, max_secs.max(min_secs))
        }
    }

    fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.config.campaign_utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}
