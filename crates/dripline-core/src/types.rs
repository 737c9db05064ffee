// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared by the storage layer, the engines, and the adapters.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::DriplineError;

/// Fixed-width timestamp layout used for every stored timestamp.
///
/// Millisecond precision with a literal `Z` keeps lexicographic order equal
/// to chronological order, which the claim window predicates rely on.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Format a UTC timestamp for storage.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp back into UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// Lifecycle of one outbound message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl MessageStatus {
    /// Sent and failed messages are never touched by the scheduler again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

/// Lifecycle of one (sequence, contact, step) enrollment row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl ProgressStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Lifecycle of a broadcast campaign.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Active,
    Completed,
}

/// A set of trigger tags stored as a comma-separated column.
///
/// Tags are trimmed and empty entries dropped, so `"a, ,b,"` and `"a,b"`
/// describe the same set. Iteration order is sorted for stable output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerSet(BTreeSet<String>);

impl TriggerSet {
    /// Parse a comma-separated tag column.
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag.trim())
    }

    /// Adds a tag. Returns `true` if the set changed.
    pub fn insert(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        !tag.is_empty() && self.0.insert(tag.to_string())
    }

    /// Removes a tag. Returns `true` if the set changed.
    pub fn remove(&mut self, tag: &str) -> bool {
        self.0.remove(tag.trim())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for TriggerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.0.iter().cloned().collect::<Vec<_>>().join(",");
        f.write_str(&joined)
    }
}

/// A phone-number-identified recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lead {
    pub phone: String,
    pub user_id: String,
    pub name: String,
    /// Device the lead is assigned to. `None` means nothing can dispatch to it.
    pub device_id: Option<String>,
    pub niche: String,
    pub triggers: TriggerSet,
    pub target_status: String,
}

/// A WhatsApp device connection owned by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub user_id: String,
    pub device_name: String,
    pub phone: Option<String>,
    pub status: String,
}

impl Device {
    /// Status values the connection layer writes for a usable device.
    pub fn is_online(&self) -> bool {
        matches!(self.status.as_str(), "online" | "connected")
    }
}

/// A drip sequence template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceDefinition {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub entry_trigger: String,
    pub is_active: bool,
    pub min_delay_secs: u32,
    pub max_delay_secs: u32,
}

/// One step of a drip sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceStep {
    pub id: String,
    pub sequence_id: String,
    /// Ordering key within the sequence.
    pub day_number: u32,
    pub trigger: String,
    /// Trigger handed to the lead when this (final) step completes.
    pub next_trigger: Option<String>,
    /// Spacing from the previous step, in hours. Zero means "use the default".
    pub trigger_delay_hours: u32,
    pub min_delay_secs: Option<u32>,
    pub max_delay_secs: Option<u32>,
    pub content: String,
    pub media_url: Option<String>,
    pub is_entry_point: bool,
}

/// Per-(sequence, contact, step) progress row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactProgress {
    pub id: i64,
    pub sequence_id: String,
    pub contact_phone: String,
    pub contact_name: String,
    pub user_id: String,
    pub sequence_step_id: String,
    pub current_step: u32,
    /// Trigger tag that caused the enrollment.
    pub enrolled_trigger: String,
    pub status: ProgressStatus,
    pub next_trigger_time: DateTime<Utc>,
    pub assigned_device_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A one-shot or scheduled broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignDefinition {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    /// Substring matched against the lead niche. Empty matches everyone.
    pub niche: String,
    /// `all` or a specific lead status.
    pub target_status: String,
    pub message: String,
    pub media_url: Option<String>,
    pub campaign_date: Option<String>,
    pub time_schedule: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub min_delay_secs: u32,
    pub max_delay_secs: u32,
    pub status: CampaignStatus,
}

impl CampaignDefinition {
    /// Resolve the moment this campaign becomes due.
    ///
    /// An absolute `scheduled_at` wins. Otherwise `campaign_date` plus
    /// `time_schedule` (default midnight) is read as wall-clock time at
    /// `offset`. With neither set the campaign is due immediately (`None`).
    pub fn resolve_schedule(
        &self,
        offset: FixedOffset,
    ) -> Result<Option<DateTime<Utc>>, DriplineError> {
        if let Some(at) = self.scheduled_at {
            return Ok(Some(at));
        }
        let Some(date) = self.campaign_date.as_deref().filter(|d| !d.trim().is_empty()) else {
            return Ok(None);
        };
        let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|e| {
            DriplineError::Validation(format!(
                "campaign {} has invalid campaign_date `{date}`: {e}",
                self.id
            ))
        })?;
        let time = match self.time_schedule.as_deref().map(str::trim) {
            None | Some("") => NaiveTime::MIN,
            Some(raw) => NaiveTime::parse_from_str(raw, "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
                .map_err(|e| {
                    DriplineError::Validation(format!(
                        "campaign {} has invalid time_schedule `{raw}`: {e}",
                        self.id
                    ))
                })?,
        };
        let local = offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .ok_or_else(|| {
                DriplineError::Validation(format!("campaign {} schedule is ambiguous", self.id))
            })?;
        Ok(Some(local.with_timezone(&Utc)))
    }

    /// Whether a pending campaign should be expanded at `now`.
    pub fn is_due(&self, now: DateTime<Utc>, offset: FixedOffset) -> Result<bool, DriplineError> {
        Ok(self
            .resolve_schedule(offset)?
            .is_none_or(|due_at| due_at <= now))
    }
}

/// Where a message came from. Exactly one source is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSource {
    Campaign {
        campaign_id: i64,
    },
    Sequence {
        sequence_id: String,
        sequence_step_id: String,
    },
}

/// One outbound unit of work targeting one recipient via one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// UUID assigned by whoever creates the row.
    pub id: String,
    pub user_id: String,
    pub device_id: String,
    pub source: MessageSource,
    pub recipient_phone: String,
    pub recipient_name: String,
    pub content: String,
    pub media_url: Option<String>,
    pub status: MessageStatus,
    pub scheduled_at: DateTime<Utc>,
    pub processing_worker_id: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub min_delay_secs: u32,
    pub max_delay_secs: u32,
    /// Messages sharing a group are claimed adjacently, ordered by `group_order`.
    pub group_id: Option<String>,
    pub group_order: i64,
}

impl Message {
    /// Build a fresh pending message. The caller supplies the id.
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        id: String,
        user_id: String,
        device_id: String,
        source: MessageSource,
        recipient_phone: String,
        recipient_name: String,
        content: String,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            device_id,
            source,
            recipient_phone,
            recipient_name,
            content,
            media_url: None,
            status: MessageStatus::Pending,
            scheduled_at,
            processing_worker_id: None,
            processing_started_at: None,
            sent_at: None,
            error_message: None,
            min_delay_secs: 0,
            max_delay_secs: 0,
            group_id: None,
            group_order: 0,
        }
    }

    pub fn with_media_url(mut self, media_url: Option<String>) -> Self {
        self.media_url = media_url;
        self
    }

    pub fn with_delay_bounds(mut self, min_secs: u32, max_secs: u32) -> Self {
        self.min_delay_secs = min_secs;
        self.max_delay_secs = max_secs.max(min_secs);
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>, order: i64) -> Self {
        self.group_id = Some(group_id.into());
        self.group_order = order;
        self
    }

    pub fn campaign_id(&self) -> Option<i64> {
        match &self.source {
            MessageSource::Campaign { campaign_id } => Some(*campaign_id),
            MessageSource::Sequence { .. } => None,
        }
    }

    pub fn sequence_step(&self) -> Option<(&str, &str)> {
        match &self.source {
            MessageSource::Sequence {
                sequence_id,
                sequence_step_id,
            } => Some((sequence_id, sequence_step_id)),
            MessageSource::Campaign { .. } => None,
        }
    }
}

/// Result of resolving a contact's active sequence step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The row was not active any more; nothing changed.
    AlreadyResolved,
    /// The next due step was activated.
    Activated { progress_id: i64, current_step: u32 },
    /// Later steps exist but none is due yet.
    Waiting { next_due: Option<DateTime<Utc>> },
    /// No steps remain; the lead's triggers were updated.
    SequenceCompleted {
        sequence_id: String,
        contact_phone: String,
        next_trigger: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn campaign() -> CampaignDefinition {
        CampaignDefinition {
            id: 7,
            user_id: "user-1".into(),
            title: "promo".into(),
            niche: "".into(),
            target_status: "all".into(),
            message: "hi".into(),
            media_url: None,
            campaign_date: None,
            time_schedule: None,
            scheduled_at: None,
            min_delay_secs: 10,
            max_delay_secs: 30,
            status: CampaignStatus::Pending,
        }
    }

    #[test]
    fn timestamp_format_sorts_chronologically() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(format_timestamp(early) < format_timestamp(late));
        assert_eq!(format_timestamp(early), "2026-01-01T09:00:00.000Z");
        assert_eq!(parse_timestamp(&format_timestamp(late)).unwrap(), late);
    }

    #[test]
    fn status_strings_are_snake_case() {
        assert_eq!(MessageStatus::Processing.as_ref(), "processing");
        assert_eq!(ProgressStatus::from_str("active").unwrap(), ProgressStatus::Active);
        assert_eq!(CampaignStatus::Completed.to_string(), "completed");
        assert!(MessageStatus::Sent.is_terminal());
        assert!(!ProgressStatus::Pending.is_terminal());
    }

    #[test]
    fn trigger_set_normalizes_tags() {
        let mut set = TriggerSet::parse(" WARMSTART, ,COLD,WARMSTART,");
        assert!(set.contains("WARMSTART"));
        assert!(set.contains("COLD"));
        assert_eq!(set.to_string(), "COLD,WARMSTART");

        assert!(set.remove("COLD"));
        assert!(!set.remove("COLD"));
        assert!(set.insert("HOT"));
        assert!(!set.insert("  "));
        assert_eq!(set.to_string(), "HOT,WARMSTART");
    }

    #[test]
    fn campaign_without_schedule_is_due_now() {
        let now = Utc::now();
        let offset = FixedOffset::east_opt(0).unwrap();
        assert!(campaign().is_due(now, offset).unwrap());
    }

    #[test]
    fn campaign_date_and_time_use_offset() {
        let mut c = campaign();
        c.campaign_date = Some("2026-03-01".into());
        c.time_schedule = Some("09:30".into());
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let due = c.resolve_schedule(offset).unwrap().unwrap();
        assert_eq!(due, Utc.with_ymd_and_hms(2026, 3, 1, 1, 30, 0).unwrap());
        assert!(!c.is_due(due - chrono::Duration::seconds(1), offset).unwrap());
        assert!(c.is_due(due, offset).unwrap());
    }

    #[test]
    fn absolute_schedule_wins_over_date() {
        let mut c = campaign();
        let at = Utc.with_ymd_and_hms(2026, 5, 5, 5, 5, 5).unwrap();
        c.scheduled_at = Some(at);
        c.campaign_date = Some("2020-01-01".into());
        let offset = FixedOffset::east_opt(0).unwrap();
        assert_eq!(c.resolve_schedule(offset).unwrap(), Some(at));
    }

    #[test]
    fn invalid_campaign_time_is_rejected() {
        let mut c = campaign();
        c.campaign_date = Some("2026-03-01".into());
        c.time_schedule = Some("25:99".into());
        let offset = FixedOffset::east_opt(0).unwrap();
        assert!(matches!(
            c.resolve_schedule(offset),
            Err(DriplineError::Validation(_))
        ));
    }

    #[test]
    fn message_source_accessors() {
        let now = Utc::now();
        let msg = Message::pending(
            "m1".into(),
            "user-1".into(),
            "dev-1".into(),
            MessageSource::Sequence {
                sequence_id: "seq-1".into(),
                sequence_step_id: "step-1".into(),
            },
            "60123".into(),
            "Aina".into(),
            "hello".into(),
            now,
        )
        .with_delay_bounds(30, 10);
        assert_eq!(msg.campaign_id(), None);
        assert_eq!(msg.sequence_step(), Some(("seq-1", "step-1")));
        assert_eq!(msg.max_delay_secs, 30, "max is clamped to min");
        assert_eq!(msg.status, MessageStatus::Pending);
    }
}
