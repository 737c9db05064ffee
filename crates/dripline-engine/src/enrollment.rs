// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Enrollment engine: turns lead trigger tags into contact progress rows.
//!
//! For every active sequence, leads carrying an entry step's trigger get one
//! progress row per step from that entry step onward. Rows are
//! insert-if-absent, so a pass over already-enrolled leads creates nothing.

use chrono::{DateTime, Duration, Utc};
use dripline_config::model::EnrollmentConfig;
use dripline_core::{DriplineError, Lead, SequenceDefinition, SequenceStep};
use dripline_storage::Database;
use dripline_storage::queries::progress::{self, EnrollResult, NewProgress};
use dripline_storage::queries::{leads, sequences};
use tracing::{debug, info, warn};

/// Counters of one enrollment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrollmentReport {
    /// Leads whose trigger set matched an entry step.
    pub leads_matched: usize,
    /// Leads that got at least one new progress row.
    pub contacts_enrolled: usize,
    pub rows_created: usize,
    pub skipped_no_device: usize,
    /// Leads still in another sequence.
    pub skipped_busy: usize,
}

/// Enrolls tagged leads into the sequences their tags trigger.
#[derive(Debug, Clone)]
pub struct Enroller {
    db: Database,
    config: EnrollmentConfig,
}

impl Enroller {
    pub fn new(db: Database, config: EnrollmentConfig) -> Self {
        Self { db, config }
    }

    pub async fn enroll_due_contacts(&self) -> Result<EnrollmentReport, DriplineError> {
        self.enroll_due_contacts_at(Utc::now()).await
    }

    pub async fn enroll_due_contacts_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentReport, DriplineError> {
        let mut report = EnrollmentReport::default();

        for sequence in sequences::active_sequences(&self.db).await? {
            let steps = sequences::steps_for_sequence(&self.db, &sequence.id).await?;
            for (entry, trigger) in entry_points(&sequence, &steps) {
                let matched = leads::leads_with_trigger(&self.db, &sequence.user_id, trigger).await?;
                for lead in matched {
                    report.leads_matched += 1;
                    self.enroll_lead(&sequence, &steps, entry, trigger, &lead, now, &mut report)
                        .await?;
                }
            }
        }

        if report.rows_created > 0 {
            info!(
                contacts = report.contacts_enrolled,
                rows = report.rows_created,
                "enrolled contacts into sequences"
            );
        } else {
            debug!(matched = report.leads_matched, "enrollment pass found nothing new");
        }
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn enroll_lead(
        &self,
        sequence: &SequenceDefinition,
        steps: &[SequenceStep],
        entry: &SequenceStep,
        trigger: &str,
        lead: &Lead,
        now: DateTime<Utc>,
        report: &mut EnrollmentReport,
    ) -> Result<(), DriplineError> {
        let Some(device_id) = lead.device_id.as_deref().filter(|d| !d.is_empty()) else {
            warn!(
                sequence_id = %sequence.id,
                phone = %lead.phone,
                "lead has no assigned device, skipping enrollment"
            );
            report.skipped_no_device += 1;
            return Ok(());
        };

        let rows = plan_enrollment(
            lead,
            device_id,
            trigger,
            steps,
            entry,
            now,
            self.config.default_step_delay_hours,
        );
        match progress::enroll_contact(&self.db, rows, self.config.single_active_sequence).await? {
            EnrollResult::Created(0) => {}
            EnrollResult::Created(created) => {
                debug!(
                    sequence_id = %sequence.id,
                    phone = %lead.phone,
                    rows = created,
                    "contact enrolled"
                );
                report.contacts_enrolled += 1;
                report.rows_created += created;
            }
            EnrollResult::Busy => {
                debug!(
                    sequence_id = %sequence.id,
                    phone = %lead.phone,
                    "contact is still in another sequence"
                );
                report.skipped_busy += 1;
            }
        }
        Ok(())
    }
}

/// Entry steps of a sequence paired with the trigger that starts them.
///
/// Steps flagged `is_entry_point` use their own trigger. A sequence with no
/// flagged step starts at its first step on the sequence's `entry_trigger`.
fn entry_points<'a>(
    sequence: &'a SequenceDefinition,
    steps: &'a [SequenceStep],
) -> Vec<(&'a SequenceStep, &'a str)> {
    let flagged: Vec<_> = steps
        .iter()
        .filter(|s| s.is_entry_point && !s.trigger.trim().is_empty())
        .map(|s| (s, s.trigger.trim()))
        .collect();
    if !flagged.is_empty() {
        return flagged;
    }
    match steps.first() {
        Some(first) if !sequence.entry_trigger.trim().is_empty() => {
            vec![(first, sequence.entry_trigger.trim())]
        }
        _ => Vec::new(),
    }
}

/// Progress rows for one lead entering at `entry`.
///
/// The entry row is due at `now`; each later row is due its step's
/// `trigger_delay_hours` after the previous one.
pub fn plan_enrollment(
    lead: &Lead,
    device_id: &str,
    trigger: &str,
    steps: &[SequenceStep],
    entry: &SequenceStep,
    now: DateTime<Utc>,
    default_delay_hours: u32,
) -> Vec<NewProgress> {
    let mut due = now;
    steps
        .iter()
        .filter(|s| (s.day_number, s.id.as_str()) >= (entry.day_number, entry.id.as_str()))
        .enumerate()
        .map(|(idx, step)| {
            if idx > 0 {
                let hours = match step.trigger_delay_hours {
                    0 => default_delay_hours,
                    h => h,
                };
                due = due + Duration::hours(i64::from(hours));
            }
            NewProgress {
                sequence_id: step.sequence_id.clone(),
                contact_phone: lead.phone.clone(),
                contact_name: lead.name.clone(),
                user_id: lead.user_id.clone(),
                sequence_step_id: step.id.clone(),
                current_step: idx as u32 + 1,
                enrolled_trigger: trigger.to_string(),
                next_trigger_time: due,
                assigned_device_id: Some(device_id.to_string()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dripline_core::TriggerSet;

    fn step(id: &str, day: u32, delay: u32) -> SequenceStep {
        SequenceStep {
            id: id.to_string(),
            sequence_id: "seq-1".to_string(),
            day_number: day,
            trigger: "WARMSTART".to_string(),
            next_trigger: None,
            trigger_delay_hours: delay,
            min_delay_secs: None,
            max_delay_secs: None,
            content: String::new(),
            media_url: None,
            is_entry_point: day == 1,
        }
    }

    fn lead() -> Lead {
        Lead {
            phone: "601".to_string(),
            user_id: "user-1".to_string(),
            name: "Alice".to_string(),
            device_id: Some("dev-1".to_string()),
            niche: String::new(),
            triggers: TriggerSet::parse("WARMSTART"),
            target_status: "prospect".to_string(),
        }
    }

    #[test]
    fn plan_spaces_steps_by_delay() {
        let steps = vec![step("s1", 1, 0), step("s2", 2, 0), step("s3", 3, 48)];
        let now = Utc::now();
        let rows = plan_enrollment(&lead(), "dev-1", "WARMSTART", &steps, &steps[0], now, 24);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].next_trigger_time, now);
        assert_eq!(rows[1].next_trigger_time, now + Duration::hours(24));
        assert_eq!(rows[2].next_trigger_time, now + Duration::hours(72));
        let numbers: Vec<u32> = rows.iter().map(|r| r.current_step).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn plan_starts_at_a_later_entry_step() {
        let steps = vec![step("s1", 1, 0), step("s2", 2, 0), step("s3", 3, 0)];
        let rows = plan_enrollment(&lead(), "dev-1", "LATE", &steps, &steps[1], Utc::now(), 24);
        let ids: Vec<&str> = rows.iter().map(|r| r.sequence_step_id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s3"]);
        assert_eq!(rows[0].current_step, 1);
        assert!(rows.iter().all(|r| r.enrolled_trigger == "LATE"));
    }

    #[test]
    fn unflagged_sequence_enters_at_first_step() {
        let sequence = SequenceDefinition {
            id: "seq-1".to_string(),
            user_id: "user-1".to_string(),
            name: "Warm".to_string(),
            entry_trigger: "WARMSTART".to_string(),
            is_active: true,
            min_delay_secs: 10,
            max_delay_secs: 30,
        };
        let mut steps = vec![step("s1", 1, 0), step("s2", 2, 0)];
        steps[0].is_entry_point = false;

        let entries = entry_points(&sequence, &steps);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.id, "s1");
        assert_eq!(entries[0].1, "WARMSTART");

        assert!(entry_points(&sequence, &[]).is_empty());
    }
}
