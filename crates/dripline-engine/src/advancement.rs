// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Step-advancement engine.
//!
//! Moves a contact from one sequence step to the next once the current
//! step's message is resolved. Every transition is a single immediate
//! transaction in the store, so calling any of these twice for the same
//! row is a no-op the second time.

use chrono::{DateTime, Utc};
use dripline_config::model::EnrollmentConfig;
use dripline_core::{AdvanceOutcome, DriplineError, Message};
use dripline_storage::Database;
use dripline_storage::queries::progress::{self, CompletionPolicy, StepResolution};
use tracing::{debug, info, warn};

/// Resolves active sequence steps and activates the next due one.
#[derive(Debug, Clone)]
pub struct StepAdvancer {
    db: Database,
    policy: CompletionPolicy,
}

impl StepAdvancer {
    pub fn new(db: Database, config: &EnrollmentConfig) -> Self {
        Self {
            db,
            policy: CompletionPolicy {
                remove_trigger_on_complete: config.remove_trigger_on_complete,
            },
        }
    }

    /// Mark the step completed and move the contact forward.
    pub async fn advance_on_completion(
        &self,
        progress_id: i64,
    ) -> Result<AdvanceOutcome, DriplineError> {
        self.advance_on_completion_at(progress_id, Utc::now()).await
    }

    pub async fn advance_on_completion_at(
        &self,
        progress_id: i64,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, DriplineError> {
        self.resolve(progress_id, StepResolution::Completed, now, None)
            .await
    }

    /// Mark the step failed and move the contact forward.
    pub async fn fail_step(
        &self,
        progress_id: i64,
        reason: &str,
    ) -> Result<AdvanceOutcome, DriplineError> {
        self.resolve(progress_id, StepResolution::Failed, Utc::now(), Some(reason))
            .await
    }

    /// Advance the progress row a delivered sequence message belongs to.
    ///
    /// Campaign messages and messages whose row is gone resolve to
    /// [`AdvanceOutcome::AlreadyResolved`].
    pub async fn complete_for_message(
        &self,
        message: &Message,
    ) -> Result<AdvanceOutcome, DriplineError> {
        match self.progress_id_for(message).await? {
            Some(id) => self.advance_on_completion(id).await,
            None => Ok(AdvanceOutcome::AlreadyResolved),
        }
    }

    /// Fail the progress row of a permanently undeliverable sequence message.
    pub async fn fail_for_message(
        &self,
        message: &Message,
        reason: &str,
    ) -> Result<AdvanceOutcome, DriplineError> {
        match self.progress_id_for(message).await? {
            Some(id) => self.fail_step(id, reason).await,
            None => Ok(AdvanceOutcome::AlreadyResolved),
        }
    }

    /// Activate the earliest due pending row of every contact without an
    /// active row. Returns the number of rows activated.
    pub async fn activate_due_heads(&self, now: DateTime<Utc>) -> Result<usize, DriplineError> {
        let activated = progress::activate_due_heads(&self.db, now).await?;
        if activated > 0 {
            info!(activated, "activated due sequence steps");
        }
        Ok(activated)
    }

    async fn progress_id_for(&self, message: &Message) -> Result<Option<i64>, DriplineError> {
        let Some((sequence_id, step_id)) = message.sequence_step() else {
            return Ok(None);
        };
        let row =
            progress::find_for_step(&self.db, sequence_id, &message.recipient_phone, step_id)
                .await?;
        if row.is_none() {
            warn!(
                message_id = %message.id,
                sequence_id,
                step_id,
                "no progress row for sequence message"
            );
        }
        Ok(row.map(|row| row.id))
    }

    async fn resolve(
        &self,
        progress_id: i64,
        resolution: StepResolution,
        now: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<AdvanceOutcome, DriplineError> {
        let outcome =
            progress::resolve_active_step(&self.db, progress_id, resolution, now, self.policy)
                .await?;

        match &outcome {
            AdvanceOutcome::AlreadyResolved => {
                debug!(progress_id, "step already resolved");
            }
            AdvanceOutcome::Activated {
                progress_id: next,
                current_step,
            } => {
                info!(
                    progress_id,
                    next_progress_id = next,
                    current_step,
                    resolution = ?resolution,
                    reason,
                    "advanced to next step"
                );
            }
            AdvanceOutcome::Waiting { next_due } => {
                info!(
                    progress_id,
                    next_due = ?next_due,
                    resolution = ?resolution,
                    reason,
                    "step resolved, next step not due yet"
                );
            }
            AdvanceOutcome::SequenceCompleted {
                sequence_id,
                contact_phone,
                next_trigger,
            } => {
                info!(
                    progress_id,
                    sequence_id = %sequence_id,
                    contact_phone = %contact_phone,
                    next_trigger = ?next_trigger,
                    "sequence completed"
                );
            }
        }
        Ok(outcome)
    }
}
