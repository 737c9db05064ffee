// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic repair of rows no worker will finish on its own.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dripline_config::model::DispatchConfig;
use dripline_core::{AdvanceOutcome, DriplineError};
use dripline_storage::Database;
use dripline_storage::queries::{messages, progress};
use tracing::{debug, info, warn};

use crate::advancement::StepAdvancer;

/// Counters of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// `processing` rows past the processing timeout, returned to `pending`.
    pub reset_stuck: usize,
    /// `pending` rows older than the claim grace window, marked failed.
    pub expired: usize,
    /// Active steps whose message was already sent, advanced.
    pub reconciled: usize,
}

pub struct Sweeper {
    db: Database,
    advancer: Arc<StepAdvancer>,
    config: DispatchConfig,
}

impl Sweeper {
    pub fn new(db: Database, advancer: Arc<StepAdvancer>, config: DispatchConfig) -> Self {
        Self {
            db,
            advancer,
            config,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, DriplineError> {
        self.sweep_at(Utc::now()).await
    }

    /// Stuck rows are reset before expiry runs, so a reset row is never
    /// expired in the same sweep.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, DriplineError> {
        let mut report = SweepReport::default();

        let stuck_before = before(now, self.config.processing_timeout_secs);
        report.reset_stuck = messages::reset_stuck(&self.db, stuck_before, now).await?;
        if report.reset_stuck > 0 {
            warn!(reset = report.reset_stuck, "reset stuck processing messages");
        }

        let expire_before = before(now, self.config.claim_grace_secs);
        report.expired = messages::expire_overdue(&self.db, expire_before, now).await?;
        if report.expired > 0 {
            warn!(expired = report.expired, "expired messages that missed their send window");
        }

        for progress_id in progress::active_with_sent_message(&self.db).await? {
            match self.advancer.advance_on_completion_at(progress_id, now).await {
                Ok(AdvanceOutcome::AlreadyResolved) => {}
                Ok(_) => report.reconciled += 1,
                Err(e) => warn!(progress_id, error = %e, "reconcile failed (non-fatal)"),
            }
        }
        if report.reconciled > 0 {
            info!(reconciled = report.reconciled, "advanced steps left behind after send");
        }

        debug!(?report, "sweep finished");
        Ok(report)
    }
}

fn before(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    chrono::Duration::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX))
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
