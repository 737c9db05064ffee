// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot `dripline tick` and `dripline sweep` commands.
//!
//! Both run a single pass of the corresponding `serve` loop and print its
//! report, for cron-driven deployments and manual repair.

use std::sync::Arc;

use dripline_config::model::DriplineConfig;
use dripline_core::{DeviceStatus, DriplineError};
use dripline_engine::{Enroller, Materializer, StepAdvancer, Sweeper};
use dripline_storage::{Database, SqliteDeviceStatus};
use tracing::info;

use crate::serve::init_tracing;

/// One enrollment pass followed by one materialization pass.
pub async fn run_tick(config: &DriplineConfig) -> Result<(), DriplineError> {
    init_tracing(&config.service.log_level);
    let db = Database::open_with(&config.storage).await?;

    let devices: Arc<dyn DeviceStatus> = Arc::new(SqliteDeviceStatus::new(db.clone()));
    let advancer = Arc::new(StepAdvancer::new(db.clone(), &config.enrollment));

    let enrolled = Enroller::new(db.clone(), config.enrollment.clone())
        .enroll_due_contacts()
        .await?;
    let materialized = Materializer::new(db.clone(), devices, advancer, config)
        .materialize_ready_work()
        .await?;
    info!(?enrolled, ?materialized, "tick finished");
    db.close().await?;

    println!(
        "enrolled {} contacts ({} rows), queued {} campaign and {} sequence messages",
        enrolled.contacts_enrolled,
        enrolled.rows_created,
        materialized.campaign_messages,
        materialized.sequence_messages,
    );
    Ok(())
}

/// One sweep of stuck, expired and unreconciled rows.
pub async fn run_sweep(config: &DriplineConfig) -> Result<(), DriplineError> {
    init_tracing(&config.service.log_level);
    let db = Database::open_with(&config.storage).await?;

    let advancer = Arc::new(StepAdvancer::new(db.clone(), &config.enrollment));
    let report = Sweeper::new(db.clone(), advancer, config.dispatch.clone())
        .sweep()
        .await?;
    db.close().await?;

    println!(
        "reset {} stuck, expired {} overdue, reconciled {} steps",
        report.reset_stuck, report.expired, report.reconciled,
    );
    Ok(())
}
