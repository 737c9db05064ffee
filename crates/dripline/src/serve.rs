// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `dripline serve` command implementation.
//!
//! Opens the database, then runs the enrollment, materializer and sweeper
//! loops next to the per-device dispatcher until SIGINT or SIGTERM.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dripline_config::model::DriplineConfig;
use dripline_core::{DeviceStatus, DriplineError, Sender};
use dripline_engine::{
    Dispatcher, Enroller, Materializer, StepAdvancer, Sweeper, install_signal_handler,
};
use dripline_storage::{Database, SqliteDeviceStatus};
use dripline_whatsapp::HttpSender;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs the `dripline serve` command.
pub async fn run_serve(config: DriplineConfig) -> Result<(), DriplineError> {
    init_tracing(&config.service.log_level);
    info!(name = %config.service.name, "starting dripline serve");

    let sender = HttpSender::from_config(&config.sender).map_err(|e| {
        error!(error = %e, "failed to initialize WhatsApp sender");
        e
    })?;
    info!(endpoint = sender.endpoint(), "sender ready");

    let db = Database::open_with(&config.storage).await.map_err(|e| {
        error!(error = %e, path = %config.storage.database_path, "failed to open database");
        e
    })?;
    info!(path = db.path(), "database opened");

    let cancel = install_signal_handler();
    let devices: Arc<dyn DeviceStatus> = Arc::new(SqliteDeviceStatus::new(db.clone()));
    let advancer = Arc::new(StepAdvancer::new(db.clone(), &config.enrollment));

    let enroller = Arc::new(Enroller::new(db.clone(), config.enrollment.clone()));
    let materializer = Arc::new(Materializer::new(
        db.clone(),
        devices.clone(),
        advancer.clone(),
        &config,
    ));
    let sweeper = Arc::new(Sweeper::new(
        db.clone(),
        advancer.clone(),
        config.dispatch.clone(),
    ));

    let loops = vec![
        tokio::spawn(every(
            "enrollment",
            Duration::from_secs(config.enrollment.interval_secs),
            cancel.clone(),
            move || {
                let enroller = enroller.clone();
                async move { enroller.enroll_due_contacts().await }
            },
        )),
        tokio::spawn(every(
            "materializer",
            Duration::from_secs(config.materializer.interval_secs),
            cancel.clone(),
            move || {
                let materializer = materializer.clone();
                async move { materializer.materialize_ready_work().await }
            },
        )),
        tokio::spawn(every(
            "sweeper",
            Duration::from_secs(config.sweeper.interval_secs),
            cancel.clone(),
            move || {
                let sweeper = sweeper.clone();
                async move { sweeper.sweep().await }
            },
        )),
    ];

    let sender: Arc<dyn Sender> = Arc::new(sender);
    let dispatcher = Dispatcher::new(db.clone(), sender, devices, advancer, config.dispatch.clone());
    dispatcher.run(cancel.clone()).await;

    for handle in loops {
        if let Err(e) = handle.await {
            warn!(error = %e, "background loop ended abnormally");
        }
    }
    db.close().await?;

    info!("dripline serve shutdown complete");
    Ok(())
}

/// Run `tick` every `period` until `cancel` fires. Failures are logged and
/// retried on the next tick.
async fn every<F, Fut, R>(name: &'static str, period: Duration, cancel: CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, DriplineError>>,
    R: Debug,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match tick().await {
                    Ok(report) => debug!(task = name, ?report, "tick finished"),
                    Err(e) => warn!(task = name, error = %e, "tick failed (non-fatal)"),
                }
            }
            _ = cancel.cancelled() => {
                info!(task = name, "loop shutting down");
                break;
            }
        }
    }
}

/// Initialize the tracing subscriber. `RUST_LOG` wins over the configured level.
pub(crate) fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dripline={log_level},warn")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn every_keeps_running_after_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();
        let handle = tokio::spawn(every(
            "test",
            Duration::from_millis(10),
            cancel.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n % 2 == 0 {
                        Err(DriplineError::Internal("flaky".into()))
                    } else {
                        Ok(n)
                    }
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn serve_requires_a_sender_endpoint() {
        let err = run_serve(DriplineConfig::default()).await.unwrap_err();
        assert!(matches!(err, DriplineError::Config(_)));
    }
}
