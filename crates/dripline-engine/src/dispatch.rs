// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Claim-and-dispatch scheduler.
//!
//! [`DeviceWorker`] polls the message table for one device. It claims a
//! batch in one immediate transaction and sends the batch sequentially,
//! recording each outcome under its worker id. Every send waits for the
//! message's `scheduled_at` and for a random pause after the device's
//! previous send, across batch boundaries too.
//!
//! [`Dispatcher`] keeps exactly one worker running per online device.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use dripline_config::model::DispatchConfig;
use dripline_core::{DeviceStatus, DriplineError, Message, SendError, Sender};
use dripline_storage::Database;
use dripline_storage::queries::messages::{self, ClaimRequest};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::advancement::StepAdvancer;

/// Counters of one dispatch tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    /// Returned to `pending` after a transient failure or on cancellation.
    pub released: usize,
    /// The hourly cap was reached; nothing was claimed.
    pub rate_limited: bool,
    /// Pending rows pushed to the end of the capped hour.
    pub deferred: usize,
}

/// Worker id: `<device>_<unix-nanos>_<8 hex chars>`.
pub fn new_worker_id(device_id: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{device_id}_{nanos}_{}", &suffix[..8])
}

/// A random pause in `[min_secs, max_secs]`.
pub fn random_delay(min_secs: u32, max_secs: u32) -> Duration {
    let secs = rand::thread_rng().gen_range(min_secs..=max_secs.max(min_secs));
    Duration::from_secs(u64::from(secs))
}

/// Sends the due messages of one device, one at a time.
pub struct DeviceWorker {
    device_id: String,
    db: Database,
    sender: Arc<dyn Sender>,
    advancer: Arc<StepAdvancer>,
    config: DispatchConfig,
    cancel: CancellationToken,
    last_sent: Mutex<Option<Instant>>,
}

impl DeviceWorker {
    pub fn new(
        device_id: impl Into<String>,
        db: Database,
        sender: Arc<dyn Sender>,
        advancer: Arc<StepAdvancer>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            db,
            sender,
            advancer,
            config,
            cancel: CancellationToken::new(),
            last_sent: Mutex::new(None),
        }
    }

    /// Stop sending when `cancel` fires; unsent claims are released.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Claim one batch and send it.
    pub async fn dispatch_once(&self) -> Result<DispatchReport, DriplineError> {
        let mut report = DispatchReport::default();
        let mut limit = self.config.batch_size;

        if self.config.messages_per_hour > 0 {
            let since = Utc::now() - chrono::Duration::hours(1);
            let sent = messages::count_sent_since(&self.db, &self.device_id, since).await?;
            if sent >= self.config.messages_per_hour {
                debug!(
                    device_id = %self.device_id,
                    sent,
                    cap = self.config.messages_per_hour,
                    "hourly cap reached"
                );
                report.rate_limited = true;
                report.deferred = self.defer_until_cap_frees(since).await?;
                return Ok(report);
            }
            limit = limit.min(self.config.messages_per_hour - sent);
        }

        let worker_id = new_worker_id(&self.device_id);
        let now = Utc::now();
        let batch = messages::claim_batch(
            &self.db,
            ClaimRequest {
                device_id: self.device_id.clone(),
                worker_id: worker_id.clone(),
                now,
                window_start: now - to_chrono(self.config.claim_grace()),
                window_end: now + to_chrono(self.config.claim_lookahead()),
                limit,
            },
        )
        .await?;

        if batch.is_empty() {
            debug!(device_id = %self.device_id, "no due messages");
            return Ok(report);
        }
        report.claimed = batch.len();
        info!(
            device_id = %self.device_id,
            worker_id = %worker_id,
            claimed = batch.len(),
            "claimed message batch"
        );

        for message in &batch {
            if !self.wait_for_turn(message).await {
                report.released += self.release_remaining(&worker_id).await;
                break;
            }
            self.deliver(&worker_id, message, &mut report).await;
        }

        info!(
            device_id = %self.device_id,
            worker_id = %worker_id,
            sent = report.sent,
            failed = report.failed,
            released = report.released,
            "batch finished"
        );
        Ok(report)
    }

    /// Poll every `poll_interval` until cancelled.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(device_id = %self.device_id, "device worker started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.dispatch_once().await {
                        warn!(device_id = %self.device_id, error = %e, "dispatch tick failed (non-fatal)");
                    }
                }
                _ = self.cancel.cancelled() => {
                    info!(device_id = %self.device_id, "device worker stopped");
                    break;
                }
            }
        }
    }

    /// Sleep until `message` may go out: not before its `scheduled_at`, and
    /// not before a random pause has passed since this device's last send.
    /// Returns `false` if cancelled first.
    async fn wait_for_turn(&self, message: &Message) -> bool {
        let until_due = (message.scheduled_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let mut ready = Instant::now() + until_due;
        if let Some(last) = *self.last_sent.lock().await {
            ready = ready.max(last + random_delay(message.min_delay_secs, message.max_delay_secs));
        }

        tokio::select! {
            _ = tokio::time::sleep_until(ready) => !self.cancel.is_cancelled(),
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Push the claimable backlog to the moment the oldest send of the last
    /// hour drops out of the cap, so the sweeper does not expire it.
    async fn defer_until_cap_frees(
        &self,
        since: chrono::DateTime<Utc>,
    ) -> Result<usize, DriplineError> {
        let Some(oldest) = messages::oldest_sent_since(&self.db, &self.device_id, since).await? else {
            return Ok(0);
        };
        let now = Utc::now();
        let until = oldest + chrono::Duration::hours(1);
        let from = now - to_chrono(self.config.claim_grace());
        let deferred = messages::defer_pending(&self.db, &self.device_id, from, until, now).await?;
        if deferred > 0 {
            info!(device_id = %self.device_id, deferred, until = %until, "hourly cap reached, deferred pending messages");
        }
        Ok(deferred)
    }

    async fn deliver(&self, worker_id: &str, message: &Message, report: &mut DispatchReport) {
        let outcome = self.sender.send(message).await;
        *self.last_sent.lock().await = Some(Instant::now());

        match outcome {
            Ok(()) => {
                match messages::mark_sent(&self.db, &message.id, worker_id, Utc::now()).await {
                    Ok(true) => {
                        report.sent += 1;
                        debug!(message_id = %message.id, phone = %message.recipient_phone, "message sent");
                        if message.sequence_step().is_some() {
                            if let Err(e) = self.advancer.complete_for_message(message).await {
                                warn!(message_id = %message.id, error = %e, "step advancement failed, sweeper will reconcile");
                            }
                        }
                    }
                    Ok(false) => {
                        warn!(message_id = %message.id, worker_id, "claim lost before sent was recorded");
                    }
                    Err(e) => {
                        warn!(message_id = %message.id, error = %e, "failed to record sent message");
                    }
                }
            }
            Err(SendError::Permanent(reason)) => {
                report.failed += 1;
                warn!(message_id = %message.id, phone = %message.recipient_phone, reason = %reason, "permanent send failure");
                match messages::mark_failed(&self.db, &message.id, worker_id, &reason, Utc::now()).await {
                    Ok(true) if message.sequence_step().is_some() => {
                        if let Err(e) = self.advancer.fail_for_message(message, &reason).await {
                            warn!(message_id = %message.id, error = %e, "failing sequence step failed");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(message_id = %message.id, error = %e, "failed to record failed message");
                    }
                }
            }
            Err(SendError::Transient(reason)) => {
                report.released += 1;
                debug!(message_id = %message.id, reason = %reason, "transient send failure, releasing");
                if let Err(e) =
                    messages::release(&self.db, &message.id, worker_id, Some(&reason), Utc::now()).await
                {
                    warn!(message_id = %message.id, error = %e, "failed to release message");
                }
            }
        }
    }

    async fn release_remaining(&self, worker_id: &str) -> usize {
        match messages::release_worker(&self.db, worker_id, Utc::now()).await {
            Ok(released) => {
                info!(device_id = %self.device_id, worker_id, released, "cancelled, released unsent claims");
                released
            }
            Err(e) => {
                warn!(device_id = %self.device_id, error = %e, "failed to release claims, sweeper will reset them");
                0
            }
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// Runs one [`DeviceWorker`] per online device.
pub struct Dispatcher {
    db: Database,
    sender: Arc<dyn Sender>,
    devices: Arc<dyn DeviceStatus>,
    advancer: Arc<StepAdvancer>,
    config: DispatchConfig,
}

struct RunningWorker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Dispatcher {
    pub fn new(
        db: Database,
        sender: Arc<dyn Sender>,
        devices: Arc<dyn DeviceStatus>,
        advancer: Arc<StepAdvancer>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            db,
            sender,
            devices,
            advancer,
            config,
        }
    }

    /// Supervise device workers until `cancel` fires, then drain them.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut workers: HashMap<String, RunningWorker> = HashMap::new();
        let mut retiring: Vec<JoinHandle<()>> = Vec::new();
        let mut refresh = tokio::time::interval(self.config.device_refresh());
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = refresh.tick() => {
                    match self.devices.online_devices().await {
                        Ok(online) => self.reconcile(&mut workers, &mut retiring, online, &cancel),
                        Err(e) => warn!(error = %e, "device refresh failed (non-fatal)"),
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        info!(workers = workers.len(), "draining device workers");
        for (_, worker) in workers.drain() {
            worker.cancel.cancel();
            retiring.push(worker.handle);
        }
        for handle in retiring {
            if let Err(e) = handle.await {
                warn!(error = %e, "device worker ended abnormally");
            }
        }
        info!("dispatcher stopped");
    }

    fn reconcile(
        &self,
        workers: &mut HashMap<String, RunningWorker>,
        retiring: &mut Vec<JoinHandle<()>>,
        online: Vec<String>,
        cancel: &CancellationToken,
    ) {
        retiring.retain(|handle| !handle.is_finished());

        let gone: Vec<String> = workers
            .iter()
            .filter(|(id, w)| !online.contains(id) || w.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for device_id in gone {
            if let Some(worker) = workers.remove(&device_id) {
                info!(device_id = %device_id, "device offline, stopping worker");
                worker.cancel.cancel();
                retiring.push(worker.handle);
            }
        }

        for device_id in online {
            if workers.contains_key(&device_id) {
                continue;
            }
            let token = cancel.child_token();
            let worker = DeviceWorker::new(
                device_id.clone(),
                self.db.clone(),
                self.sender.clone(),
                self.advancer.clone(),
                self.config.clone(),
            )
            .with_cancellation(token.clone());
            let handle = tokio::spawn(worker.run());
            workers.insert(
                device_id,
                RunningWorker {
                    cancel: token,
                    handle,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_has_device_nanos_and_suffix() {
        let id = new_worker_id("dev_a");
        let suffix = id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(id.starts_with("dev_a_"));
        assert_ne!(new_worker_id("dev_a"), new_worker_id("dev_a"));
    }

    #[test]
    fn random_delay_stays_in_bounds() {
        for _ in 0..100 {
            let d = random_delay(2, 4);
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(4));
        }
        assert_eq!(random_delay(0, 0), Duration::ZERO);
        assert_eq!(random_delay(5, 1), Duration::from_secs(5));
    }
}
