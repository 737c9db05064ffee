// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock sender for deterministic dispatch tests.
//!
//! `MockSender` implements `Sender` with per-recipient scripted outcomes and
//! captures every delivered message for assertion in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use dripline_core::{Message, SendError, Sender};

/// A mock WhatsApp transport for testing.
///
/// Recipients without a script are delivered successfully. A scripted
/// recipient consumes one outcome per attempt; once its script runs out,
/// later attempts succeed.
pub struct MockSender {
    scripts: Mutex<HashMap<String, VecDeque<Result<(), SendError>>>>,
    delivered: Arc<Mutex<Vec<Message>>>,
    attempts: Arc<Mutex<Vec<(String, DateTime<Utc>)>>>,
    latency: Option<Duration>,
}

impl MockSender {
    /// Create a sender that accepts everything.
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            delivered: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(Mutex::new(Vec::new())),
            latency: None,
        }
    }

    /// Script the outcomes of the next attempts to `phone`.
    pub fn with_outcomes(
        mut self,
        phone: &str,
        outcomes: impl IntoIterator<Item = Result<(), SendError>>,
    ) -> Self {
        self.scripts
            .get_mut()
            .entry(phone.to_string())
            .or_default()
            .extend(outcomes);
        self
    }

    /// Every attempt to `phone` fails permanently.
    pub fn rejecting(self, phone: &str, reason: &str) -> Self {
        self.with_outcomes(
            phone,
            std::iter::repeat_n(Err(SendError::Permanent(reason.to_string())), 64),
        )
    }

    /// Sleep this long inside every `send`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Messages accepted so far, in delivery order.
    pub async fn delivered(&self) -> Vec<Message> {
        self.delivered.lock().await.clone()
    }

    pub async fn delivered_count(&self) -> usize {
        self.delivered.lock().await.len()
    }

    /// Ids of every message `send` was called with, including failures.
    pub async fn attempts(&self) -> Vec<String> {
        self.attempts
            .lock()
            .await
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every attempt with the wall-clock time `send` was entered.
    pub async fn attempt_times(&self) -> Vec<(String, DateTime<Utc>)> {
        self.attempts.lock().await.clone()
    }
}

impl Default for MockSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sender for MockSender {
    fn name(&self) -> &str {
        "mock-sender"
    }

    async fn send(&self, message: &Message) -> Result<(), SendError> {
        self.attempts
            .lock()
            .await
            .push((message.id.clone(), Utc::now()));
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let outcome = self
            .scripts
            .lock()
            .await
            .get_mut(&message.recipient_phone)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.delivered.lock().await.push(message.clone());
        }
        outcome
    }
}
