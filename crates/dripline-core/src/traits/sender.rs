// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sender trait for the device-connection transport.

use async_trait::async_trait;

use crate::error::SendError;
use crate::types::Message;

/// Delivers one message through one device connection.
///
/// A device connection is single-stream: the scheduler never calls `send`
/// concurrently for the same `message.device_id`.
#[async_trait]
pub trait Sender: Send + Sync + 'static {
    /// Human-readable adapter name for logs.
    fn name(&self) -> &str;

    /// Attempts delivery. `Ok(())` means the provider accepted the message.
    async fn send(&self, message: &Message) -> Result<(), SendError>;
}
