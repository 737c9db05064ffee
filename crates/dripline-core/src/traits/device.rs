// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Device status trait consumed by enrollment, materialization, and dispatch.

use async_trait::async_trait;

use crate::error::DriplineError;

/// Reports which device connections are currently usable.
#[async_trait]
pub trait DeviceStatus: Send + Sync + 'static {
    /// Whether the given device can send right now.
    async fn is_device_online(&self, device_id: &str) -> Result<bool, DriplineError>;

    /// Ids of every device that can send right now.
    async fn online_devices(&self) -> Result<Vec<String>, DriplineError>;
}
