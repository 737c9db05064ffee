// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory device directory.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use dripline_core::{DeviceStatus, DriplineError};

/// A `DeviceStatus` whose online set is changed directly by the test.
#[derive(Debug, Default)]
pub struct MockDeviceStatus {
    online: RwLock<BTreeSet<String>>,
}

impl MockDeviceStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given devices online.
    pub fn with_online<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            online: RwLock::new(devices.into_iter().map(Into::into).collect()),
        }
    }

    pub async fn set_online(&self, device_id: &str, online: bool) {
        let mut set = self.online.write().await;
        if online {
            set.insert(device_id.to_string());
        } else {
            set.remove(device_id);
        }
    }
}

#[async_trait]
impl DeviceStatus for MockDeviceStatus {
    async fn is_device_online(&self, device_id: &str) -> Result<bool, DriplineError> {
        Ok(self.online.read().await.contains(device_id))
    }

    async fn online_devices(&self) -> Result<Vec<String>, DriplineError> {
        Ok(self.online.read().await.iter().cloned().collect())
    }
}
