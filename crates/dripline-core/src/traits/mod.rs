// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter traits for the collaborators the scheduler talks to.
//!
//! Both traits use `#[async_trait]` so they can be held as `Arc<dyn _>`.

pub mod device;
pub mod sender;

pub use device::DeviceStatus;
pub use sender::Sender;
