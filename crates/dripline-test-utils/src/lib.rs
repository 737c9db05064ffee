// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Dripline integration tests.
//!
//! Provides mock adapters and test harness infrastructure for fast,
//! deterministic, CI-runnable tests without a WhatsApp gateway.
//!
//! # Components
//!
//! - [`MockSender`] - Sender with scripted per-recipient outcomes and capture
//!   of delivered messages
//! - [`MockDeviceStatus`] - Device directory with a settable online set
//! - [`TestHarness`] - Temp-file database with seeding helpers

pub mod fixtures;
pub mod harness;
pub mod mock_devices;
pub mod mock_sender;

pub use harness::TestHarness;
pub use mock_devices::MockDeviceStatus;
pub use mock_sender::MockSender;
