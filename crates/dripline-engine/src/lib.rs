// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scheduling engine for Dripline.
//!
//! Four cooperating parts share one SQLite store:
//!
//! - [`Enroller`] turns lead trigger tags into per-step progress rows.
//! - [`Materializer`] turns due campaigns and due sequence steps into
//!   outbound message rows.
//! - [`Dispatcher`] runs one [`DeviceWorker`] per online device that claims
//!   and sends those rows.
//! - [`StepAdvancer`] moves a contact to its next step once a step's
//!   message is resolved.
//!
//! [`Sweeper`] repairs rows left behind by crashes and missed windows.

pub mod advancement;
pub mod dispatch;
pub mod enrollment;
pub mod materializer;
pub mod shutdown;
pub mod sweeper;
pub mod template;

pub use advancement::StepAdvancer;
pub use dispatch::{DeviceWorker, DispatchReport, Dispatcher};
pub use enrollment::{EnrollmentReport, Enroller};
pub use materializer::{MaterializeReport, Materializer};
pub use shutdown::install_signal_handler;
pub use sweeper::{SweepReport, Sweeper};
pub use template::{Recipient, Renderer, render_content};
