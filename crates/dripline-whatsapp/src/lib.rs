// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp gateway adapter for Dripline.
//!
//! [`HttpSender`] hands each message to an HTTP gateway that owns the
//! WhatsApp sessions of the user's devices.

pub mod client;

pub use client::HttpSender;
