// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Dripline message scheduler.
//!
//! This crate provides the domain types (leads, sequences, campaigns,
//! progress rows, messages), the error types, and the adapter traits for the
//! external collaborators: the [`Sender`] transport and the [`DeviceStatus`]
//! directory.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{DriplineError, SendError};
pub use traits::{DeviceStatus, Sender};
pub use types::{
    AdvanceOutcome, CampaignDefinition, CampaignStatus, ContactProgress, Device, Lead, Message,
    MessageSource, MessageStatus, ProgressStatus, SequenceDefinition, SequenceStep, TriggerSet,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dripline_error_variants_render() {
        let storage = DriplineError::storage(std::io::Error::other("disk gone"));
        assert_eq!(storage.to_string(), "storage error: disk gone");

        let missing = DriplineError::NotFound {
            entity: "contact progress",
            id: "42".into(),
        };
        assert_eq!(missing.to_string(), "contact progress not found: 42");

        let _config = DriplineError::Config("bad".into());
        let _device = DriplineError::Device {
            message: "lookup failed".into(),
            source: None,
        };
        let _timeout = DriplineError::Timeout {
            duration: std::time::Duration::from_secs(30),
        };
        let _internal = DriplineError::Internal("oops".into());
    }

    #[test]
    fn send_error_reason_strips_classification() {
        let permanent = SendError::Permanent("invalid number".into());
        assert_eq!(permanent.reason(), "invalid number");
        assert_eq!(permanent.to_string(), "permanent send failure: invalid number");
        assert_eq!(SendError::Transient("offline".into()).reason(), "offline");
    }

    #[test]
    fn status_serialization() {
        let json = serde_json::to_string(&MessageStatus::Processing).expect("should serialize");
        assert_eq!(json, "\"processing\"");
        let parsed: ProgressStatus = serde_json::from_str("\"completed\"").expect("should parse");
        assert_eq!(parsed, ProgressStatus::Completed);
    }

    #[test]
    fn all_trait_modules_are_exported() {
        fn _assert_sender<T: Sender>() {}
        fn _assert_device_status<T: DeviceStatus>() {}
    }
}
