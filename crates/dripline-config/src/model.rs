// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Dripline scheduler.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Dripline configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to the values the scheduler was tuned with.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DriplineConfig {
    /// Service identity and logging.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Claim-and-dispatch scheduler settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Message materializer settings.
    #[serde(default)]
    pub materializer: MaterializerConfig,

    /// Sequence enrollment settings.
    #[serde(default)]
    pub enrollment: EnrollmentConfig,

    /// Maintenance sweep settings.
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Content templating settings.
    #[serde(default)]
    pub template: TemplateConfig,

    /// WhatsApp gateway sender settings.
    #[serde(default)]
    pub sender: SenderConfig,
}

/// Service identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Name reported in logs.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "dripline".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// How long a writer waits for the database lock before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("dripline").join("dripline.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("dripline.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

/// Claim-and-dispatch scheduler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    /// Seconds between claim attempts of one device worker.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum messages claimed per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// How far in the past a pending message may be scheduled and still be claimed.
    #[serde(default = "default_claim_grace_secs")]
    pub claim_grace_secs: u64,

    /// How far in the future a pending message may be scheduled and already be claimed.
    #[serde(default = "default_claim_lookahead_secs")]
    pub claim_lookahead_secs: u64,

    /// Age after which a `processing` claim is considered abandoned.
    #[serde(default = "default_processing_timeout_secs")]
    pub processing_timeout_secs: u64,

    /// Lower send-delay bound used when a campaign or step does not set one.
    #[serde(default = "default_min_delay_secs")]
    pub default_min_delay_secs: u32,

    /// Upper send-delay bound used when a campaign or step does not set one.
    #[serde(default = "default_max_delay_secs")]
    pub default_max_delay_secs: u32,

    /// Seconds between refreshes of the online device list.
    #[serde(default = "default_device_refresh_secs")]
    pub device_refresh_secs: u64,

    /// Per-device hourly send cap. Zero disables the cap.
    #[serde(default)]
    pub messages_per_hour: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            claim_grace_secs: default_claim_grace_secs(),
            claim_lookahead_secs: default_claim_lookahead_secs(),
            processing_timeout_secs: default_processing_timeout_secs(),
            default_min_delay_secs: default_min_delay_secs(),
            default_max_delay_secs: default_max_delay_secs(),
            device_refresh_secs: default_device_refresh_secs(),
            messages_per_hour: 0,
        }
    }
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn claim_grace(&self) -> Duration {
        Duration::from_secs(self.claim_grace_secs)
    }

    pub fn claim_lookahead(&self) -> Duration {
        Duration::from_secs(self.claim_lookahead_secs)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn device_refresh(&self) -> Duration {
        Duration::from_secs(self.device_refresh_secs)
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_batch_size() -> u32 {
    10
}

fn default_claim_grace_secs() -> u64 {
    600
}

fn default_claim_lookahead_secs() -> u64 {
    60
}

fn default_processing_timeout_secs() -> u64 {
    12 * 60 * 60
}

fn default_min_delay_secs() -> u32 {
    10
}

fn default_max_delay_secs() -> u32 {
    30
}

fn default_device_refresh_secs() -> u64 {
    30
}

/// Message materializer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MaterializerConfig {
    /// Seconds between materialization passes.
    #[serde(default = "default_materializer_interval_secs")]
    pub interval_secs: u64,

    /// Maximum sequence steps turned into messages per pass.
    #[serde(default = "default_sequence_batch_size")]
    pub sequence_batch_size: u32,

    /// Offset from UTC, in minutes, for campaign `campaign_date`/`time_schedule`.
    #[serde(default)]
    pub campaign_utc_offset_minutes: i32,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_materializer_interval_secs(),
            sequence_batch_size: default_sequence_batch_size(),
            campaign_utc_offset_minutes: 0,
        }
    }
}

fn default_materializer_interval_secs() -> u64 {
    60
}

fn default_sequence_batch_size() -> u32 {
    500
}

/// Sequence enrollment configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnrollmentConfig {
    /// Seconds between enrollment passes.
    #[serde(default = "default_enrollment_interval_secs")]
    pub interval_secs: u64,

    /// Spacing used for a step whose `trigger_delay_hours` is zero.
    #[serde(default = "default_step_delay_hours")]
    pub default_step_delay_hours: u32,

    /// Remove the enrolling trigger from the lead once the sequence finishes.
    #[serde(default = "default_true")]
    pub remove_trigger_on_complete: bool,

    /// Keep a contact in at most one unfinished sequence at a time.
    #[serde(default = "default_true")]
    pub single_active_sequence: bool,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_enrollment_interval_secs(),
            default_step_delay_hours: default_step_delay_hours(),
            remove_trigger_on_complete: true,
            single_active_sequence: true,
        }
    }
}

fn default_enrollment_interval_secs() -> u64 {
    60
}

fn default_step_delay_hours() -> u32 {
    24
}

fn default_true() -> bool {
    true
}

/// Maintenance sweep configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweeperConfig {
    /// Seconds between sweeps.
    #[serde(default = "default_sweeper_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweeper_interval_secs(),
        }
    }
}

fn default_sweeper_interval_secs() -> u64 {
    300
}

/// Content templating configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateConfig {
    /// Substituted for `{name}` when the recipient has no usable name.
    #[serde(default = "default_fallback_name")]
    pub fallback_name: String,

    /// Prefix each message with a time-of-day greeting line.
    #[serde(default)]
    pub greeting: bool,

    /// Offset from UTC, in minutes, used to pick the greeting for the send hour.
    #[serde(default)]
    pub greeting_utc_offset_minutes: i32,

    /// Vary each copy with homoglyphs, zero-width characters and punctuation spacing.
    #[serde(default)]
    pub randomize: bool,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            fallback_name: default_fallback_name(),
            greeting: false,
            greeting_utc_offset_minutes: 0,
            randomize: false,
        }
    }
}

fn default_fallback_name() -> String {
    "Cik".to_string()
}

/// WhatsApp gateway sender configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SenderConfig {
    /// Gateway endpoint receiving `POST` send requests. `None` disables `serve`.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Per-request timeout.
    #[serde(default = "default_sender_timeout_secs")]
    pub timeout_secs: u64,

    /// Bearer token sent to the gateway.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_sender_timeout_secs(),
            api_key: None,
        }
    }
}

fn default_sender_timeout_secs() -> u64 {
    30
}
