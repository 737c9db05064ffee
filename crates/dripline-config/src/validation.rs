// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as delay ranges, non-zero intervals, and non-empty paths.

use crate::diagnostic::ConfigError;
use crate::model::DriplineConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &DriplineConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.service.log_level.as_str()) {
        fail(format!(
            "service.log_level `{}` must be one of: {}",
            config.service.log_level,
            LOG_LEVELS.join(", ")
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    let dispatch = &config.dispatch;
    if dispatch.batch_size == 0 {
        fail("dispatch.batch_size must be at least 1".to_string());
    }
    if dispatch.poll_interval_secs == 0 {
        fail("dispatch.poll_interval_secs must be at least 1".to_string());
    }
    if dispatch.device_refresh_secs == 0 {
        fail("dispatch.device_refresh_secs must be at least 1".to_string());
    }
    if dispatch.claim_grace_secs == 0 {
        fail("dispatch.claim_grace_secs must be at least 1".to_string());
    }
    if dispatch.default_min_delay_secs > dispatch.default_max_delay_secs {
        fail(format!(
            "dispatch.default_min_delay_secs ({}) must not exceed dispatch.default_max_delay_secs ({})",
            dispatch.default_min_delay_secs, dispatch.default_max_delay_secs
        ));
    }
    if dispatch.processing_timeout_secs <= dispatch.claim_grace_secs {
        fail(format!(
            "dispatch.processing_timeout_secs ({}) must exceed dispatch.claim_grace_secs ({})",
            dispatch.processing_timeout_secs, dispatch.claim_grace_secs
        ));
    }

    if config.materializer.interval_secs == 0 {
        fail("materializer.interval_secs must be at least 1".to_string());
    }
    if config.materializer.sequence_batch_size == 0 {
        fail("materializer.sequence_batch_size must be at least 1".to_string());
    }
    if config.materializer.campaign_utc_offset_minutes.abs() >= 24 * 60 {
        fail(format!(
            "materializer.campaign_utc_offset_minutes must be within +/-1439, got {}",
            config.materializer.campaign_utc_offset_minutes
        ));
    }

    if config.template.fallback_name.trim().is_empty() {
        fail("template.fallback_name must not be empty".to_string());
    }
    if config.template.greeting_utc_offset_minutes.abs() >= 24 * 60 {
        fail(format!(
            "template.greeting_utc_offset_minutes must be within +/-1439, got {}",
            config.template.greeting_utc_offset_minutes
        ));
    }

    if config.enrollment.interval_secs == 0 {
        fail("enrollment.interval_secs must be at least 1".to_string());
    }
    if config.sweeper.interval_secs == 0 {
        fail("sweeper.interval_secs must be at least 1".to_string());
    }

    if let Some(endpoint) = &config.sender.endpoint {
        let endpoint = endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            fail(format!(
                "sender.endpoint `{endpoint}` must be an http:// or https:// URL"
            ));
        }
    }
    if config.sender.timeout_secs == 0 {
        fail("sender.timeout_secs must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
