// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./dripline.toml` > `~/.config/dripline/dripline.toml`
//! > `/etc/dripline/dripline.toml` with environment variable overrides via
//! the `DRIPLINE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::diagnostic::SECTION_KEYS;
use crate::model::DriplineConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/dripline/dripline.toml` (system-wide)
/// 3. `~/.config/dripline/dripline.toml` (user XDG config)
/// 4. `./dripline.toml` (local directory)
/// 5. `DRIPLINE_*` environment variables
pub fn load_config() -> Result<DriplineConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<DriplineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(DriplineConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<DriplineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(DriplineConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used for config loading (exposed for diagnostic use).
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(DriplineConfig::default()))
        .merge(Toml::file("/etc/dripline/dripline.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("dripline/dripline.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("dripline.toml"))
        .merge(env_provider())
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `DRIPLINE_DISPATCH_CLAIM_GRACE_SECS` must map to
/// `dispatch.claim_grace_secs`, not `dispatch.claim.grace.secs`.
fn env_provider() -> Env {
    Env::prefixed("DRIPLINE_").map(|key| map_env_key(&key.as_str().to_ascii_lowercase()).into())
}

/// Map a lowercased, prefix-stripped env key onto its dotted config path.
pub fn map_env_key(key: &str) -> String {
    for (section, _) in SECTION_KEYS {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}
