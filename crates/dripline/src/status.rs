// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `dripline status` command implementation.
//!
//! Reads row counts by status straight from the database, so it works
//! whether or not a `serve` process is running.

use std::collections::BTreeMap;

use dripline_config::model::DriplineConfig;
use dripline_core::DriplineError;
use dripline_storage::Database;
use dripline_storage::queries::{campaigns, devices, messages, progress};
use serde::Serialize;

/// Structured status output for `--json` mode.
#[derive(Debug, Default, Serialize)]
pub struct StatusResponse {
    pub database_path: String,
    pub messages: BTreeMap<String, i64>,
    pub progress: BTreeMap<String, i64>,
    pub campaigns: BTreeMap<String, i64>,
    pub devices_online: usize,
    pub devices_total: usize,
}

/// Collect counts from an open database.
pub async fn collect_status(db: &Database) -> Result<StatusResponse, DriplineError> {
    let all_devices = devices::list_devices(db).await?;
    Ok(StatusResponse {
        database_path: db.path().to_string(),
        messages: messages::status_counts(db).await?.into_iter().collect(),
        progress: progress::status_counts(db).await?.into_iter().collect(),
        campaigns: campaigns::status_counts(db).await?.into_iter().collect(),
        devices_online: all_devices.iter().filter(|d| d.is_online()).count(),
        devices_total: all_devices.len(),
    })
}

/// Run the `dripline status` command.
pub async fn run_status(config: &DriplineConfig, json: bool) -> Result<(), DriplineError> {
    let db = Database::open_with(&config.storage).await?;
    let status = collect_status(&db).await?;
    db.close().await?;

    if json {
        let out = serde_json::to_string_pretty(&status)
            .map_err(|e| DriplineError::Internal(format!("failed to encode status: {e}")))?;
        println!("{out}");
    } else {
        print!("{}", render_status(&status));
    }
    Ok(())
}

fn render_status(status: &StatusResponse) -> String {
    let mut out = String::new();
    out.push_str("\n  dripline status\n");
    out.push_str(&format!("  {}\n", "-".repeat(35)));
    out.push_str(&format!("    Database: {}\n", status.database_path));
    out.push_str(&format!(
        "    Devices:  {} online / {} total\n",
        status.devices_online, status.devices_total
    ));
    for (label, counts) in [
        ("Messages", &status.messages),
        ("Progress", &status.progress),
        ("Campaigns", &status.campaigns),
    ] {
        out.push_str(&format!("    {label}:\n"));
        if counts.is_empty() {
            out.push_str("      (none)\n");
        }
        for (state, count) in counts {
            out.push_str(&format!("      {state:<12}{count:>8}\n"));
        }
    }
    out.push('\n');
    out
}
