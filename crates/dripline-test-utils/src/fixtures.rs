// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Builders for seed rows with test-friendly defaults.
//!
//! Send delays default to zero so dispatch tests never sleep.

use dripline_core::{Device, Lead, SequenceDefinition, SequenceStep, TriggerSet};

/// User id every fixture belongs to.
pub const TEST_USER: &str = "user-1";

pub fn device(id: &str, status: &str) -> Device {
    Device {
        id: id.to_string(),
        user_id: TEST_USER.to_string(),
        device_name: format!("{id} phone"),
        phone: None,
        status: status.to_string(),
    }
}

/// A lead tagged with the comma-separated `triggers`.
pub fn lead(phone: &str, name: &str, device_id: Option<&str>, triggers: &str) -> Lead {
    Lead {
        phone: phone.to_string(),
        user_id: TEST_USER.to_string(),
        name: name.to_string(),
        device_id: device_id.map(str::to_string),
        niche: String::new(),
        triggers: TriggerSet::parse(triggers),
        target_status: "prospect".to_string(),
    }
}

pub fn sequence(id: &str, entry_trigger: &str) -> SequenceDefinition {
    SequenceDefinition {
        id: id.to_string(),
        user_id: TEST_USER.to_string(),
        name: format!("{id} sequence"),
        entry_trigger: entry_trigger.to_string(),
        is_active: true,
        min_delay_secs: 0,
        max_delay_secs: 0,
    }
}

/// A step on `day` with a 24 hour spacing. Day 1 is the entry point.
pub fn step(sequence_id: &str, id: &str, day: u32, trigger: &str) -> SequenceStep {
    SequenceStep {
        id: id.to_string(),
        sequence_id: sequence_id.to_string(),
        day_number: day,
        trigger: trigger.to_string(),
        next_trigger: None,
        trigger_delay_hours: 24,
        min_delay_secs: Some(0),
        max_delay_secs: Some(0),
        content: format!("Hi {{name}}, day {day}"),
        media_url: None,
        is_entry_point: day == 1,
    }
}
