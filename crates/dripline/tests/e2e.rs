// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the complete Dripline pipeline.
//!
//! In-process tests wire the engine to a TestHarness and mock adapters; the
//! CLI tests run the built binary against a temp database.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use dripline_core::{DeviceStatus, MessageStatus, ProgressStatus, Sender};
use dripline_engine::{Dispatcher, Enroller, Materializer, StepAdvancer, Sweeper};
use dripline_storage::Database;
use dripline_storage::queries::campaigns::NewCampaign;
use dripline_storage::queries::{leads, messages, progress};
use dripline_test_utils::fixtures::{self, TEST_USER};
use dripline_test_utils::{MockDeviceStatus, MockSender, TestHarness};
use tokio_util::sync::CancellationToken;

// ---- In-process pipeline ----

#[tokio::test]
async fn tagged_lead_and_campaign_are_delivered() {
    let harness = TestHarness::builder()
        .with_config(|c| {
            c.dispatch.poll_interval_secs = 1;
            c.dispatch.device_refresh_secs = 1;
        })
        .build()
        .await
        .unwrap();
    harness
        .add_device(&fixtures::device("dev-1", "connected"))
        .await
        .unwrap();
    let mut welcome = fixtures::step("seq-welcome", "w1", 1, "WELCOME");
    welcome.content = "{Hi|Hello} {name}, welcome".to_string();
    harness
        .add_sequence(&fixtures::sequence("seq-welcome", "WELCOME"), &[welcome])
        .await
        .unwrap();
    harness
        .add_lead(&fixtures::lead("60111", "Aisyah", Some("dev-1"), "WELCOME"))
        .await
        .unwrap();
    harness
        .add_lead(&fixtures::lead("60122", "60122", Some("dev-1"), ""))
        .await
        .unwrap();
    let campaign_id = harness
        .add_campaign(&NewCampaign {
            user_id: TEST_USER.to_string(),
            title: "promo".to_string(),
            message: "Promo for {name}".to_string(),
            min_delay_secs: 0,
            max_delay_secs: 0,
            ..NewCampaign::default()
        })
        .await
        .unwrap();

    let devices: Arc<dyn DeviceStatus> = Arc::new(MockDeviceStatus::with_online(["dev-1"]));
    let advancer = Arc::new(StepAdvancer::new(harness.db.clone(), &harness.config.enrollment));
    let enroller = Enroller::new(harness.db.clone(), harness.config.enrollment.clone());
    let materializer = Materializer::new(
        harness.db.clone(),
        devices.clone(),
        advancer.clone(),
        &harness.config,
    );

    let enrolled = enroller.enroll_due_contacts().await.unwrap();
    assert_eq!(enrolled.contacts_enrolled, 1);
    let made = materializer.materialize_ready_work().await.unwrap();
    assert_eq!(made.campaign_messages, 2);
    assert_eq!(made.sequence_messages, 1);

    let sender = Arc::new(MockSender::new());
    let dyn_sender: Arc<dyn Sender> = sender.clone();
    let dispatcher = Dispatcher::new(
        harness.db.clone(),
        dyn_sender,
        devices,
        advancer.clone(),
        harness.config.dispatch.clone(),
    );
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let running = tokio::spawn(async move { dispatcher.run(token).await });

    let done = tokio::time::timeout(Duration::from_secs(10), async {
        while sender.delivered_count().await < 3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    cancel.cancel();
    running.await.unwrap();
    assert!(done.is_ok(), "pipeline did not deliver in time");

    let delivered = sender.delivered().await;
    let greeting = delivered
        .iter()
        .find(|m| m.sequence_step().is_some())
        .unwrap();
    assert!(
        greeting.content == "Hi Aisyah, welcome" || greeting.content == "Hello Aisyah, welcome",
        "got {}",
        greeting.content
    );
    // A name that is just the phone number falls back to the default greeting name.
    let promo = delivered.iter().find(|m| m.recipient_phone == "60122").unwrap();
    assert_eq!(promo.content, "Promo for Cik");

    let rows = progress::progress_for_contact(&harness.db, "seq-welcome", "60111")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ProgressStatus::Completed);
    let lead = leads::get_lead(&harness.db, "60111").await.unwrap().unwrap();
    assert!(!lead.triggers.contains("WELCOME"));

    let campaign_rows = messages::messages_for_campaign(&harness.db, campaign_id)
        .await
        .unwrap();
    assert!(campaign_rows.iter().all(|m| m.status == MessageStatus::Sent));

    // Nothing left to do: another full pass creates and repairs nothing.
    assert_eq!(enroller.enroll_due_contacts().await.unwrap().rows_created, 0);
    let again = materializer.materialize_ready_work().await.unwrap();
    assert_eq!(again.campaign_messages + again.sequence_messages, 0);
    assert_eq!(again.campaigns_completed, 1);
    let swept = Sweeper::new(harness.db.clone(), advancer, harness.config.dispatch.clone())
        .sweep()
        .await
        .unwrap();
    assert_eq!(swept.reset_stuck + swept.expired + swept.reconciled, 0);
}

// ---- CLI ----

fn write_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let db_path = dir.path().join("dripline.db");
    let config_path = dir.path().join("dripline.toml");
    std::fs::write(
        &config_path,
        format!(
            "[storage]\ndatabase_path = \"{}\"\n\n[service]\nlog_level = \"warn\"\n",
            db_path.display()
        ),
    )
    .unwrap();
    config_path
}

fn dripline(config: &std::path::Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_dripline"))
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .unwrap()
}

#[tokio::test]
#[serial_test::serial]
async fn status_json_reports_seeded_rows() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir);
    {
        let db = Database::open(dir.path().join("dripline.db").to_str().unwrap())
            .await
            .unwrap();
        dripline_storage::queries::devices::upsert_device(&db, &fixtures::device("dev-1", "online"))
            .await
            .unwrap();
        db.close().await.unwrap();
    }

    let out = dripline(&config, &["status", "--json"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["devices_online"], 1);
    assert_eq!(json["devices_total"], 1);
    assert!(json["messages"].as_object().unwrap().is_empty());
}

#[test]
#[serial_test::serial]
fn tick_and_sweep_run_on_an_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir);

    let tick = dripline(&config, &["tick"]);
    assert!(tick.status.success(), "stderr: {}", String::from_utf8_lossy(&tick.stderr));
    assert!(String::from_utf8_lossy(&tick.stdout).contains("enrolled 0 contacts"));

    let sweep = dripline(&config, &["sweep"]);
    assert!(sweep.status.success(), "stderr: {}", String::from_utf8_lossy(&sweep.stderr));
    assert!(String::from_utf8_lossy(&sweep.stdout).contains("reset 0 stuck"));
}

#[test]
fn serve_without_sender_endpoint_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir);

    let out = dripline(&config, &["serve"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("sender.endpoint"));
}
