// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Safety properties under concurrency: each handle on the database behaves
//! like a separate scheduler process.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use dripline_core::{DeviceStatus, Message, MessageSource, ProgressStatus, Sender};
use dripline_engine::{DeviceWorker, Enroller, Materializer, StepAdvancer};
use dripline_storage::Database;
use dripline_storage::queries::campaigns::NewCampaign;
use dripline_storage::queries::messages::{self, ClaimRequest};
use dripline_storage::queries::progress::{self, NewProgress};
use dripline_test_utils::fixtures::{self, TEST_USER};
use dripline_test_utils::{MockDeviceStatus, MockSender, TestHarness};

async fn claim_until_empty(db: Database, worker: &'static str) -> Vec<String> {
    let mut claimed = Vec::new();
    loop {
        let now = Utc::now();
        let batch = messages::claim_batch(
            &db,
            ClaimRequest {
                device_id: "dev-1".to_string(),
                worker_id: worker.to_string(),
                now,
                window_start: now - Duration::minutes(10),
                window_end: now + Duration::minutes(1),
                limit: 3,
            },
        )
        .await
        .unwrap();
        if batch.is_empty() {
            return claimed;
        }
        claimed.extend(batch.into_iter().map(|m| m.id));
    }
}

#[tokio::test]
async fn no_message_is_claimed_twice() {
    let harness = TestHarness::new().await.unwrap();
    let campaign_id = harness
        .add_campaign(&NewCampaign {
            user_id: TEST_USER.to_string(),
            title: "bulk".to_string(),
            message: "hello".to_string(),
            ..NewCampaign::default()
        })
        .await
        .unwrap();
    let due = Utc::now() - Duration::seconds(5);
    for i in 0..24 {
        let msg = Message::pending(
            format!("m{i:02}"),
            TEST_USER.to_string(),
            "dev-1".to_string(),
            MessageSource::Campaign { campaign_id },
            format!("601{i:02}"),
            String::new(),
            "hello".to_string(),
            due,
        );
        assert!(messages::insert_message(&harness.db, &msg).await.unwrap());
    }

    let mut handles = Vec::new();
    for worker in ["w-a", "w-b", "w-c", "w-d"] {
        let db = harness.open_second_handle().await.unwrap();
        handles.push(tokio::spawn(claim_until_empty(db, worker)));
    }
    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }

    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), 24);
    assert_eq!(unique.len(), 24);
}

#[tokio::test]
async fn at_most_one_active_step_per_contact() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .add_sequence(
            &fixtures::sequence("seq-1", "START"),
            &[
                fixtures::step("seq-1", "s1", 1, "START"),
                fixtures::step("seq-1", "s2", 2, "START"),
                fixtures::step("seq-1", "s3", 3, "START"),
            ],
        )
        .await
        .unwrap();
    let now = Utc::now();
    let phones: Vec<String> = (0..8).map(|i| format!("6020{i}")).collect();
    for phone in &phones {
        let rows = (1..=3)
            .map(|n: u32| NewProgress {
                sequence_id: "seq-1".to_string(),
                contact_phone: phone.clone(),
                contact_name: String::new(),
                user_id: TEST_USER.to_string(),
                sequence_step_id: format!("s{n}"),
                current_step: n,
                enrolled_trigger: "START".to_string(),
                next_trigger_time: now - Duration::minutes(i64::from(10 - n)),
                assigned_device_id: Some("dev-1".to_string()),
            })
            .collect();
        progress::enroll_contact(&harness.db, rows, true).await.unwrap();
    }

    let other = harness.open_second_handle().await.unwrap();
    let (a, b) = tokio::join!(
        progress::activate_due_heads(&harness.db, now),
        progress::activate_due_heads(&other, now),
    );
    assert_eq!(a.unwrap() + b.unwrap(), phones.len());

    for phone in &phones {
        let rows = progress::progress_for_contact(&harness.db, "seq-1", phone)
            .await
            .unwrap();
        let active: Vec<_> = rows
            .iter()
            .filter(|r| r.status == ProgressStatus::Active)
            .collect();
        assert_eq!(active.len(), 1, "contact {phone}");
        assert_eq!(active[0].sequence_step_id, "s1");
    }
}

#[tokio::test]
async fn concurrent_materializers_create_each_message_once() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .add_device(&fixtures::device("dev-1", "online"))
        .await
        .unwrap();
    harness
        .add_sequence(
            &fixtures::sequence("seq-1", "START"),
            &[fixtures::step("seq-1", "s1", 1, "START")],
        )
        .await
        .unwrap();
    for i in 0..6 {
        harness
            .add_lead(&fixtures::lead(&format!("6030{i}"), "Bob", Some("dev-1"), "START"))
            .await
            .unwrap();
    }
    let campaign_id = harness
        .add_campaign(&NewCampaign {
            user_id: TEST_USER.to_string(),
            title: "promo".to_string(),
            message: "hello {name}".to_string(),
            min_delay_secs: 0,
            max_delay_secs: 0,
            ..NewCampaign::default()
        })
        .await
        .unwrap();

    // Enrollment rows due immediately so the same tick also expands steps.
    let enroller = Enroller::new(harness.db.clone(), harness.config.enrollment.clone());
    let enrolled = enroller
        .enroll_due_contacts_at(Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(enrolled.contacts_enrolled, 6);

    let devices: Arc<dyn DeviceStatus> = Arc::new(MockDeviceStatus::with_online(["dev-1"]));
    let materializer_on = |db: Database| {
        let advancer = Arc::new(StepAdvancer::new(db.clone(), &harness.config.enrollment));
        Materializer::new(db, devices.clone(), advancer, &harness.config)
    };
    let first = materializer_on(harness.db.clone());
    let second = materializer_on(harness.open_second_handle().await.unwrap());

    let (a, b) = tokio::join!(first.materialize_ready_work(), second.materialize_ready_work());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.campaign_messages + b.campaign_messages, 6);
    assert_eq!(a.sequence_messages + b.sequence_messages, 6);

    let campaign_rows = messages::messages_for_campaign(&harness.db, campaign_id)
        .await
        .unwrap();
    let recipients: HashSet<_> = campaign_rows.iter().map(|m| m.recipient_phone.clone()).collect();
    assert_eq!(campaign_rows.len(), 6);
    assert_eq!(recipients.len(), 6);

    let all = messages::messages_for_device(&harness.db, "dev-1").await.unwrap();
    assert_eq!(all.len(), 12);

    let again = first.materialize_ready_work().await.unwrap();
    assert_eq!(again.campaign_messages + again.sequence_messages, 0);
}

#[tokio::test]
async fn device_sends_follow_schedule_order() {
    let harness = TestHarness::new().await.unwrap();
    let campaign_id = harness
        .add_campaign(&NewCampaign {
            user_id: TEST_USER.to_string(),
            title: "ordered".to_string(),
            message: "hello".to_string(),
            ..NewCampaign::default()
        })
        .await
        .unwrap();
    let base = Utc::now() - Duration::seconds(30);
    // Inserted out of order; two share a timestamp and differ by group order.
    let plan = [("m3", 20, 0), ("m1", 0, 0), ("m2b", 10, 2), ("m2a", 10, 1)];
    for (id, offset, order) in plan {
        let msg = Message::pending(
            id.to_string(),
            TEST_USER.to_string(),
            "dev-1".to_string(),
            MessageSource::Campaign { campaign_id },
            format!("phone-{id}"),
            String::new(),
            "hello".to_string(),
            base + Duration::seconds(offset),
        )
        .with_group(format!("campaign-{campaign_id}"), order);
        messages::insert_message(&harness.db, &msg).await.unwrap();
    }

    let sender = Arc::new(MockSender::new());
    let dyn_sender: Arc<dyn Sender> = sender.clone();
    let advancer = Arc::new(StepAdvancer::new(harness.db.clone(), &harness.config.enrollment));
    let worker = DeviceWorker::new(
        "dev-1",
        harness.db.clone(),
        dyn_sender,
        advancer,
        harness.config.dispatch.clone(),
    );
    let report = worker.dispatch_once().await.unwrap();
    assert_eq!(report.sent, 4);

    let order: Vec<String> = sender.delivered().await.into_iter().map(|m| m.id).collect();
    assert_eq!(order, vec!["m1", "m2a", "m2b", "m3"]);
}
