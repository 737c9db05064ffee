// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for integration testing.
//!
//! `TestHarness` owns a migrated temp-file SQLite database plus a
//! [`DriplineConfig`] tuned for tests, and offers seeding helpers for
//! devices, leads, sequences and campaigns.

use dripline_config::model::{DriplineConfig, StorageConfig};
use dripline_core::{Device, DriplineError, Lead, SequenceDefinition, SequenceStep};
use dripline_storage::Database;
use dripline_storage::queries::campaigns::{self, NewCampaign};
use dripline_storage::queries::{devices, leads, sequences};

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: DriplineConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut config = DriplineConfig::default();
        config.dispatch.default_min_delay_secs = 0;
        config.dispatch.default_max_delay_secs = 0;
        Self { config }
    }

    /// Adjust the configuration before the harness is built.
    pub fn with_config(mut self, adjust: impl FnOnce(&mut DriplineConfig)) -> Self {
        adjust(&mut self.config);
        self
    }

    /// Build the harness, creating and migrating the database.
    pub async fn build(self) -> Result<TestHarness, DriplineError> {
        let temp_dir = tempfile::TempDir::new().map_err(DriplineError::storage)?;
        let db_path = temp_dir.path().join("test.db");

        let mut config = self.config;
        config.storage = StorageConfig {
            database_path: db_path.to_string_lossy().into_owned(),
            ..config.storage
        };
        let db = Database::open_with(&config.storage).await?;

        Ok(TestHarness {
            db,
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A temp database with the configuration the engine should run with.
pub struct TestHarness {
    /// Handle on the temp database (deleted on drop).
    pub db: Database,
    pub config: DriplineConfig,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Harness with the default test configuration.
    pub async fn new() -> Result<Self, DriplineError> {
        Self::builder().build().await
    }

    /// Open a second, independent handle on the same database file.
    ///
    /// Each handle has its own connection thread, like a second process.
    pub async fn open_second_handle(&self) -> Result<Database, DriplineError> {
        Database::open_with(&self.config.storage).await
    }

    pub async fn add_device(&self, device: &Device) -> Result<(), DriplineError> {
        devices::upsert_device(&self.db, device).await
    }

    pub async fn add_lead(&self, lead: &Lead) -> Result<(), DriplineError> {
        leads::upsert_lead(&self.db, lead).await
    }

    /// Store a sequence and all of its steps.
    pub async fn add_sequence(
        &self,
        sequence: &SequenceDefinition,
        steps: &[SequenceStep],
    ) -> Result<(), DriplineError> {
        sequences::upsert_sequence(&self.db, sequence).await?;
        for step in steps {
            sequences::upsert_step(&self.db, step).await?;
        }
        Ok(())
    }

    /// Store a pending campaign and return its id.
    pub async fn add_campaign(&self, campaign: &NewCampaign) -> Result<i64, DriplineError> {
        campaigns::insert_campaign(&self.db, campaign).await
    }

    /// Run raw SQL against the database. For arranging edge-case rows.
    pub async fn execute(&self, sql: &str) -> Result<(), DriplineError> {
        let sql = sql.to_string();
        self.db
            .connection()
            .call(move |conn| conn.execute_batch(&sql))
            .await
            .map_err(dripline_storage::database::map_tr_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn harness_seeds_rows() {
        let harness = TestHarness::builder()
            .with_config(|c| c.dispatch.batch_size = 3)
            .build()
            .await
            .unwrap();
        assert_eq!(harness.config.dispatch.batch_size, 3);
        assert_eq!(harness.config.dispatch.default_max_delay_secs, 0);

        harness
            .add_device(&fixtures::device("dev-1", "online"))
            .await
            .unwrap();
        harness
            .add_lead(&fixtures::lead("601", "Alice", Some("dev-1"), "WARMSTART"))
            .await
            .unwrap();
        harness
            .add_sequence(
                &fixtures::sequence("seq-1", "WARMSTART"),
                &[fixtures::step("seq-1", "s1", 1, "WARMSTART")],
            )
            .await
            .unwrap();

        let lead = leads::get_lead(&harness.db, "601").await.unwrap().unwrap();
        assert!(lead.triggers.contains("WARMSTART"));
        assert_eq!(
            sequences::steps_for_sequence(&harness.db, "seq-1")
                .await
                .unwrap()
                .len(),
            1
        );

        let second = harness.open_second_handle().await.unwrap();
        assert!(devices::get_device(&second, "dev-1").await.unwrap().is_some());
    }
}
