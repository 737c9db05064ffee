// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Device directory (`user_devices`) and the SQLite-backed [`DeviceStatus`].

use async_trait::async_trait;
use dripline_core::{Device, DeviceStatus, DriplineError};
use rusqlite::{OptionalExtension, params};

use crate::database::Database;

const ONLINE_STATUSES: &str = "('online', 'connected')";

fn device_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        user_id: row.get(1)?,
        device_name: row.get(2)?,
        phone: row.get(3)?,
        status: row.get(4)?,
    })
}

/// Insert or replace a device row.
pub async fn upsert_device(db: &Database, device: &Device) -> Result<(), DriplineError> {
    let device = device.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO user_devices (id, user_id, device_name, phone, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (id) DO UPDATE SET
                    user_id = excluded.user_id,
                    device_name = excluded.device_name,
                    phone = excluded.phone,
                    status = excluded.status,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![
                    device.id,
                    device.user_id,
                    device.device_name,
                    device.phone,
                    device.status,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch one device by id.
pub async fn get_device(db: &Database, id: &str) -> Result<Option<Device>, DriplineError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT id, user_id, device_name, phone, status FROM user_devices WHERE id = ?1",
                params![id],
                device_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Update a device's connection status. Returns `false` for an unknown device.
pub async fn set_device_status(
    db: &Database,
    id: &str,
    status: &str,
) -> Result<bool, DriplineError> {
    let id = id.to_string();
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE user_devices SET status = ?2,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id, status],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Ids of every device whose status counts as online, sorted.
pub async fn online_device_ids(db: &Database) -> Result<Vec<String>, DriplineError> {
    db.connection()
        .call(|conn| {
            let sql = format!(
                "SELECT id FROM user_devices WHERE status IN {ONLINE_STATUSES} ORDER BY id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Every device, for operator output.
pub async fn list_devices(db: &Database) -> Result<Vec<Device>, DriplineError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, device_name, phone, status FROM user_devices ORDER BY id",
            )?;
            let devices = stmt
                .query_map([], device_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(devices)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// [`DeviceStatus`] that reads the `user_devices` table written by the
/// connection layer.
#[derive(Debug, Clone)]
pub struct SqliteDeviceStatus {
    db: Database,
}

impl SqliteDeviceStatus {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DeviceStatus for SqliteDeviceStatus {
    async fn is_device_online(&self, device_id: &str) -> Result<bool, DriplineError> {
        Ok(get_device(&self.db, device_id)
            .await?
            .is_some_and(|device| device.is_online()))
    }

    async fn online_devices(&self) -> Result<Vec<String>, DriplineError> {
        online_device_ids(&self.db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn device(id: &str, status: &str) -> Device {
        Device {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            device_name: format!("{id} phone"),
            phone: Some("60120000000".to_string()),
            status: status.to_string(),
        }
    }

    #[tokio::test]
    async fn online_devices_follow_status() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        upsert_device(&db, &device("dev-a", "online")).await.unwrap();
        upsert_device(&db, &device("dev-b", "connected")).await.unwrap();
        upsert_device(&db, &device("dev-c", "offline")).await.unwrap();

        let status = SqliteDeviceStatus::new(db.clone());
        assert_eq!(status.online_devices().await.unwrap(), vec!["dev-a", "dev-b"]);
        assert!(status.is_device_online("dev-b").await.unwrap());
        assert!(!status.is_device_online("dev-c").await.unwrap());
        assert!(!status.is_device_online("missing").await.unwrap());

        assert!(set_device_status(&db, "dev-a", "disconnected").await.unwrap());
        assert!(!status.is_device_online("dev-a").await.unwrap());
        assert!(!set_device_status(&db, "missing", "online").await.unwrap());
        assert_eq!(list_devices(&db).await.unwrap().len(), 3);
    }
}
