//! Persistence layer
//!
//! One trait seam over the three write paths: the verbatim raw-event
//! archive, the append-only reading store, and the device inventory
//! upsert. The SQLite implementation keeps each path a single statement
//! so concurrent workers never need cross-statement coordination.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use blip_common::types::{DecodedReading, DeviceRecord, DeviceType, RawEvent};
use blip_common::{Error, Result};

/// What one processed event contributes to the inventory.
///
/// `device_type` and `name` are None when the event produced no reading;
/// the upsert then leaves the stored classification and name alone.
#[derive(Debug, Clone)]
pub struct DeviceObservation {
    pub address: String,
    pub observed_at: DateTime<Utc>,
    pub device_type: Option<DeviceType>,
    pub name: Option<String>,
}

/// Storage seam for the processing pipeline.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Archive one raw event verbatim. Returns false when the event id
    /// is already archived (bus redelivery), which is not an error.
    async fn insert_raw(&self, event: &RawEvent) -> Result<bool>;

    /// Append one structured reading.
    async fn insert_reading(&self, reading: &DecodedReading) -> Result<()>;

    /// Fold one observation into the inventory and return the row as
    /// stored afterwards.
    async fn upsert_device(&self, observation: &DeviceObservation) -> Result<DeviceRecord>;

    /// Look up one device by address.
    async fn get_device(&self, address: &str) -> Result<Option<DeviceRecord>>;

    /// Devices whose last_seen is at or after the cutoff, most recent
    /// first.
    async fn list_active_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeviceRecord>>;
}

/// SQLite-backed event store.
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn insert_raw(&self, event: &RawEvent) -> Result<bool> {
        let event_json = serde_json::to_string(event)?;

        // Event ids are assigned once at the edge, so a conflicting id is
        // always a redelivery of an event already archived.
        let result = sqlx::query(
            r#"
            INSERT INTO raw_events (id, scanner_id, address, rssi, name, event_json, detected_at, received_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(event.id.to_string())
        .bind(&event.scanner_id)
        .bind(&event.address)
        .bind(event.rssi)
        .bind(&event.name)
        .bind(event_json)
        .bind(event.detected_at.to_rfc3339())
        .bind(event.received_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_reading(&self, reading: &DecodedReading) -> Result<()> {
        let measurements_json = serde_json::to_string(&reading.measurements)?;

        sqlx::query(
            r#"
            INSERT INTO readings (raw_event_id, address, device_type, recorded_at, measurements_json)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(reading.raw_event_id.to_string())
        .bind(&reading.address)
        .bind(reading.device_type.as_str())
        .bind(reading.recorded_at.to_rfc3339())
        .bind(measurements_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_device(&self, observation: &DeviceObservation) -> Result<DeviceRecord> {
        // last_seen only moves forward (late redeliveries must not
        // regress it); rfc3339 text compares in timestamp order.
        // event_count counts every observation, including late ones.
        // COALESCE binds the observation's own classification/name, not
        // excluded.*, so the insert-path 'unknown' default can never
        // clobber a stored classification.
        sqlx::query(
            r#"
            INSERT INTO devices (address, device_type, name, first_seen, last_seen, event_count)
            VALUES (?, ?, ?, ?, ?, 1)
            ON CONFLICT(address) DO UPDATE SET
                last_seen = MAX(last_seen, excluded.last_seen),
                event_count = event_count + 1,
                device_type = COALESCE(?, device_type),
                name = COALESCE(?, name),
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&observation.address)
        .bind(
            observation
                .device_type
                .unwrap_or(DeviceType::Unknown)
                .as_str(),
        )
        .bind(&observation.name)
        .bind(observation.observed_at.to_rfc3339())
        .bind(observation.observed_at.to_rfc3339())
        .bind(observation.device_type.map(|t| t.as_str()))
        .bind(&observation.name)
        .execute(&self.pool)
        .await?;

        self.get_device(&observation.address)
            .await?
            .ok_or_else(|| Error::NotFound(format!("device {}", observation.address)))
    }

    async fn get_device(&self, address: &str) -> Result<Option<DeviceRecord>> {
        let row = sqlx::query(
            r#"
            SELECT address, device_type, name, first_seen, last_seen, event_count, metadata
            FROM devices
            WHERE address = ?
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(device_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_active_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeviceRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT address, device_type, name, first_seen, last_seen, event_count, metadata
            FROM devices
            WHERE last_seen >= ?
            ORDER BY last_seen DESC
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(device_from_row).collect()
    }
}

fn device_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DeviceRecord> {
    let device_type_str: String = row.get("device_type");
    let metadata_str: String = row.get("metadata");

    Ok(DeviceRecord {
        address: row.get("address"),
        device_type: DeviceType::from_label(&device_type_str),
        name: row.get("name"),
        first_seen: parse_timestamp(&row.get::<String, _>("first_seen"))?,
        last_seen: parse_timestamp(&row.get::<String, _>("last_seen"))?,
        event_count: row.get("event_count"),
        metadata: serde_json::from_str(&metadata_str)?,
    })
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("bad stored timestamp '{}': {}", text, e)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use blip_common::db::init_memory_database;
    use blip_common::types::Measurements;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    async fn test_store() -> SqliteEventStore {
        let pool = init_memory_database().await.expect("memory db");
        SqliteEventStore::new(pool)
    }

    fn sample_event(address: &str) -> RawEvent {
        RawEvent {
            id: Uuid::new_v4(),
            scanner_id: "scanner-01".to_string(),
            address: address.to_string(),
            rssi: -70,
            name: Some("ATC_112233".to_string()),
            manufacturer_data: BTreeMap::from([(0x0157u16, vec![0xd2, 0x00, 0x8a, 0x02, 0x5f])]),
            service_data: BTreeMap::new(),
            service_uuids: Vec::new(),
            detected_at: Utc::now(),
            received_at: Utc::now(),
        }
    }

    fn observation(address: &str, observed_at: DateTime<Utc>) -> DeviceObservation {
        DeviceObservation {
            address: address.to_string(),
            observed_at,
            device_type: None,
            name: None,
        }
    }

    #[tokio::test]
    async fn test_insert_raw_once_then_redelivered() {
        let store = test_store().await;
        let event = sample_event("A4:C1:38:11:22:33");

        assert!(store.insert_raw(&event).await.unwrap());
        // Redelivery of the same id is absorbed, not duplicated
        assert!(!store.insert_raw(&event).await.unwrap());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_events")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_insert_raw_preserves_event_verbatim() {
        let store = test_store().await;
        let event = sample_event("A4:C1:38:11:22:33");
        store.insert_raw(&event).await.unwrap();

        let stored_json: String =
            sqlx::query_scalar("SELECT event_json FROM raw_events WHERE id = ?")
                .bind(event.id.to_string())
                .fetch_one(&store.pool)
                .await
                .unwrap();
        let restored: RawEvent = serde_json::from_str(&stored_json).unwrap();
        assert_eq!(restored.id, event.id);
        assert_eq!(restored.manufacturer_data, event.manufacturer_data);
    }

    #[tokio::test]
    async fn test_insert_reading() {
        let store = test_store().await;
        let reading = DecodedReading {
            raw_event_id: Uuid::new_v4(),
            address: "A4:C1:38:11:22:33".to_string(),
            device_type: DeviceType::EnvironmentalSensor,
            recorded_at: Utc::now(),
            measurements: Measurements::Environmental {
                temperature_c: 21.0,
                humidity_percent: 65.0,
                battery_percent: 95,
            },
        };

        store.insert_reading(&reading).await.unwrap();

        let device_type: String =
            sqlx::query_scalar("SELECT device_type FROM readings WHERE raw_event_id = ?")
                .bind(reading.raw_event_id.to_string())
                .fetch_one(&store.pool)
                .await
                .unwrap();
        assert_eq!(device_type, "environmental_sensor");
    }

    #[tokio::test]
    async fn test_upsert_new_device() {
        let store = test_store().await;
        let now = Utc::now();

        let record = store
            .upsert_device(&DeviceObservation {
                address: "A4:C1:38:11:22:33".to_string(),
                observed_at: now,
                device_type: Some(DeviceType::EnvironmentalSensor),
                name: Some("ATC_112233".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(record.address, "A4:C1:38:11:22:33");
        assert_eq!(record.device_type, DeviceType::EnvironmentalSensor);
        assert_eq!(record.name.as_deref(), Some("ATC_112233"));
        assert_eq!(record.event_count, 1);
        assert_eq!(record.first_seen, record.last_seen);
    }

    #[tokio::test]
    async fn test_upsert_counts_every_observation() {
        let store = test_store().await;
        let now = Utc::now();

        for i in 0..3 {
            store
                .upsert_device(&observation(
                    "AA:BB:CC:DD:EE:FF",
                    now + Duration::seconds(i),
                ))
                .await
                .unwrap();
        }

        let record = store.get_device("AA:BB:CC:DD:EE:FF").await.unwrap().unwrap();
        assert_eq!(record.event_count, 3);
    }

    #[tokio::test]
    async fn test_upsert_last_seen_never_regresses() {
        let store = test_store().await;
        let now = Utc::now();

        store
            .upsert_device(&observation("AA:BB:CC:DD:EE:FF", now))
            .await
            .unwrap();
        // Late redelivery with an earlier observation time
        let record = store
            .upsert_device(&observation(
                "AA:BB:CC:DD:EE:FF",
                now - Duration::minutes(5),
            ))
            .await
            .unwrap();

        assert_eq!(record.last_seen, record.first_seen.max(record.last_seen));
        assert_eq!(record.last_seen.to_rfc3339(), now.to_rfc3339());
        assert_eq!(record.event_count, 2);
    }

    #[tokio::test]
    async fn test_upsert_without_reading_keeps_classification() {
        let store = test_store().await;
        let now = Utc::now();

        store
            .upsert_device(&DeviceObservation {
                address: "AA:BB:CC:DD:EE:FF".to_string(),
                observed_at: now,
                device_type: Some(DeviceType::ProximityBeacon),
                name: Some("beacon-7".to_string()),
            })
            .await
            .unwrap();

        // Undecodable follow-up event: classification and name survive
        let record = store
            .upsert_device(&observation(
                "AA:BB:CC:DD:EE:FF",
                now + Duration::seconds(1),
            ))
            .await
            .unwrap();

        assert_eq!(record.device_type, DeviceType::ProximityBeacon);
        assert_eq!(record.name.as_deref(), Some("beacon-7"));
        assert_eq!(record.event_count, 2);
    }

    #[tokio::test]
    async fn test_unknown_device_later_classified() {
        let store = test_store().await;
        let now = Utc::now();

        store
            .upsert_device(&observation("AA:BB:CC:DD:EE:FF", now))
            .await
            .unwrap();
        let record = store
            .upsert_device(&DeviceObservation {
                address: "AA:BB:CC:DD:EE:FF".to_string(),
                observed_at: now + Duration::seconds(1),
                device_type: Some(DeviceType::EnvironmentalSensor),
                name: None,
            })
            .await
            .unwrap();

        assert_eq!(record.device_type, DeviceType::EnvironmentalSensor);
    }

    #[tokio::test]
    async fn test_get_device_missing() {
        let store = test_store().await;
        assert!(store.get_device("00:00:00:00:00:00").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_active_since() {
        let store = test_store().await;
        let now = Utc::now();

        store
            .upsert_device(&observation("AA:AA:AA:AA:AA:01", now - Duration::hours(2)))
            .await
            .unwrap();
        store
            .upsert_device(&observation("AA:AA:AA:AA:AA:02", now - Duration::minutes(5)))
            .await
            .unwrap();
        store
            .upsert_device(&observation("AA:AA:AA:AA:AA:03", now))
            .await
            .unwrap();

        let active = store
            .list_active_since(now - Duration::hours(1))
            .await
            .unwrap();
        let addresses: Vec<&str> = active.iter().map(|d| d.address.as_str()).collect();
        assert_eq!(addresses, vec!["AA:AA:AA:AA:AA:03", "AA:AA:AA:AA:AA:02"]);
    }
}
