//! Device inventory
//!
//! Thin domain layer over the store's device table: normalizes addresses
//! so that an address reaches storage in exactly one form, and exposes
//! the queries the rest of the system asks of the inventory.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use blip_common::types::{DeviceRecord, DeviceType};
use blip_common::Result;

use crate::repo::{DeviceObservation, EventStore};

/// Inventory of every device address ever processed.
#[derive(Clone)]
pub struct DeviceInventory {
    store: Arc<dyn EventStore>,
}

impl DeviceInventory {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Fold one processed event into the inventory.
    ///
    /// `device_type` and `name` carry information only when the event
    /// actually yielded a reading; None leaves the stored values alone.
    pub async fn record_observation(
        &self,
        address: &str,
        observed_at: DateTime<Utc>,
        device_type: Option<DeviceType>,
        name: Option<String>,
    ) -> Result<DeviceRecord> {
        let observation = DeviceObservation {
            address: address.to_uppercase(),
            observed_at,
            device_type,
            name,
        };
        self.store.upsert_device(&observation).await
    }

    pub async fn get(&self, address: &str) -> Result<Option<DeviceRecord>> {
        self.store.get_device(&address.to_uppercase()).await
    }

    /// Devices seen at or after the cutoff, most recent first.
    pub async fn active_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeviceRecord>> {
        self.store.list_active_since(cutoff).await
    }
}
