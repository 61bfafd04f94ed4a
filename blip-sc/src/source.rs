//! Advertisement input boundary
//!
//! The BLE radio driver is a collaborator: it hands the scanner one
//! `Advertisement` per observed broadcast and is responsible for adapter
//! setup, retries, and platform differences. `JsonLineSource` is the
//! replay implementation used in tests and for re-feeding archived
//! captures.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::warn;

use blip_common::types::{manufacturer_data_wire, service_data_wire};
use blip_common::Result;

/// One observed BLE advertisement, as delivered by the radio driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advertisement {
    pub address: String,
    pub rssi: i16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, with = "manufacturer_data_wire")]
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    #[serde(default, with = "service_data_wire")]
    pub service_data: BTreeMap<String, Vec<u8>>,
    #[serde(default)]
    pub service_uuids: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

/// Inbound seam to the radio driver.
#[async_trait]
pub trait AdvertisementSource: Send {
    /// Next observed advertisement; `None` when the source is exhausted.
    async fn next_advertisement(&mut self) -> Result<Option<Advertisement>>;
}

/// Reads one JSON advertisement per line. Malformed lines are logged and
/// skipped; one bad record must not stop the feed.
pub struct JsonLineSource<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> AdvertisementSource for JsonLineSource<R> {
    async fn next_advertisement(&mut self) -> Result<Option<Advertisement>> {
        while let Some(line) = self.lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Advertisement>(&line) {
                Ok(adv) => return Ok(Some(adv)),
                Err(e) => {
                    warn!(error = %e, "skipping malformed advertisement line");
                }
            }
        }
        Ok(None)
    }
}
