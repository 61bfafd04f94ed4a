//! Domain types shared by the scanner and ingest processes
//!
//! `RawEvent` is the wire format published by the edge scanner: one BLE
//! advertisement as received, never mutated, archived verbatim for
//! audit/replay. `DecodedReading` is the structured measurement extracted
//! from one RawEvent by exactly one decoder. `DeviceRecord` is the
//! inventory row keyed by device address.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One BLE advertisement as received at the edge.
///
/// Immutable once created. Vendor payloads are kept opaque here; only the
/// ingest-side decoders interpret them. On the wire, manufacturer data is
/// keyed by `"0x%04x"` company id with base64 payloads, matching the
/// scanner's JSON schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// Event identity, minted at the edge. Lineage key for readings.
    pub id: Uuid,

    /// Identifier of the scanner that observed this advertisement.
    pub scanner_id: String,

    /// Device hardware address (upper-cased, MAC-like).
    pub address: String,

    /// Signal strength in dBm.
    pub rssi: i16,

    /// Advertised display name, if the advertisement carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Vendor-specific payloads keyed by Bluetooth SIG company identifier.
    #[serde(default, with = "manufacturer_data_wire")]
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,

    /// Service-specific payloads keyed by service UUID string.
    #[serde(default, with = "service_data_wire")]
    pub service_data: BTreeMap<String, Vec<u8>>,

    /// Advertised service UUIDs.
    #[serde(default)]
    pub service_uuids: Vec<String>,

    /// When the radio observed the advertisement.
    pub detected_at: DateTime<Utc>,

    /// When the edge accepted the advertisement for forwarding.
    pub received_at: DateTime<Utc>,
}

impl RawEvent {
    /// Payload bytes advertised under the given company identifier.
    pub fn manufacturer_payload(&self, company_id: u16) -> Option<&[u8]> {
        self.manufacturer_data.get(&company_id).map(Vec::as_slice)
    }
}

/// Best-known classification of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    /// Environmental sensor (temperature / humidity / battery).
    EnvironmentalSensor,
    /// Proximity beacon (identifier triad + derived distance).
    ProximityBeacon,
    /// Seen but never successfully decoded.
    Unknown,
}

impl DeviceType {
    /// Stable string form used in the database and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::EnvironmentalSensor => "environmental_sensor",
            DeviceType::ProximityBeacon => "proximity_beacon",
            DeviceType::Unknown => "unknown",
        }
    }

    /// Parse the stable string form; unrecognized labels map to Unknown.
    pub fn from_label(label: &str) -> DeviceType {
        match label {
            "environmental_sensor" => DeviceType::EnvironmentalSensor,
            "proximity_beacon" => DeviceType::ProximityBeacon,
            _ => DeviceType::Unknown,
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device-class-specific measurement sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Measurements {
    /// Environmental sensor reading.
    Environmental {
        temperature_c: f64,
        humidity_percent: f64,
        battery_percent: u8,
    },

    /// Proximity beacon sighting.
    Proximity {
        uuid: Uuid,
        major: u16,
        minor: u16,
        tx_power: i8,
        distance_m: f64,
    },
}

/// Structured reading extracted from one RawEvent by one decoder.
///
/// Carries the originating event's id as lineage (a value key, never a
/// live reference; the raw record's lifetime is independent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedReading {
    /// Id of the RawEvent this reading was decoded from.
    pub raw_event_id: Uuid,

    /// Device address copied from the originating event.
    pub address: String,

    /// Device classification declared by the producing decoder.
    pub device_type: DeviceType,

    /// Timestamp copied from the originating event's detection time.
    pub recorded_at: DateTime<Utc>,

    /// The decoded measurement set.
    pub measurements: Measurements,
}

/// One inventory row per unique device address.
///
/// `first_seen <= last_seen` always. `last_seen` and `event_count` move on
/// every event touching the address, even when no decoder matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Device hardware address (identity key).
    pub address: String,

    /// Best-known classification.
    pub device_type: DeviceType,

    /// Best-known display name.
    pub name: Option<String>,

    /// First time any event for this address was processed.
    pub first_seen: DateTime<Utc>,

    /// Most recent observation time (monotonic, never regresses).
    pub last_seen: DateTime<Utc>,

    /// Total events processed for this address.
    pub event_count: i64,

    /// Free-form metadata.
    pub metadata: serde_json::Value,
}

/// Wire encoding for manufacturer data: `"0x%04x"` hex company id keys
/// with base64 payload values.
pub mod manufacturer_data_wire {
    use std::collections::BTreeMap;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &BTreeMap<u16, Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded: BTreeMap<String, String> = data
            .iter()
            .map(|(company_id, payload)| {
                (format!("0x{:04x}", company_id), BASE64.encode(payload))
            })
            .collect();
        serde::Serialize::serialize(&encoded, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<u16, Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
        let mut data = BTreeMap::new();
        for (key, value) in encoded {
            let digits = key
                .strip_prefix("0x")
                .ok_or_else(|| D::Error::custom(format!("bad company id key: {}", key)))?;
            let company_id = u16::from_str_radix(digits, 16)
                .map_err(|e| D::Error::custom(format!("bad company id key {}: {}", key, e)))?;
            let payload = BASE64
                .decode(&value)
                .map_err(|e| D::Error::custom(format!("bad payload for {}: {}", key, e)))?;
            data.insert(company_id, payload);
        }
        Ok(data)
    }
}

/// Wire encoding for service data: UUID string keys with base64 payloads.
pub mod service_data_wire {
    use std::collections::BTreeMap;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &BTreeMap<String, Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded: BTreeMap<&String, String> = data
            .iter()
            .map(|(uuid, payload)| (uuid, BASE64.encode(payload)))
            .collect();
        serde::Serialize::serialize(&encoded, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
        let mut data = BTreeMap::new();
        for (uuid, value) in encoded {
            let payload = BASE64
                .decode(&value)
                .map_err(|e| D::Error::custom(format!("bad payload for {}: {}", uuid, e)))?;
            data.insert(uuid, payload);
        }
        Ok(data)
    }
}
