//! Xiaomi environmental sensor decoder
//!
//! Decodes the temperature/humidity/battery payload advertised under
//! Xiaomi's Bluetooth SIG company identifier. Payload layout (little
//! endian): `[i16 temperature x0.1 degC][u16 humidity x0.1 %RH][u8
//! battery %]`.

use blip_common::types::{DecodedReading, DeviceType, Measurements, RawEvent};

use super::{DecodeError, Decoder};

/// Xiaomi Inc. company identifier.
pub const XIAOMI_COMPANY_ID: u16 = 0x0157;

const PAYLOAD_LEN: usize = 5;

const TEMPERATURE_MIN_C: f64 = -40.0;
const TEMPERATURE_MAX_C: f64 = 85.0;

/// Decoder for Xiaomi environmental sensors.
#[derive(Debug, Default)]
pub struct XiaomiDecoder;

impl Decoder for XiaomiDecoder {
    fn name(&self) -> &'static str {
        "xiaomi"
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::EnvironmentalSensor
    }

    fn recognizes(&self, event: &RawEvent) -> bool {
        event.manufacturer_data.contains_key(&XIAOMI_COMPANY_ID)
    }

    fn decode(&self, event: &RawEvent) -> Result<DecodedReading, DecodeError> {
        let payload = event
            .manufacturer_payload(XIAOMI_COMPANY_ID)
            .ok_or(DecodeError::NotRecognized)?;

        if payload.len() < PAYLOAD_LEN {
            return Err(DecodeError::Truncated {
                expected: PAYLOAD_LEN,
                actual: payload.len(),
            });
        }

        let temperature_c =
            i16::from_le_bytes([payload[0], payload[1]]) as f64 * 0.1;
        let humidity_percent =
            u16::from_le_bytes([payload[2], payload[3]]) as f64 * 0.1;
        let battery_percent = payload[4];

        if !(TEMPERATURE_MIN_C..=TEMPERATURE_MAX_C).contains(&temperature_c) {
            return Err(DecodeError::OutOfRange {
                field: "temperature_c",
                value: temperature_c,
            });
        }
        if humidity_percent > 100.0 {
            return Err(DecodeError::OutOfRange {
                field: "humidity_percent",
                value: humidity_percent,
            });
        }
        if battery_percent > 100 {
            return Err(DecodeError::OutOfRange {
                field: "battery_percent",
                value: battery_percent as f64,
            });
        }

        Ok(DecodedReading {
            raw_event_id: event.id,
            address: event.address.clone(),
            device_type: self.device_type(),
            recorded_at: event.detected_at,
            measurements: Measurements::Environmental {
                temperature_c,
                humidity_percent,
                battery_percent,
            },
        })
    }
}
