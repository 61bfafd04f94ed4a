//! iBeacon proximity decoder
//!
//! Decodes Apple iBeacon frames: `0x02 0x15` marker, 16-byte proximity
//! UUID, big-endian major and minor, and calibrated TX power at 1m as a
//! signed byte. Distance is estimated from the RSSI with the
//! log-distance path loss model.

use uuid::Uuid;

use blip_common::types::{DecodedReading, DeviceType, Measurements, RawEvent};

use super::{DecodeError, Decoder};

/// Apple Inc. company identifier.
pub const APPLE_COMPANY_ID: u16 = 0x004c;

/// iBeacon subtype marker bytes.
const FRAME_MARKER: [u8; 2] = [0x02, 0x15];

/// Marker + UUID + major + minor + tx_power.
const FRAME_LEN: usize = 23;

/// Path loss exponent for free-space propagation.
const PATH_LOSS_EXPONENT: f64 = 2.0;

/// Distance estimates beyond this are noise, not signal.
const MAX_DISTANCE_M: f64 = 100.0;

/// Decoder for Apple iBeacon proximity frames.
#[derive(Debug, Default)]
pub struct IBeaconDecoder;

impl IBeaconDecoder {
    /// Log-distance path loss estimate in meters, clamped to
    /// [0, MAX_DISTANCE_M].
    fn estimate_distance(tx_power: i8, rssi: i16) -> f64 {
        let exponent =
            (tx_power as f64 - rssi as f64) / (10.0 * PATH_LOSS_EXPONENT);
        10f64.powf(exponent).clamp(0.0, MAX_DISTANCE_M)
    }
}

impl Decoder for IBeaconDecoder {
    fn name(&self) -> &'static str {
        "ibeacon"
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::ProximityBeacon
    }

    fn recognizes(&self, event: &RawEvent) -> bool {
        event
            .manufacturer_payload(APPLE_COMPANY_ID)
            .map(|payload| payload.len() >= 2 && payload[0..2] == FRAME_MARKER)
            .unwrap_or(false)
    }

    fn decode(&self, event: &RawEvent) -> Result<DecodedReading, DecodeError> {
        let payload = event
            .manufacturer_payload(APPLE_COMPANY_ID)
            .ok_or(DecodeError::NotRecognized)?;

        if payload.len() < 2 || payload[0..2] != FRAME_MARKER {
            return Err(DecodeError::NotRecognized);
        }
        if payload.len() < FRAME_LEN {
            return Err(DecodeError::Truncated {
                expected: FRAME_LEN,
                actual: payload.len(),
            });
        }

        let uuid = Uuid::from_slice(&payload[2..18])
            .map_err(|_| DecodeError::NotRecognized)?;
        let major = u16::from_be_bytes([payload[18], payload[19]]);
        let minor = u16::from_be_bytes([payload[20], payload[21]]);
        let tx_power = payload[22] as i8;

        let distance_m = Self::estimate_distance(tx_power, event.rssi);

        Ok(DecodedReading {
            raw_event_id: event.id,
            address: event.address.clone(),
            device_type: self.device_type(),
            recorded_at: event.detected_at,
            measurements: Measurements::Proximity {
                uuid,
                major,
                minor,
                tx_power,
                distance_m,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    const BEACON_UUID: &str = "f7826da6-4fa2-4e98-8024-bc5b71e0893e";

    fn beacon_payload(major: u16, minor: u16, tx_power: i8) -> Vec<u8> {
        let mut payload = vec![0x02, 0x15];
        payload.extend_from_slice(
            Uuid::parse_str(BEACON_UUID).unwrap().as_bytes(),
        );
        payload.extend_from_slice(&major.to_be_bytes());
        payload.extend_from_slice(&minor.to_be_bytes());
        payload.push(tx_power as u8);
        payload
    }

    fn event_with_payload(payload: Vec<u8>, rssi: i16) -> RawEvent {
        let mut manufacturer_data = BTreeMap::new();
        manufacturer_data.insert(APPLE_COMPANY_ID, payload);
        RawEvent {
            id: Uuid::new_v4(),
            scanner_id: "scanner-01".to_string(),
            address: "D0:03:4B:77:88:99".to_string(),
            rssi,
            name: None,
            manufacturer_data,
            service_data: BTreeMap::new(),
            service_uuids: Vec::new(),
            detected_at: Utc::now(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_decode_well_formed_frame() {
        let event = event_with_payload(beacon_payload(101, 7, -59), -59);
        let decoder = IBeaconDecoder;

        assert!(decoder.recognizes(&event));
        let reading = decoder.decode(&event).unwrap();
        assert_eq!(reading.device_type, DeviceType::ProximityBeacon);
        match reading.measurements {
            Measurements::Proximity {
                uuid,
                major,
                minor,
                tx_power,
                distance_m,
            } => {
                assert_eq!(uuid, Uuid::parse_str(BEACON_UUID).unwrap());
                assert_eq!(major, 101);
                assert_eq!(minor, 7);
                assert_eq!(tx_power, -59);
                // RSSI equal to calibrated power = 1 meter
                assert!((distance_m - 1.0).abs() < 1e-9);
            }
            other => panic!("unexpected measurements: {:?}", other),
        }
    }

    #[test]
    fn test_distance_grows_with_path_loss() {
        // 20 dB below calibrated power = 10m with exponent 2
        let event = event_with_payload(beacon_payload(1, 1, -59), -79);
        let reading = IBeaconDecoder.decode(&event).unwrap();
        match reading.measurements {
            Measurements::Proximity { distance_m, .. } => {
                assert!((distance_m - 10.0).abs() < 1e-9);
            }
            other => panic!("unexpected measurements: {:?}", other),
        }
    }

    #[test]
    fn test_distance_is_clamped() {
        let event = event_with_payload(beacon_payload(1, 1, -40), -120);
        let reading = IBeaconDecoder.decode(&event).unwrap();
        match reading.measurements {
            Measurements::Proximity { distance_m, .. } => {
                assert_eq!(distance_m, MAX_DISTANCE_M);
            }
            other => panic!("unexpected measurements: {:?}", other),
        }
    }

    #[test]
    fn test_wrong_marker_not_recognized() {
        let mut payload = beacon_payload(1, 1, -59);
        payload[1] = 0x16;
        let event = event_with_payload(payload, -60);
        assert!(!IBeaconDecoder.recognizes(&event));
        assert!(matches!(
            IBeaconDecoder.decode(&event),
            Err(DecodeError::NotRecognized)
        ));
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let mut payload = beacon_payload(1, 1, -59);
        payload.truncate(20);
        let event = event_with_payload(payload, -60);
        // Marker is intact so the recognizer matches, decode catches it
        assert!(IBeaconDecoder.recognizes(&event));
        let err = IBeaconDecoder.decode(&event).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { expected: 23, actual: 20 }));
    }
}
