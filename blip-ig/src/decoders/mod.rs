//! Decoder registry and vendor payload decoders
//!
//! Each decoder recognizes and decodes one device family's vendor
//! payload. The registry holds them as an explicit ordered list built at
//! startup and read-only afterwards: `classify` returns the first decoder
//! whose recognizer matches, so more specific recognizers must be
//! registered before more general ones. The registry does not attempt
//! conflict detection between overlapping recognizers.
//!
//! Adding a device family = new file in this module + one registration
//! line at startup.

pub mod ibeacon;
pub mod xiaomi;

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use blip_common::types::{DecodedReading, DeviceType, RawEvent};

/// Decode failure. Expected and frequent: logged, counted, and treated
/// as "no reading produced", never a pipeline abort.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload shorter than the family's frame requires.
    #[error("payload truncated: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// A decoded value failed range validation.
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    /// The expected vendor key or frame marker is missing.
    #[error("payload not recognized by this decoder")]
    NotRecognized,

    /// Decode exceeded the per-call timeout.
    #[error("decode timed out")]
    Timeout,
}

/// Registry construction failure. Fatal at startup, never at runtime.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("decoder '{0}' registered twice")]
    DuplicateName(String),
}

/// One device family's recognizer + decoder. Pure function over one
/// RawEvent; decoders never see or mutate each other's state.
pub trait Decoder: Send + Sync {
    /// Unique decoder name, used in logs and duplicate detection.
    fn name(&self) -> &'static str;

    /// Classification recorded on the device when this decoder produces
    /// a reading.
    fn device_type(&self) -> DeviceType;

    /// Cheap predicate: does this event carry this family's payload?
    fn recognizes(&self, event: &RawEvent) -> bool;

    /// Extract a structured reading. Called only when `recognizes`
    /// returned true, but must still validate the payload.
    fn decode(&self, event: &RawEvent) -> Result<DecodedReading, DecodeError>;
}

/// Ordered, first-match-wins decoder registry.
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: Vec<Arc<dyn Decoder>>,
    names: HashSet<&'static str>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an explicit registration list, preserving
    /// order.
    pub fn with_decoders(
        decoders: Vec<Arc<dyn Decoder>>,
    ) -> Result<DecoderRegistry, RegistryError> {
        let mut registry = DecoderRegistry::new();
        for decoder in decoders {
            registry.register(decoder)?;
        }
        Ok(registry)
    }

    /// Register a decoder. A duplicate name is a configuration error,
    /// reported here rather than silently overwritten.
    pub fn register(&mut self, decoder: Arc<dyn Decoder>) -> Result<(), RegistryError> {
        let name = decoder.name();
        if !self.names.insert(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        self.decoders.push(decoder);
        Ok(())
    }

    /// First registered decoder whose recognizer matches, or None.
    /// No match is a normal terminal state, not an error.
    pub fn classify(&self, event: &RawEvent) -> Option<Arc<dyn Decoder>> {
        self.decoders
            .iter()
            .find(|decoder| decoder.recognizes(event))
            .map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

// ============================================================================
// Mock decoder for testing
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
