//! # BLIP Common Library
//!
//! Shared code for the BLIP scanner and ingest processes including:
//! - Domain types (RawEvent, DecodedReading, DeviceRecord)
//! - Unified error type
//! - Configuration loading
//! - Observability counters
//! - SQLite schema and initialization

pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod types;

pub use error::{Error, Result};
pub use types::{DecodedReading, DeviceRecord, DeviceType, Measurements, RawEvent};
