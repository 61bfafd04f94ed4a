//! BLIP Scanner (blip-sc) - Edge-side event admission
//!
//! Runs inside the scanner process, inline with the BLE scan callback.
//! Decides per advertisement whether to forward it onto the message bus:
//! denylist rules first, then time-windowed duplicate suppression over a
//! bounded in-memory cache. Never blocks the scan loop and never buffers
//! events toward the bus (publish failures are dropped and counted).

pub mod admission;
pub mod app;
pub mod denylist;
pub mod source;
pub mod transport;

pub use admission::{AdmissionFilter, Decision, DropReason};
pub use app::ScannerApp;
pub use denylist::Denylist;
