//! BLIP Ingest (blip-ig) - Bus-side event processing
//!
//! Consumes RawEvents delivered by the message bus and turns them into
//! durable records: every event is archived verbatim, classified against
//! an ordered decoder registry, decoded into a structured reading when a
//! decoder matches, and reflected in the device inventory. Acknowledgment
//! is withheld until the archive outcome is known, so the bus's own
//! redelivery provides at-least-once semantics.

pub mod decoders;
pub mod inventory;
pub mod pipeline;
pub mod repo;
pub mod transport;

pub use decoders::{Decoder, DecoderRegistry};
pub use inventory::DeviceInventory;
pub use pipeline::ProcessingPipeline;
pub use repo::{EventStore, SqliteEventStore};
pub use transport::{AckHandle, Delivery};
