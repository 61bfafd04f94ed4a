//! Transport publish boundary
//!
//! The bus client itself is a collaborator; the scanner only needs a
//! sink it can hand serialized events to. On publish failure the event is
//! dropped and counted; the edge never buffers or retries locally.

use async_trait::async_trait;

use blip_common::Result;

/// Outbound seam to the message bus client.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one serialized payload on the named channel.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()>;
}

/// Per-scanner channel carrying serialized RawEvents.
pub fn events_channel(prefix: &str, scanner_id: &str) -> String {
    format!("{}/{}/events", prefix, scanner_id)
}

/// Per-scanner channel carrying heartbeat status messages.
pub fn status_channel(prefix: &str, scanner_id: &str) -> String {
    format!("{}/{}/status", prefix, scanner_id)
}
