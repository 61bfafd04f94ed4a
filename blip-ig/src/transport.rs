//! Delivery boundary from the message bus
//!
//! The bus client is a collaborator; the pipeline only sees one RawEvent
//! per delivery plus a handle to settle it. Ack must follow the archive
//! outcome: requeue on archive failure lets the bus's redelivery apply.

use async_trait::async_trait;

use blip_common::types::RawEvent;

/// Settlement handle attached to one delivery.
#[async_trait]
pub trait AckHandle: Send {
    /// Confirm the delivery; the bus will not redeliver it.
    async fn ack(self: Box<Self>);

    /// Report the delivery as failed-and-retryable.
    async fn requeue(self: Box<Self>);
}

/// One message from the bus: the event and its settlement handle.
pub struct Delivery {
    pub event: RawEvent,
    pub handle: Box<dyn AckHandle>,
}

impl Delivery {
    pub fn new(event: RawEvent, handle: Box<dyn AckHandle>) -> Self {
        Self { event, handle }
    }
}
