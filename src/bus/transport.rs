//! Transport seam between [`BusClient`](super::BusClient) and the broker
//! connection.

use super::InboundMessage;
use crate::error::BusError;
use async_trait::async_trait;

/// Receiver of transport events.
///
/// Passed into [`Transport::service`] so events are delivered straight to the
/// owner of the connection state.
pub trait EventSink: Send {
    /// The broker acknowledged the connection.
    fn on_connect(&mut self);

    /// The connection was lost or refused.
    fn on_disconnect(&mut self, reason: Option<&str>);

    /// A message arrived on a subscribed topic.
    fn on_message(&mut self, message: InboundMessage);
}

/// Publish/subscribe connection to a broker.
///
/// Implementations make progress only inside [`service`](Transport::service)
/// and must never block there.
#[async_trait]
pub trait Transport: Send {
    /// Start the first connection attempt.
    fn connect(&mut self) -> Result<(), BusError>;

    /// Start a new connection attempt after a disconnect.
    fn reconnect(&mut self) -> Result<(), BusError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), BusError>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BusError>;

    /// One non-blocking pass of I/O, delivering pending events to `sink`.
    async fn service(&mut self, sink: &mut dyn EventSink) -> Result<(), BusError>;

    /// Tear down the connection.
    async fn shutdown(&mut self);
}
