use crate::library::BoxedError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Payload received through a [`BroadcastSubscriber`] subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    /// Channel the payload was published on
    pub channel: String,
    /// Payload bytes, copied verbatim from the publisher
    pub payload: Vec<u8>,
}

/// Structure which allows publishing payloads to an ephemeral broadcast channel
///
/// Only subscribers that are live at the time of publishing receive the
/// payload; there is no replay.
#[async_trait]
pub trait BroadcastPublisher {
    /// Publishes a payload to the given channel and returns the number of
    /// subscribers it reached
    async fn broadcast(&self, channel: &str, payload: &[u8]) -> Result<usize, BoxedError>;
}

/// Structure which allows subscribing to broadcast channels
#[async_trait]
pub trait BroadcastSubscriber {
    /// Subscribes to all given channels at once
    ///
    /// The returned stream yields payloads published while the subscription is
    /// live. Dropping the stream releases all associated resources.
    async fn subscribe(
        &self,
        channels: &[String],
    ) -> Result<BoxStream<'static, Result<BroadcastMessage, BoxedError>>, BoxedError>;
}
