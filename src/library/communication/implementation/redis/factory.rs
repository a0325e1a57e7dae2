use crate::library::BoxedError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use redis::aio::ConnectionLike;
use redis::{Msg, RedisResult};
use thiserror::Error;

/// Ways in which a redis connection can be provided
pub enum RedisConnectionVariant {
    /// Dedicated connection, required for blocking commands like `XREADGROUP … BLOCK`
    Owned,
    /// Handle onto a multiplexed connection, suitable for one-shot commands
    Multiplexed,
}

/// Error thrown by [`PubSubResource`] message streams
#[derive(Debug, Error)]
pub enum PubSubResourceError {
    /// Underlying connection died and the stream will yield no further messages
    #[error("pub/sub stream closed")]
    StreamClosed,
}

/// Connection in subscriber mode, locked to pub/sub commands
#[async_trait]
pub trait PubSubResource {
    /// Subscribes to an additional channel
    async fn subscribe(&mut self, channel: &str) -> RedisResult<()>;

    /// Converts the resource into a stream of incoming messages
    fn into_on_message<'a>(self) -> BoxStream<'a, Result<Msg, PubSubResourceError>>;
}

/// Provider for redis connections used by the queue and broadcast implementations
#[async_trait]
pub trait RedisFactory {
    /// Type of pub/sub resource handed out by this factory
    type PubSub: PubSubResource + Send + Sync;

    /// Type of regular connection handed out by this factory
    type Connection: ConnectionLike + Send + Sync;

    /// Creates a new connection in subscriber mode
    async fn pubsub(&self) -> Result<Self::PubSub, BoxedError>;

    /// Provides a connection of the requested variant
    async fn connection(
        &self,
        variant: RedisConnectionVariant,
    ) -> Result<Self::Connection, BoxedError>;
}
