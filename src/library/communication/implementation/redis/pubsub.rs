use super::{PubSubResource, RedisFactory};
use crate::library::communication::{BroadcastMessage, BroadcastSubscriber};
use crate::library::BoxedError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

/// [`BroadcastSubscriber`] implementation using redis pub/sub
///
/// Each subscription owns a dedicated connection in subscriber mode whose
/// lifetime equals the lifetime of the returned stream.
pub struct RedisBroadcast<F: RedisFactory> {
    factory: F,
}

impl<F: RedisFactory> RedisBroadcast<F> {
    /// Creates a new instance with a given [`RedisFactory`]
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl<F> BroadcastSubscriber for RedisBroadcast<F>
where
    F: RedisFactory + Send + Sync,
    F::PubSub: 'static,
{
    async fn subscribe(
        &self,
        channels: &[String],
    ) -> Result<BoxStream<'static, Result<BroadcastMessage, BoxedError>>, BoxedError> {
        let mut pubsub = self.factory.pubsub().await?;

        for channel in channels {
            pubsub.subscribe(channel).await?;
        }

        let stream = pubsub
            .into_on_message()
            .map(|message| {
                let message = message?;

                Ok(BroadcastMessage {
                    channel: message.get_channel_name().to_owned(),
                    payload: message.get_payload_bytes().to_vec(),
                })
            })
            .boxed();

        Ok(stream)
    }
}
