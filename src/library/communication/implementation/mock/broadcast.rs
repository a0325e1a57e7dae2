use crate::library::communication::{BroadcastMessage, BroadcastPublisher, BroadcastSubscriber};
use crate::library::BoxedError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// In-memory broadcast channel mirroring the live-only pub/sub contract
///
/// Subscribers only observe payloads published while their stream is alive;
/// [`broadcast`](BroadcastPublisher::broadcast) reports how many it reached.
#[derive(Clone, Default)]
pub struct MemoryBroadcast {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<BroadcastMessage>>>>,
}

impl MemoryBroadcast {
    /// Creates a new instance without any subscriptions
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<BroadcastMessage> {
        self.channels
            .lock()
            .unwrap()
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl BroadcastPublisher for MemoryBroadcast {
    async fn broadcast(&self, channel: &str, payload: &[u8]) -> Result<usize, BoxedError> {
        let message = BroadcastMessage {
            channel: channel.to_owned(),
            payload: payload.to_vec(),
        };

        // A send error just means nobody is listening right now
        Ok(self.sender(channel).send(message).unwrap_or(0))
    }
}

#[async_trait]
impl BroadcastSubscriber for MemoryBroadcast {
    async fn subscribe(
        &self,
        channels: &[String],
    ) -> Result<BoxStream<'static, Result<BroadcastMessage, BoxedError>>, BoxedError> {
        let streams: Vec<_> = channels
            .iter()
            .map(|channel| {
                let receiver = self.sender(channel).subscribe();

                stream::unfold(receiver, |mut receiver| async move {
                    match receiver.recv().await {
                        Ok(message) => Some((Ok(message), receiver)),
                        Err(broadcast::error::RecvError::Closed) => None,
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            Some((Err("subscriber lagged behind".into()), receiver))
                        }
                    }
                })
                .boxed()
            })
            .collect();

        Ok(stream::select_all(streams).boxed())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn count_reached_subscribers() {
        let pubsub = MemoryBroadcast::new();

        assert_eq!(pubsub.broadcast("conversation:c1", b"hi").await.unwrap(), 0);

        let _first = pubsub.subscribe(&["conversation:c1".into()]).await.unwrap();
        let _second = pubsub.subscribe(&["conversation:c1".into()]).await.unwrap();

        assert_eq!(pubsub.broadcast("conversation:c1", b"hi").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn deliver_only_while_subscribed() {
        let pubsub = MemoryBroadcast::new();

        pubsub.broadcast("conversation:c1", b"before").await.unwrap();

        let mut stream = pubsub.subscribe(&["conversation:c1".into()]).await.unwrap();
        pubsub.broadcast("conversation:c1", b"during").await.unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.payload, b"during");
        assert_eq!(received.channel, "conversation:c1");
    }

    #[tokio::test]
    async fn fan_out_to_all_channels_of_a_subscription() {
        let pubsub = MemoryBroadcast::new();

        let mut stream = pubsub
            .subscribe(&["conversation:c1".into(), "conversation:c2".into()])
            .await
            .unwrap();

        pubsub.broadcast("conversation:c2", b"there").await.unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.channel, "conversation:c2");
    }
}
