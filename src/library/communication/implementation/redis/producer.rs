use super::{RedisConnectionVariant, RedisFactory};
use super::{FIELD_HEADERS, FIELD_KEY, FIELD_PAYLOAD, FIELD_TIMESTAMP, STREAM_ID_NEW};
use crate::library::communication::{
    partition_for_key, BroadcastPublisher, QueueRecord, RecordProducer, TopicDescriptor,
};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use redis::streams::StreamMaxlen;
use redis::AsyncCommands;

/// Multi-purpose publisher implementation using redis
///
/// - [`RecordProducer`] implementation using [`XADD`](https://redis.io/commands/xadd)
///   onto the partition stream derived from the record key
/// - [`BroadcastPublisher`] implementation using [`PUBLISH`](https://redis.io/commands/publish)
pub struct RedisPublisher<F: RedisFactory> {
    factory: F,
    partitions: u32,
}

impl<F> RedisPublisher<F>
where
    F: RedisFactory,
{
    /// Creates a new instance with a given [`RedisFactory`] and partition count
    pub fn new(factory: F, partitions: u32) -> Self {
        Self { factory, partitions }
    }
}

/// Builds the stream key for a partition of a topic
pub(super) fn partition_stream_key(topic: &TopicDescriptor, partition: u32) -> String {
    format!("{}:{}", topic.name(), partition)
}

#[async_trait]
impl<F> RecordProducer for RedisPublisher<F>
where
    F: RedisFactory + Send + Sync,
{
    async fn produce(&self, topic: &TopicDescriptor, record: QueueRecord) -> EmptyResult {
        let partition = partition_for_key(&record.key, self.partitions);
        let stream_key = partition_stream_key(topic, partition);
        let limit = StreamMaxlen::Approx(topic.limit());

        let headers = serde_json::to_string(&record.headers)?;
        let timestamp = record.timestamp.to_rfc3339();

        let fields: [(&str, &[u8]); 4] = [
            (FIELD_KEY, record.key.as_bytes()),
            (FIELD_PAYLOAD, &record.payload),
            (FIELD_HEADERS, headers.as_bytes()),
            (FIELD_TIMESTAMP, timestamp.as_bytes()),
        ];

        let mut con = self
            .factory
            .connection(RedisConnectionVariant::Multiplexed)
            .await?;

        con.xadd_maxlen::<_, _, _, _, ()>(stream_key, limit, STREAM_ID_NEW, &fields)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl<F> BroadcastPublisher for RedisPublisher<F>
where
    F: RedisFactory + Send + Sync,
{
    async fn broadcast(&self, channel: &str, payload: &[u8]) -> Result<usize, BoxedError> {
        let mut con = self
            .factory
            .connection(RedisConnectionVariant::Multiplexed)
            .await?;

        let notified: usize = con.publish(channel, payload).await?;

        Ok(notified)
    }
}
