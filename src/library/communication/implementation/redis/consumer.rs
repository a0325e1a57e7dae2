use super::producer::partition_stream_key;
use super::{RedisConnectionVariant, RedisFactory, RedisQueueError};
use super::{
    FIELD_HEADERS, FIELD_KEY, FIELD_PAYLOAD, FIELD_TIMESTAMP, STREAM_ID_ADDITIONS, STREAM_ID_HEAD,
    STREAM_ID_TAIL,
};
use crate::library::communication::{
    ConsumerGroupDescriptor, QueueLocation, QueueRecord, RecordEntry, RecordHeaders,
    RecordStreamProvider, TopicDescriptor,
};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use redis::aio::ConnectionLike;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisResult};
use std::convert::TryInto;
use std::time::Duration;
use tracing::error;

const DEFAULT_BATCH_SIZE: usize = 10;

/// Redis based implementation of the [`RecordEntry`] trait
pub struct RedisRecordEntry<C> {
    con: C,
    id: String,
    stream_key: String,
    group: String,
    record: QueueRecord,
}

impl<C> RedisRecordEntry<C>
where
    C: ConnectionLike + Send + Sync,
{
    pub(super) fn new(
        con: C,
        entry: StreamId,
        stream_key: String,
        group: String,
    ) -> Result<Self, RedisQueueError> {
        let record = parse_record(&entry)?;

        Ok(Self {
            con,
            id: entry.id,
            stream_key,
            group,
            record,
        })
    }
}

fn parse_record(entry: &StreamId) -> Result<QueueRecord, RedisQueueError> {
    let key: String = entry
        .get(FIELD_KEY)
        .ok_or(RedisQueueError::MissingField(FIELD_KEY))?;
    let payload: Vec<u8> = entry
        .get(FIELD_PAYLOAD)
        .ok_or(RedisQueueError::MissingField(FIELD_PAYLOAD))?;
    let raw_headers: String = entry
        .get(FIELD_HEADERS)
        .ok_or(RedisQueueError::MissingField(FIELD_HEADERS))?;
    let raw_timestamp: String = entry
        .get(FIELD_TIMESTAMP)
        .ok_or(RedisQueueError::MissingField(FIELD_TIMESTAMP))?;

    let headers: RecordHeaders =
        serde_json::from_str(&raw_headers).map_err(RedisQueueError::InvalidHeaders)?;
    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&raw_timestamp)
        .map_err(RedisQueueError::InvalidTimestamp)?
        .with_timezone(&Utc);

    Ok(QueueRecord {
        key,
        payload,
        headers,
        timestamp,
    })
}

#[async_trait]
impl<C> RecordEntry for RedisRecordEntry<C>
where
    C: ConnectionLike + Send + Sync,
{
    fn record(&self) -> &QueueRecord {
        &self.record
    }

    async fn commit(&mut self) -> EmptyResult {
        self.con
            .xack::<_, _, _, ()>(&self.stream_key, &self.group, &[&self.id])
            .await?;

        Ok(())
    }
}

/// Stream provider implementation using Redis Streams
///
/// Each partition of a topic is a separate stream consumed with
/// `XREADGROUP`. A freshly started consumer first works through its pending
/// entries (delivered but never acknowledged, e.g. due to a crash) before
/// switching over to new entries.
pub struct RedisStreamProvider<F: RedisFactory + Send + Sync> {
    factory: F,
    partitions: u32,
    idle_timeout: Option<Duration>,
}

impl<F: RedisFactory + Send + Sync> RedisStreamProvider<F> {
    /// Creates a new instance with a given [`RedisFactory`] and partition count
    pub fn new(factory: F, partitions: u32) -> Self {
        Self {
            factory,
            partitions,
            idle_timeout: None,
        }
    }

    /// Bails out of the blocking read when no record arrived within the timeout
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }
}

#[async_trait]
impl<F> RecordStreamProvider for RedisStreamProvider<F>
where
    F: RedisFactory + Send + Sync + Clone + 'static,
    F::Connection: 'static,
{
    type Entry = RedisRecordEntry<F::Connection>;

    async fn streams(
        &self,
        topic: &TopicDescriptor,
        group: &ConsumerGroupDescriptor,
        consumer: &str,
    ) -> Result<Vec<BoxStream<'static, Result<Self::Entry, BoxedError>>>, BoxedError> {
        let block_duration = self
            .idle_timeout
            .map(|d| d.as_millis().try_into().unwrap_or_default())
            .unwrap_or_default();

        let mut streams = Vec::with_capacity(self.partitions as usize);

        for partition in 0..self.partitions {
            let stream_key = partition_stream_key(topic, partition);

            // Dedicated connection for the blocking XREADGROUP command
            let mut con = self
                .factory
                .connection(RedisConnectionVariant::Owned)
                .await?;

            // Create the group if it does not exist
            create_consumer_group(&mut con, &stream_key, group).await;

            let read_options = StreamReadOptions::default()
                .group(group.identifier(), consumer)
                .count(DEFAULT_BATCH_SIZE)
                .block(block_duration);

            let entry_stream = xread_stream(con, read_options, stream_key.clone());

            // Auxiliary stream handing out connections used to acknowledge entries
            let ack_con_stream = multiplexed_connection_stream(self.factory.clone());

            let stream = entry_stream
                .zip(ack_con_stream)
                .map(build_record_entry(stream_key, group))
                .boxed();

            streams.push(stream);
        }

        Ok(streams)
    }
}

fn build_record_entry<C: ConnectionLike + Send + Sync>(
    stream_key: String,
    group: &ConsumerGroupDescriptor,
) -> impl Fn((RedisResult<StreamId>, Result<C, BoxedError>)) -> Result<RedisRecordEntry<C>, BoxedError>
{
    let group = group.identifier().to_owned();

    move |(entry, con)| {
        let entry = entry?;
        let ack_con = con?;
        let entry = RedisRecordEntry::new(ack_con, entry, stream_key.clone(), group.clone())?;

        Ok(entry)
    }
}

async fn create_consumer_group<C: ConnectionLike + Send>(
    con: &mut C,
    stream_key: &str,
    group: &ConsumerGroupDescriptor,
) {
    let start_id = match group.start() {
        QueueLocation::Head => STREAM_ID_HEAD,
        QueueLocation::Tail => STREAM_ID_TAIL,
    };

    con.xgroup_create_mkstream::<_, _, _, ()>(stream_key, group.identifier(), start_id)
        .await
        .ok();
}

fn multiplexed_connection_stream<F>(
    factory: F,
) -> BoxStream<'static, Result<F::Connection, BoxedError>>
where
    F: RedisFactory + Send + Sync + Clone + 'static,
{
    stream::repeat_with(move || {
        let factory = factory.clone();
        async move {
            factory
                .connection(RedisConnectionVariant::Multiplexed)
                .await
        }
    })
    .then(|f| f)
    .boxed()
}

fn xread_stream<C: ConnectionLike + Send + Sync + 'static>(
    con: C,
    options: StreamReadOptions,
    stream_key: String,
) -> BoxStream<'static, RedisResult<StreamId>> {
    let initial_id: String = STREAM_ID_HEAD.to_string();

    let stream = stream::unfold((con, options, initial_id), move |(mut con, options, id)| {
        let stream_key = stream_key.clone();

        async move {
            let result = con
                .xread_options::<_, _, StreamReadReply>(&[&stream_key], &[&id], &options)
                .await;

            match result {
                Ok(mut reply) => {
                    if let Some(stream) = reply.keys.pop() {
                        // If we are already operating on "latest" then continue doing so
                        if id == STREAM_ID_ADDITIONS {
                            Some((Ok(stream.ids), (con, options, id)))
                        }
                        // If we are processing pending entries after a crash and have more, run through them
                        else if let Some(next_id) =
                            stream.ids.last().map(|entry| entry.id.to_owned())
                        {
                            Some((Ok(stream.ids), (con, options, next_id)))
                        }
                        // If we have finished processing pending entries after a crash, move to "latest"
                        else {
                            Some((
                                Ok(stream.ids),
                                (con, options, STREAM_ID_ADDITIONS.to_string()),
                            ))
                        }
                    } else {
                        None
                    }
                }
                Err(e) => {
                    error!("Encountered error reading from redis stream {:?}", e);
                    None
                }
            }
        }
    });

    // Entries may arrive in batches, the resulting stream still yields
    // one at a time to make it easier to use.
    stream
        .flat_map(|result| match result {
            Ok(batch) => stream::iter(batch).map(Ok).boxed(),
            Err(e) => stream::once(async { Err(e) }).boxed(),
        })
        .boxed()
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use redis::Value;
    use std::collections::HashMap;

    fn entry_with(fields: Vec<(&str, &str)>) -> StreamId {
        let map: HashMap<String, Value> = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::Data(v.as_bytes().to_vec())))
            .collect();

        StreamId {
            id: "0-1".into(),
            map,
        }
    }

    #[test]
    fn parse_complete_entries() {
        let entry = entry_with(vec![
            (FIELD_KEY, "c1"),
            (FIELD_PAYLOAD, r#"{"user":"a","message":"hi"}"#),
            (FIELD_HEADERS, r#"{"message_id":"m-1"}"#),
            (FIELD_TIMESTAMP, "2024-05-01T12:00:00+00:00"),
        ]);

        let record = parse_record(&entry).unwrap();

        assert_eq!(record.key, "c1");
        assert_eq!(record.header("message_id"), Some("m-1"));
        assert_eq!(record.timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn reject_entries_without_payload() {
        let entry = entry_with(vec![
            (FIELD_KEY, "c1"),
            (FIELD_HEADERS, "{}"),
            (FIELD_TIMESTAMP, "2024-05-01T12:00:00+00:00"),
        ]);

        assert!(matches!(
            parse_record(&entry),
            Err(RedisQueueError::MissingField(FIELD_PAYLOAD))
        ));
    }

    #[test]
    fn reject_entries_with_malformed_timestamp() {
        let entry = entry_with(vec![
            (FIELD_KEY, "c1"),
            (FIELD_PAYLOAD, "x"),
            (FIELD_HEADERS, "{}"),
            (FIELD_TIMESTAMP, "yesterday"),
        ]);

        assert!(matches!(
            parse_record(&entry),
            Err(RedisQueueError::InvalidTimestamp(_))
        ));
    }
}
