use super::{QueueRecord, RecordProducer, TopicDescriptor, RETRY_AT_HEADER};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Deadline granted to a handler for a single record
pub const DEFAULT_RECORD_DEADLINE: Duration = Duration::from_secs(300);

/// Location within the queue
#[derive(Clone)]
pub enum QueueLocation {
    /// Start of the queue (not necessarily the first record as a queue is limited in length)
    Head,
    /// End of the queue (exclusive of the last record)
    Tail,
}

/// Definition of a consumer group
///
/// All consumers sharing a group identifier collectively process the record
/// stream of a topic where each record is assigned to exactly one of them.
/// When the group is first created, it starts processing records from the
/// provided [`QueueLocation`].
#[derive(Clone)]
pub struct ConsumerGroupDescriptor {
    identifier: String,
    start: QueueLocation,
}

impl ConsumerGroupDescriptor {
    /// Creates a new instance from raw parts
    pub fn new(identifier: String, start: QueueLocation) -> Self {
        Self { identifier, start }
    }

    /// Unique identifier of the group
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Location from where a consumer group begins to consume records
    ///
    /// Note that it is not guaranteed that this will be honored (e.g. when the group already exists)!
    pub fn start(&self) -> &QueueLocation {
        &self.start
    }
}

/// Entry retrieved from a topic partition providing the record and a commit handle
#[async_trait]
pub trait RecordEntry {
    /// Record carried by the entry
    fn record(&self) -> &QueueRecord;

    /// Marks the entry as processed so it is never delivered to the group again
    ///
    /// Implementations run on a fresh context: a shutdown arriving while the
    /// handler was still executing must not prevent the commit of an outcome
    /// that has already been determined.
    async fn commit(&mut self) -> EmptyResult;
}

/// Allows consumption of partitioned topics using consumer groups
#[async_trait]
pub trait RecordStreamProvider {
    /// Type of [`RecordEntry`] returned by the provider
    type Entry: RecordEntry + Send + Sync;

    /// Subscribes to a topic, joining the specified group with the given
    /// consumer name or creating it if it does not exist
    ///
    /// Returns one ordered stream per partition. Previously delivered but
    /// uncommitted entries are replayed before new ones.
    async fn streams(
        &self,
        topic: &TopicDescriptor,
        group: &ConsumerGroupDescriptor,
        consumer: &str,
    ) -> Result<Vec<BoxStream<'static, Result<Self::Entry, BoxedError>>>, BoxedError>;
}

/// Classification of a processed record
///
/// A handler signals an unexpected failure by returning `Err(_)` instead:
/// the record is then neither committed nor republished and will be delivered
/// again. `Retry` and `DeadLetter` optionally carry the error that led to the
/// classification; the side-topic republish happens either way.
#[derive(Debug)]
pub enum Disposition {
    /// Record has been fully processed (or deliberately skipped)
    Success,
    /// Record should be reprocessed later via the retry topic
    Retry(Option<BoxedError>),
    /// Record is given up on and parked on the dead-letter topic
    DeadLetter(Option<BoxedError>),
}

/// Context handed to a handler for a single record
#[derive(Debug, Clone)]
pub struct RecordContext {
    /// Identifier correlating all log and metric emissions for this record
    pub correlation_id: Uuid,
    /// Topic the record was fetched from
    pub topic: String,
    /// Partition the record was fetched from
    pub partition: u32,
}

/// Entity which may process records fetched from a topic
#[async_trait]
pub trait RecordHandler: Send + Sync {
    /// Processes a single record and classifies the outcome
    async fn handle(
        &self,
        context: &RecordContext,
        record: &QueueRecord,
    ) -> Result<Disposition, BoxedError>;
}

/// Wraps a [`RecordHandler`], usually to observe or enrich its invocation
///
/// Middlewares are installed right-to-left: the first middleware in a list
/// becomes the outermost wrapper.
pub trait ConsumerMiddleware: Send + Sync {
    /// Wraps the next handler in the chain for the given topic
    fn install(&self, topic: &str, next: Arc<dyn RecordHandler>) -> Arc<dyn RecordHandler>;
}

/// Fetch-process-commit state machine over every partition of a topic
///
/// Each partition is driven serially: the next fetch does not start before
/// the previous entry has been committed (or republished and committed).
/// Partitions make progress independently of each other.
pub struct ConsumerLoop<P, R> {
    provider: P,
    producer: R,
    topic: TopicDescriptor,
    group: ConsumerGroupDescriptor,
    consumer: String,
    deadline: Duration,
    shutdown: CancellationToken,
}

impl<P, R> ConsumerLoop<P, R>
where
    P: RecordStreamProvider,
    R: RecordProducer + Send + Sync,
{
    /// Creates a new loop with the default per-record deadline
    pub fn new(
        provider: P,
        producer: R,
        topic: TopicDescriptor,
        group: ConsumerGroupDescriptor,
        consumer: String,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            producer,
            topic,
            group,
            consumer,
            deadline: DEFAULT_RECORD_DEADLINE,
            shutdown,
        }
    }

    /// Overrides the per-record deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Consumes the topic until the shutdown token fires or every partition stream ends
    ///
    /// The handler is wrapped by the given middlewares right-to-left, so the
    /// first middleware observes the invocation outermost.
    pub async fn run(
        &self,
        handler: Arc<dyn RecordHandler>,
        middlewares: &[&dyn ConsumerMiddleware],
    ) -> EmptyResult {
        let mut chained = handler;
        for middleware in middlewares.iter().rev() {
            chained = middleware.install(self.topic.name(), chained);
        }

        info!(topic = self.topic.name(), group = self.group.identifier(), "consumer listening");

        let streams = self
            .provider
            .streams(&self.topic, &self.group, &self.consumer)
            .await?;

        let workers = streams
            .into_iter()
            .enumerate()
            .map(|(partition, stream)| self.drive_partition(partition as u32, stream, chained.clone()));

        futures::future::join_all(workers).await;

        Ok(())
    }

    async fn drive_partition(
        &self,
        partition: u32,
        mut stream: BoxStream<'static, Result<P::Entry, BoxedError>>,
        handler: Arc<dyn RecordHandler>,
    ) {
        loop {
            let fetched = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(topic = self.topic.name(), partition, "consumer shutting down");
                    return;
                }
                entry = stream.next() => entry,
            };

            let mut entry = match fetched {
                None => return,
                Some(Ok(entry)) => entry,
                Some(Err(error)) => {
                    error!(?error, partition, "failed to fetch record");
                    continue;
                }
            };

            let context = RecordContext {
                correlation_id: Uuid::new_v4(),
                topic: self.topic.name().to_owned(),
                partition,
            };

            let verdict = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    // In-flight outcome is discarded, the record stays uncommitted
                    // and is delivered again after the next start.
                    return;
                }
                verdict = timeout(self.deadline, handler.handle(&context, entry.record())) => verdict,
            };

            // From here on shutdown is no longer observed: an outcome that has
            // been determined is followed through, including its commit.
            match verdict {
                Err(_) => {
                    error!(
                        correlation_id = %context.correlation_id,
                        partition,
                        "record deadline exceeded, not committing"
                    );
                }
                Ok(Err(error)) => {
                    error!(correlation_id = %context.correlation_id, ?error, "handler execution failed");
                }
                Ok(Ok(Disposition::Success)) => {
                    self.commit(&mut entry, &context).await;
                }
                Ok(Ok(Disposition::Retry(cause))) => {
                    if let Some(error) = cause {
                        warn!(correlation_id = %context.correlation_id, ?error, "record heading to retry topic");
                    }

                    if self.republish(self.topic.retry(), entry.record()).await {
                        self.commit(&mut entry, &context).await;
                    }
                }
                Ok(Ok(Disposition::DeadLetter(cause))) => {
                    if let Some(error) = cause {
                        warn!(correlation_id = %context.correlation_id, ?error, "record heading to dead-letter topic");
                    }

                    if self.republish(self.topic.dead_letter(), entry.record()).await {
                        self.commit(&mut entry, &context).await;
                    }
                }
            }
        }
    }

    async fn republish(&self, side_topic: TopicDescriptor, record: &QueueRecord) -> bool {
        let mut record = record.clone();
        record
            .headers
            .insert(RETRY_AT_HEADER.to_owned(), Utc::now().to_rfc3339());

        match self.producer.produce(&side_topic, record).await {
            Ok(()) => true,
            Err(error) => {
                // Not committed: the record will be fetched again.
                error!(?error, topic = side_topic.name(), "side-topic produce failed");
                false
            }
        }
    }

    async fn commit(&self, entry: &mut P::Entry, context: &RecordContext) {
        if let Err(error) = entry.commit().await {
            warn!(correlation_id = %context.correlation_id, ?error, "commit failed");
        }
    }
}
