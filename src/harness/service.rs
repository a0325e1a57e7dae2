use super::RedisBusFactory;
use crate::library::communication::{
    ConsumerGroupDescriptor, ConsumerLoop, LoggingMiddleware, RecordHandler, TimingMiddleware,
    TopicDescriptor,
};
use crate::library::EmptyResult;
use async_trait::async_trait;
use jatsl::{Job, JobManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Job driving a [`ConsumerLoop`] with the standard middleware stack
///
/// The loop's shutdown token is tied to the job's termination signal so the
/// scheduler can drain the consumer gracefully: blocked fetches return, an
/// in-flight handler is abandoned uncommitted, but an already-determined
/// outcome is still committed.
pub struct ConsumerRunner {
    redis_url: String,
    partitions: u32,
    topic: TopicDescriptor,
    group: ConsumerGroupDescriptor,
    consumer: String,
    environment: String,
    handler: Arc<dyn RecordHandler>,
}

impl ConsumerRunner {
    /// Creates a new runner job which will connect to the given redis server
    /// and consume with the provided group and consumer name
    pub fn new(
        redis_url: String,
        partitions: u32,
        topic: TopicDescriptor,
        group: ConsumerGroupDescriptor,
        consumer: String,
        environment: String,
        handler: Arc<dyn RecordHandler>,
    ) -> Self {
        Self {
            redis_url,
            partitions,
            topic,
            group,
            consumer,
            environment,
            handler,
        }
    }
}

#[async_trait]
impl Job for ConsumerRunner {
    const NAME: &'static str = module_path!();
    const SUPPORTS_GRACEFUL_TERMINATION: bool = true;

    fn name(&self) -> String {
        format!("{}({})", Self::NAME, self.topic.name())
    }

    async fn execute(&self, manager: JobManager) -> EmptyResult {
        let handle_provider = Arc::new(manager.clone());
        let factory = RedisBusFactory::new(self.redis_url.clone(), self.partitions, handle_provider);

        let shutdown = CancellationToken::new();
        let consumer = ConsumerLoop::new(
            factory.stream_provider(),
            factory.producer(),
            self.topic.clone(),
            self.group.clone(),
            self.consumer.clone(),
            shutdown.clone(),
        );

        let watchdog_manager = manager.clone();
        let trigger = shutdown.clone();
        let watchdog = tokio::spawn(async move {
            watchdog_manager.termination_signal().await;
            trigger.cancel();
        });

        manager.ready().await;

        let logging = LoggingMiddleware::new(self.environment.clone());
        let timing = TimingMiddleware;
        let result = consumer.run(self.handler.clone(), &[&logging, &timing]).await;

        watchdog.abort();

        result
    }
}
