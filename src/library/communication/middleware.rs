use super::{ConsumerMiddleware, Disposition, QueueRecord, RecordContext, RecordHandler};
use crate::library::BoxedError;
use async_trait::async_trait;
use metrics::{histogram, increment_counter};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info_span, Instrument};

/// Middleware which opens a per-record span carrying the correlation id
///
/// Every log line emitted by inner middlewares and the handler is nested
/// inside the span and therefore tagged with the correlation id, topic,
/// partition and record key.
pub struct LoggingMiddleware {
    environment: String,
}

impl LoggingMiddleware {
    /// Creates a new instance tagging spans with the given environment name
    pub fn new(environment: String) -> Self {
        Self { environment }
    }
}

struct LoggingHandler {
    environment: String,
    topic: String,
    next: Arc<dyn RecordHandler>,
}

impl ConsumerMiddleware for LoggingMiddleware {
    fn install(&self, topic: &str, next: Arc<dyn RecordHandler>) -> Arc<dyn RecordHandler> {
        Arc::new(LoggingHandler {
            environment: self.environment.clone(),
            topic: topic.to_owned(),
            next,
        })
    }
}

#[async_trait]
impl RecordHandler for LoggingHandler {
    async fn handle(
        &self,
        context: &RecordContext,
        record: &QueueRecord,
    ) -> Result<Disposition, BoxedError> {
        let span = info_span!(
            "record",
            correlation_id = %context.correlation_id,
            environment = %self.environment,
            topic = %self.topic,
            partition = context.partition,
            key = %record.key,
        );

        let result = self.next.handle(context, record).instrument(span.clone()).await;

        let _entered = span.enter();
        match &result {
            Ok(disposition) => tracing::info!(?disposition, "record processed"),
            Err(error) => tracing::error!(?error, "record processing failed"),
        }

        result
    }
}

/// Middleware which records handler duration and outcome metrics
pub struct TimingMiddleware;

struct TimingHandler {
    topic: String,
    next: Arc<dyn RecordHandler>,
}

impl ConsumerMiddleware for TimingMiddleware {
    fn install(&self, topic: &str, next: Arc<dyn RecordHandler>) -> Arc<dyn RecordHandler> {
        Arc::new(TimingHandler {
            topic: topic.to_owned(),
            next,
        })
    }
}

#[async_trait]
impl RecordHandler for TimingHandler {
    async fn handle(
        &self,
        context: &RecordContext,
        record: &QueueRecord,
    ) -> Result<Disposition, BoxedError> {
        let start = Instant::now();
        let result = self.next.handle(context, record).await;

        let outcome = match &result {
            Ok(Disposition::Success) => "success",
            Ok(Disposition::Retry(_)) => "retry",
            Ok(Disposition::DeadLetter(_)) => "dead_letter",
            Err(_) => "error",
        };

        histogram!(
            "queue_handler_duration_seconds",
            start.elapsed().as_secs_f64(),
            "topic" => self.topic.clone(),
            "outcome" => outcome,
        );
        increment_counter!(
            "queue_handler_records_total",
            "topic" => self.topic.clone(),
            "outcome" => outcome,
        );

        result
    }
}
