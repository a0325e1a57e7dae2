use super::{QueueRecord, TopicDescriptor};
use crate::library::EmptyResult;
use async_trait::async_trait;

/// Structure which allows publishing of records onto a topic
///
/// Implementations block until the backend has durably acknowledged the
/// record and have to preserve the partition assignment derived from the
/// record key so that equal keys retain their relative order. Headers and
/// timestamp are passed through verbatim.
#[async_trait]
pub trait RecordProducer {
    /// Appends a record to the given topic
    async fn produce(&self, topic: &TopicDescriptor, record: QueueRecord) -> EmptyResult;
}
