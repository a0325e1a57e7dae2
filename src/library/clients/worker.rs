use crate::domain::{ChatMessage, MESSAGE_ID_HEADER};
use crate::library::communication::{QueueRecord, RecordProducer, TopicDescriptor};
use crate::library::BoxedError;
use chrono::Utc;
use uuid::Uuid;

/// Client enqueueing chat messages for the worker fleet
///
/// Assigns the message id before the record is produced so callers can use it
/// for "refresh since" reads even while the message is still in flight.
pub struct ChatQueueClient<P> {
    topic: TopicDescriptor,
    producer: P,
}

impl<P> ChatQueueClient<P>
where
    P: RecordProducer,
{
    /// Creates a new instance producing onto the given topic
    pub fn new(topic: TopicDescriptor, producer: P) -> Self {
        Self { topic, producer }
    }

    /// Enqueues a chat message and returns its assigned identifier
    ///
    /// The producer call is synchronous: when it fails, no identifier is
    /// handed out because the message never entered the pipeline.
    pub async fn send_chat_message(
        &self,
        conversation_id: &str,
        user: &str,
        message: &str,
    ) -> Result<String, BoxedError> {
        let message_id = Uuid::new_v4().to_string();

        let payload = serde_json::to_vec(&ChatMessage {
            user: user.to_owned(),
            message: message.to_owned(),
        })?;

        // The key carries the conversation id and guarantees per-conversation ordering
        let mut record = QueueRecord::new(conversation_id.to_owned(), payload);
        record
            .headers
            .insert(MESSAGE_ID_HEADER.to_owned(), message_id.clone());
        record.timestamp = Utc::now();

        self.producer.produce(&self.topic, record).await?;

        Ok(message_id)
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::implementation::mock::MemoryBus;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn topic() -> TopicDescriptor {
        TopicDescriptor::new("messages".into(), 64)
    }

    #[tokio::test]
    async fn key_records_by_conversation() {
        let bus = MemoryBus::new(2);
        let client = ChatQueueClient::new(topic(), bus.clone());

        let message_id = client.send_chat_message("c1", "alice", "hi").await.unwrap();

        let produced = bus.produced(&topic());
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].key, "c1");
        assert_eq!(
            produced[0].header(MESSAGE_ID_HEADER),
            Some(message_id.as_str())
        );
        assert!(Uuid::from_str(&message_id).is_ok());

        let payload: ChatMessage = serde_json::from_slice(&produced[0].payload).unwrap();
        assert_eq!(payload.user, "alice");
        assert_eq!(payload.message, "hi");
    }

    #[tokio::test]
    async fn withhold_the_identifier_when_the_enqueue_fails() {
        let bus = MemoryBus::new(2);
        bus.fail_next_produce();
        let client = ChatQueueClient::new(topic(), bus.clone());

        let result = client.send_chat_message("c1", "alice", "hi").await;

        assert!(result.is_err());
        assert!(bus.produced(&topic()).is_empty());
    }
}
