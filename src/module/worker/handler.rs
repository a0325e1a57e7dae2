use crate::domain::{conversation_channel, ChatMessage, MESSAGE_ID_HEADER, NOTIFICATION_TYPE_MESSAGE};
use crate::library::clients::Notifier;
use crate::library::communication::{Disposition, QueueRecord, RecordContext, RecordHandler};
use crate::library::storage::MessageStore;
use crate::library::BoxedError;
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

/// Persists each chat message and fans it out to live subscribers
///
/// The notification is published strictly after the store write succeeded.
/// When the publish fails the whole record is retried, so the store has to
/// swallow the resulting duplicate write. It does, because the record
/// timestamp keeps the row key stable across deliveries.
pub struct WriteAndFanoutHandler<S, N> {
    store: S,
    notifier: N,
}

impl<S, N> WriteAndFanoutHandler<S, N>
where
    S: MessageStore,
    N: Notifier,
{
    /// Creates a new instance from raw parts
    pub fn new(store: S, notifier: N) -> Self {
        Self { store, notifier }
    }
}

#[async_trait]
impl<S, N> RecordHandler for WriteAndFanoutHandler<S, N>
where
    S: MessageStore,
    N: Notifier,
{
    async fn handle(
        &self,
        _context: &RecordContext,
        record: &QueueRecord,
    ) -> Result<Disposition, BoxedError> {
        let conversation_id = &record.key;

        let chat: ChatMessage = match serde_json::from_slice(&record.payload) {
            Ok(chat) => chat,
            Err(error) => {
                // A malformed record must not block its partition
                info!(?error, "failed to decode chat payload, skipping forever");
                return Ok(Disposition::Success);
            }
        };

        // Ingress always supplies the header, synthesising one is a safety net
        let message_id = match record.header(MESSAGE_ID_HEADER) {
            Some(message_id) => message_id.to_owned(),
            None => Uuid::new_v4().to_string(),
        };

        if let Err(error) = self
            .store
            .save_message(
                conversation_id,
                &message_id,
                &chat.user,
                &chat.message,
                record.timestamp,
            )
            .await
        {
            return Ok(Disposition::Retry(Some(error.into())));
        }

        debug!("sending notification");
        let payload = String::from_utf8_lossy(&record.payload);
        if let Err(error) = self
            .notifier
            .notify(
                &conversation_channel(conversation_id),
                NOTIFICATION_TYPE_MESSAGE,
                &payload,
            )
            .await
        {
            return Ok(Disposition::Retry(Some(error)));
        }

        Ok(Disposition::Success)
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::storage::MemoryMessageStore;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingNotifier {
        notifications: Mutex<Vec<(String, String, String)>>,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl Notifier for Arc<RecordingNotifier> {
        async fn notify(
            &self,
            channel: &str,
            notification_type: &str,
            payload: &str,
        ) -> Result<i64, BoxedError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err("injected publish failure".into());
            }

            self.notifications.lock().unwrap().push((
                channel.to_owned(),
                notification_type.to_owned(),
                payload.to_owned(),
            ));

            Ok(1)
        }
    }

    fn context() -> RecordContext {
        RecordContext {
            correlation_id: Uuid::new_v4(),
            topic: "messages".into(),
            partition: 0,
        }
    }

    fn chat_record(conversation_id: &str, message_id: Option<&str>) -> QueueRecord {
        let mut headers = BTreeMap::new();
        if let Some(message_id) = message_id {
            headers.insert(MESSAGE_ID_HEADER.to_owned(), message_id.to_owned());
        }

        QueueRecord {
            key: conversation_id.to_owned(),
            payload: br#"{"user":"alice","message":"hi"}"#.to_vec(),
            headers,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn persist_then_notify() {
        let store = MemoryMessageStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = WriteAndFanoutHandler::new(store.clone(), notifier.clone());

        let message_id = Uuid::new_v4().to_string();
        let record = chat_record("c1", Some(&message_id));

        let disposition = handler.handle(&context(), &record).await.unwrap();

        assert!(matches!(disposition, Disposition::Success));
        assert_eq!(store.row_count("c1"), 1);

        let notifications = notifier.notifications.lock().unwrap();
        assert_eq!(
            notifications.as_slice(),
            [(
                "conversation:c1".to_owned(),
                "Message".to_owned(),
                r#"{"user":"alice","message":"hi"}"#.to_owned()
            )]
        );
    }

    #[tokio::test]
    async fn skip_undecodable_payloads_forever() {
        let store = MemoryMessageStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = WriteAndFanoutHandler::new(store.clone(), notifier.clone());

        let mut record = chat_record("c1", None);
        record.payload = b"not json".to_vec();

        let disposition = handler.handle(&context(), &record).await.unwrap();

        assert!(matches!(disposition, Disposition::Success));
        assert_eq!(store.row_count("c1"), 0);
        assert!(notifier.notifications.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retry_when_the_store_is_unavailable() {
        let store = MemoryMessageStore::new();
        store.fail_saves(1);
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = WriteAndFanoutHandler::new(store.clone(), notifier.clone());

        let record = chat_record("c1", Some(&Uuid::new_v4().to_string()));
        let disposition = handler.handle(&context(), &record).await.unwrap();

        assert!(matches!(disposition, Disposition::Retry(Some(_))));
        // The publish never happened: store first, fan out second
        assert!(notifier.notifications.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retry_when_the_publish_fails_without_duplicating_the_row() {
        let store = MemoryMessageStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.fail_next.store(true, Ordering::SeqCst);
        let handler = WriteAndFanoutHandler::new(store.clone(), notifier.clone());

        let record = chat_record("c1", Some(&Uuid::new_v4().to_string()));

        let first = handler.handle(&context(), &record).await.unwrap();
        assert!(matches!(first, Disposition::Retry(Some(_))));
        assert_eq!(store.row_count("c1"), 1);

        // Redelivery with the unchanged record overwrites the same row
        let second = handler.handle(&context(), &record).await.unwrap();
        assert!(matches!(second, Disposition::Success));
        assert_eq!(store.row_count("c1"), 1);
        assert_eq!(notifier.notifications.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn synthesise_a_message_id_when_the_header_is_absent() {
        let store = MemoryMessageStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = WriteAndFanoutHandler::new(store.clone(), notifier.clone());

        let record = chat_record("c1", None);
        let disposition = handler.handle(&context(), &record).await.unwrap();

        assert!(matches!(disposition, Disposition::Success));
        assert_eq!(store.row_count("c1"), 1);
    }
}
