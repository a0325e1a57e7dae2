use super::{
    validate_page_size, CursorPosition, MessagePage, MessageStore, PageCursor, StorageError,
    StoredMessage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// In-memory store mirroring the descending `(created_at, message_id)` order
/// of the production backend, with injectable save failures
#[derive(Clone, Default)]
pub struct MemoryMessageStore {
    conversations: Arc<Mutex<HashMap<String, Vec<StoredMessage>>>>,
    failing_saves: Arc<AtomicUsize>,
}

impl MemoryMessageStore {
    /// Creates a new, empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` save calls fail as unavailable
    pub fn fail_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// Number of rows currently held for a conversation
    pub fn row_count(&self, conversation_id: &str) -> usize {
        self.conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn sorted_rows(&self, conversation_id: &str) -> Vec<StoredMessage> {
        let mut rows = self
            .conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            (b.created_at, b.message_id).cmp(&(a.created_at, a.message_id))
        });
        rows
    }
}

impl CursorPosition {
    /// Whether a row lies strictly after this position in the descending
    /// `(created_at, message_id)` order
    fn precedes(&self, row: &StoredMessage) -> bool {
        (row.created_at, row.message_id) < (self.created_at, self.message_id)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn save_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        user: &str,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let message_id = Uuid::from_str(message_id).map_err(|e| {
            StorageError::InvalidArgument(format!("invalid message_id {:?}: {}", message_id, e))
        })?;

        let remaining = self.failing_saves.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_saves.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Unavailable("injected save failure".into()));
        }

        let row = StoredMessage {
            conversation_id: conversation_id.to_owned(),
            created_at,
            message_id,
            user: user.to_owned(),
            body: body.to_owned(),
        };

        let mut conversations = self.conversations.lock().unwrap();
        let rows = conversations.entry(conversation_id.to_owned()).or_default();

        // Overwrite on full key equality, like the production upsert
        match rows
            .iter_mut()
            .find(|r| r.created_at == created_at && r.message_id == message_id)
        {
            Some(existing) => *existing = row,
            None => rows.push(row),
        }

        Ok(())
    }

    async fn get_messages(
        &self,
        conversation_id: &str,
        page_size: usize,
        cursor: Option<PageCursor>,
    ) -> Result<MessagePage, StorageError> {
        validate_page_size(page_size)?;

        let rows = self.sorted_rows(conversation_id);

        let resumed: Vec<StoredMessage> = match cursor {
            None => rows,
            Some(cursor) => {
                let position = CursorPosition::decode(&cursor)?;
                rows.into_iter().filter(|r| position.precedes(r)).collect()
            }
        };

        let mut messages: Vec<StoredMessage> = resumed.into_iter().take(page_size + 1).collect();
        let next = if messages.len() > page_size {
            messages.truncate(page_size);
            messages.last().map(|last| {
                CursorPosition {
                    created_at: last.created_at,
                    message_id: last.message_id,
                }
                .encode()
            })
        } else {
            None
        };

        Ok(MessagePage { messages, next })
    }

    async fn refresh_messages(
        &self,
        conversation_id: &str,
        marker_message_id: &str,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let rows = self.sorted_rows(conversation_id);

        let mut newer = Vec::new();
        for row in rows {
            if row.message_id.to_string() == marker_message_id {
                break;
            }
            newer.push(row);
        }

        Ok(newer)
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    async fn seeded_store(count: usize) -> (MemoryMessageStore, Vec<Uuid>) {
        let store = MemoryMessageStore::new();
        let base = Utc::now();
        let mut ids = Vec::new();

        for i in 0..count {
            let id = Uuid::new_v4();
            store
                .save_message(
                    "c1",
                    &id.to_string(),
                    "alice",
                    &i.to_string(),
                    base + Duration::milliseconds(i as i64),
                )
                .await
                .unwrap();
            ids.push(id);
        }

        (store, ids)
    }

    #[tokio::test]
    async fn return_rows_newest_first() {
        let (store, _) = seeded_store(5).await;

        let page = store.get_messages("c1", 10, None).await.unwrap();

        let bodies: Vec<&str> = page.messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["4", "3", "2", "1", "0"]);
        assert_eq!(page.next, None);
    }

    #[tokio::test]
    async fn paginate_without_duplicates_or_gaps() {
        let (store, _) = seeded_store(25).await;

        let first = store.get_messages("c1", 10, None).await.unwrap();
        assert_eq!(first.messages.len(), 10);
        let second = store
            .get_messages("c1", 10, first.next.clone())
            .await
            .unwrap();
        assert_eq!(second.messages.len(), 10);
        let third = store.get_messages("c1", 10, second.next.clone()).await.unwrap();
        assert_eq!(third.messages.len(), 5);
        assert_eq!(third.next, None);

        let mut all: Vec<String> = Vec::new();
        for page in [&first, &second, &third] {
            all.extend(page.messages.iter().map(|m| m.message_id.to_string()));
        }

        let unique: std::collections::HashSet<&String> = all.iter().collect();
        assert_eq!(unique.len(), 25);
    }

    #[tokio::test]
    async fn refresh_strictly_newer_than_the_marker() {
        let (store, ids) = seeded_store(10).await;

        // Marker is the 7th submission, so the refresh yields 10, 9, 8
        let newer = store
            .refresh_messages("c1", &ids[6].to_string())
            .await
            .unwrap();

        let bodies: Vec<&str> = newer.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["9", "8", "7"]);
    }

    #[tokio::test]
    async fn refresh_everything_when_the_marker_is_absent() {
        let (store, _) = seeded_store(4).await;

        let newer = store
            .refresh_messages("c1", &Uuid::new_v4().to_string())
            .await
            .unwrap();

        assert_eq!(newer.len(), 4);
    }

    #[tokio::test]
    async fn reject_invalid_message_ids() {
        let store = MemoryMessageStore::new();

        let result = store
            .save_message("c1", "not-a-uuid", "alice", "hi", Utc::now())
            .await;

        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn overwrite_instead_of_duplicating_on_redelivery() {
        let store = MemoryMessageStore::new();
        let id = Uuid::new_v4();
        let at = Utc::now();

        store
            .save_message("c1", &id.to_string(), "alice", "hi", at)
            .await
            .unwrap();
        store
            .save_message("c1", &id.to_string(), "alice", "hi", at)
            .await
            .unwrap();

        assert_eq!(store.row_count("c1"), 1);
    }

    #[tokio::test]
    async fn break_created_at_ties_by_message_id() {
        let store = MemoryMessageStore::new();
        let at = Utc::now();
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);

        store
            .save_message("c1", &low.to_string(), "a", "low", at)
            .await
            .unwrap();
        store
            .save_message("c1", &high.to_string(), "a", "high", at)
            .await
            .unwrap();

        let page = store.get_messages("c1", 10, None).await.unwrap();
        let bodies: Vec<&str> = page.messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["high", "low"]);
    }
}
