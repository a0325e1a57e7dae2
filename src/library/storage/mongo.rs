//! Production [`MessageStore`] backend on mongodb
//!
//! Rows live in a single collection indexed by
//! `(conversation_id asc, created_at desc, message_id desc)` so conversation
//! scans walk the index in order. Writes upsert on the full key, making
//! redeliveries of the same record overwrite their own row.

use super::{
    validate_page_size, CursorPosition, MessagePage, MessageStore, PageCursor, StorageError,
    StoredMessage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::{
    Acknowledgment, CollectionOptions, FindOptions, ReadConcern, ReplaceOptions, WriteConcern,
};
use mongodb::{Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Persisted shape of a [`StoredMessage`]
#[derive(Debug, Serialize, Deserialize)]
struct MessageDocument {
    conversation_id: String,
    created_at: mongodb::bson::DateTime,
    message_id: mongodb::bson::Uuid,
    user: String,
    body: String,
}

impl From<MessageDocument> for StoredMessage {
    fn from(document: MessageDocument) -> Self {
        Self {
            conversation_id: document.conversation_id,
            created_at: document.created_at.to_chrono(),
            message_id: document.message_id.into(),
            user: document.user,
            body: document.body,
        }
    }
}

/// [`MessageStore`] implementation backed by a mongodb collection
pub struct MongoMessageStore {
    collection: Collection<MessageDocument>,
}

impl MongoMessageStore {
    /// Opens the message collection with majority read/write concerns and
    /// ensures the scan index exists
    pub async fn initialize(
        database: &Database,
        collection_name: &str,
    ) -> Result<Self, StorageError> {
        let options = CollectionOptions::builder()
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .read_concern(ReadConcern::majority())
            .build();

        let collection = database.collection_with_options(collection_name, options);

        let index = IndexModel::builder()
            .keys(doc! { "conversation_id": 1, "created_at": -1, "message_id": -1 })
            .build();

        collection
            .create_index(index, None)
            .await
            .map_err(|e| StorageError::Unavailable(Box::new(e)))?;

        Ok(Self { collection })
    }
}

#[async_trait]
impl MessageStore for MongoMessageStore {
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

        let document = MessageDocument {
            conversation_id: conversation_id.to_owned(),
            created_at: created_at.into(),
            message_id: message_id.into(),
            user: user.to_owned(),
            body: body.to_owned(),
        };

        let filter = doc! {
            "conversation_id": conversation_id,
            "created_at": document.created_at,
            "message_id": document.message_id,
        };

        self.collection
            .replace_one(
                filter,
                document,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await
            .map_err(|e| StorageError::Unavailable(Box::new(e)))?;

        Ok(())
    }

    async fn get_messages(
        &self,
        conversation_id: &str,
        page_size: usize,
        cursor: Option<PageCursor>,
    ) -> Result<MessagePage, StorageError> {
        validate_page_size(page_size)?;

        let filter = match cursor {
            None => doc! { "conversation_id": conversation_id },
            Some(cursor) => {
                let position = CursorPosition::decode(&cursor)?;
                let created_at = mongodb::bson::DateTime::from_chrono(position.created_at);
                let message_id = mongodb::bson::Uuid::from(position.message_id);

                doc! {
                    "conversation_id": conversation_id,
                    "$or": [
                        { "created_at": { "$lt": created_at } },
                        { "created_at": created_at, "message_id": { "$lt": message_id } },
                    ],
                }
            }
        };

        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1, "message_id": -1 })
            .limit((page_size + 1) as i64)
            .build();

        let documents: Vec<MessageDocument> = self
            .collection
            .find(filter, options)
            .await
            .map_err(|e| StorageError::Unavailable(Box::new(e)))?
            .try_collect()
            .await
            .map_err(|e| StorageError::Unavailable(Box::new(e)))?;

        let mut messages: Vec<StoredMessage> =
            documents.into_iter().map(StoredMessage::from).collect();

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
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1, "message_id": -1 })
            .build();

        let mut cursor = self
            .collection
            .find(doc! { "conversation_id": conversation_id }, options)
            .await
            .map_err(|e| StorageError::Unavailable(Box::new(e)))?;

        let mut newer = Vec::new();
        while let Some(document) = cursor
            .try_next()
            .await
            .map_err(|e| StorageError::Unavailable(Box::new(e)))?
        {
            let row = StoredMessage::from(document);
            if row.message_id.to_string() == marker_message_id {
                break;
            }
            newer.push(row);
        }

        Ok(newer)
    }
}
