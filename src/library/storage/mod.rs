//! Durable, per-conversation message log with paginated access
//!
//! The store is an append-only log partitioned by conversation. Scans run in
//! descending `(created_at, message_id)` order and resume through an opaque
//! [`PageCursor`]. Writes are idempotent on the full
//! `(conversation_id, created_at, message_id)` key so at-least-once delivery
//! upstream collapses into effectively-once persistence.

#[cfg(test)]
mod memory;
pub mod mongo;

#[cfg(test)]
pub use memory::MemoryMessageStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Upper bound (exclusive) accepted for a page size
pub const MAX_PAGE_SIZE: usize = 1_000_000;

/// Row of the per-conversation message log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Conversation the message belongs to
    pub conversation_id: String,
    /// Wall-clock time assigned at ingress, stable across redeliveries
    pub created_at: DateTime<Utc>,
    /// Identifier assigned at ingress, unique within the conversation
    pub message_id: Uuid,
    /// Author of the message
    pub user: String,
    /// Message text
    pub body: String,
}

/// Opaque continuation token produced by a page scan
///
/// Tokens are not portable across conversations and make no stability promise
/// across store restarts; clients treat them as short-lived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor(Vec<u8>);

impl PageCursor {
    /// Wraps raw cursor bytes received over the wire
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw bytes for transport encoding
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Single page of a descending conversation scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePage {
    /// Rows of the page, newest first
    pub messages: Vec<StoredMessage>,
    /// Cursor resuming the scan, absent once the scan is exhausted
    pub next: Option<PageCursor>,
}

/// Error thrown by [`MessageStore`] operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Caller passed an argument violating the contract
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Backend could not serve the request
    #[error("storage unavailable")]
    Unavailable(#[source] crate::library::BoxedError),
}

/// Append-only per-conversation message log
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Appends a message row
    ///
    /// `message_id` has to be a UUID, anything else signals
    /// [`InvalidArgument`](StorageError::InvalidArgument). Re-writing an
    /// existing `(conversation_id, created_at, message_id)` key is a no-op
    /// overwrite, not a duplicate.
    async fn save_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        user: &str,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Scans a conversation newest-first, bounded by `page_size`
    ///
    /// `page_size` has to lie in `[1, 1_000_000)`. A returned page without a
    /// cursor means the scan is exhausted.
    async fn get_messages(
        &self,
        conversation_id: &str,
        page_size: usize,
        cursor: Option<PageCursor>,
    ) -> Result<MessagePage, StorageError>;

    /// Scans a conversation newest-first, accumulating rows up to but not
    /// including the first row whose `message_id` equals the marker
    ///
    /// If the marker is never encountered the full scan is returned.
    async fn refresh_messages(
        &self,
        conversation_id: &str,
        marker_message_id: &str,
    ) -> Result<Vec<StoredMessage>, StorageError>;
}

pub(crate) fn validate_page_size(page_size: usize) -> Result<(), StorageError> {
    if page_size == 0 || page_size >= MAX_PAGE_SIZE {
        return Err(StorageError::InvalidArgument(format!(
            "page_size {} outside of [1, {})",
            page_size, MAX_PAGE_SIZE
        )));
    }

    Ok(())
}

/// Position of the last row of a page, serialized into a [`PageCursor`]
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CursorPosition {
    pub created_at: DateTime<Utc>,
    pub message_id: Uuid,
}

impl CursorPosition {
    pub(crate) fn encode(&self) -> PageCursor {
        // Serializing a plain struct of valid fields cannot fail
        PageCursor(serde_json::to_vec(self).expect("cursor serialization"))
    }

    pub(crate) fn decode(cursor: &PageCursor) -> Result<Self, StorageError> {
        serde_json::from_slice(cursor.as_bytes())
            .map_err(|e| StorageError::InvalidArgument(format!("undecodable page cursor: {}", e)))
    }
}
