use crate::constants::DEFAULT_PAGE_SIZE;
use crate::library::clients::{GetMessagesResponse, RefreshMessagesResponse};
use crate::library::http::{error_response, json_response, query_param, Responder};
use crate::library::storage::{MessageStore, PageCursor, StorageError, MAX_PAGE_SIZE};
use async_trait::async_trait;
use futures::Future;
use hyper::http::{request::Parts, Method, Response, StatusCode};
use hyper::Body;
use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::warn;

/// Responder serving authoritative history reads straight from the store
pub struct HistoryResponder {
    store: Arc<dyn MessageStore>,
}

impl HistoryResponder {
    /// Creates a new instance reading from the given store
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    async fn get_messages(&self, query: Option<&str>) -> Response<Body> {
        let conversation_id = match query_param(query, "conversation_id") {
            Some(conversation_id) => conversation_id,
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "conversation_id query param required",
                )
            }
        };

        let page_size = match query_param(query, "page_size") {
            None => DEFAULT_PAGE_SIZE,
            Some(raw) => match raw.parse::<usize>() {
                Ok(parsed) if parsed > 0 && parsed < MAX_PAGE_SIZE => parsed,
                _ => return error_response(StatusCode::BAD_REQUEST, "Invalid page_size"),
            },
        };

        let cursor = match query_param(query, "next_token") {
            None => None,
            Some(token) if token.is_empty() => None,
            Some(token) => match base64::decode(&token) {
                Ok(bytes) => Some(PageCursor::from_bytes(bytes)),
                Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid next_token"),
            },
        };

        match self
            .store
            .get_messages(&conversation_id, page_size, cursor)
            .await
        {
            Ok(page) => {
                let next_token = page
                    .next
                    .map(|cursor| base64::encode(cursor.as_bytes()))
                    .unwrap_or_default();

                json_response(
                    StatusCode::OK,
                    &GetMessagesResponse {
                        messages: page.messages,
                        next_token,
                    },
                )
            }
            Err(StorageError::InvalidArgument(_)) => {
                error_response(StatusCode::BAD_REQUEST, "Invalid next_token")
            }
            Err(error) => {
                warn!(?error, "history read failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch messages")
            }
        }
    }

    async fn refresh_messages(&self, query: Option<&str>) -> Response<Body> {
        let conversation_id = match query_param(query, "conversation_id") {
            Some(conversation_id) => conversation_id,
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "conversation_id query param required",
                )
            }
        };

        // An absent marker yields the full scan
        let marker = query_param(query, "message_id").unwrap_or_default();

        match self.store.refresh_messages(&conversation_id, &marker).await {
            Ok(messages) => json_response(StatusCode::OK, &RefreshMessagesResponse { messages }),
            Err(error) => {
                warn!(?error, "refresh read failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch messages")
            }
        }
    }
}

#[async_trait]
impl Responder for HistoryResponder {
    async fn respond<F, Fut>(
        &self,
        parts: Parts,
        request_body: Body,
        client_ip: IpAddr,
        next: F,
    ) -> Result<Response<Body>, Infallible>
    where
        Fut: Future<Output = Result<Response<Body>, Infallible>> + Send,
        F: FnOnce(Parts, Body, IpAddr) -> Fut + Send,
    {
        let path = parts.uri.path();
        let query = parts.uri.query();

        match (&parts.method, path) {
            (&Method::GET, "/api/v1/messages") => Ok(self.get_messages(query).await),
            (&Method::GET, "/api/v1/messages/refresh") => Ok(self.refresh_messages(query).await),
            _ => next(parts, request_body, client_ip).await,
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::storage::MemoryMessageStore;
    use chrono::{Duration, Utc};
    use hyper::body;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    async fn seeded_responder(count: usize) -> (HistoryResponder, Vec<Uuid>) {
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

        (HistoryResponder::new(Arc::new(store)), ids)
    }

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn page_through_a_conversation_with_opaque_tokens() {
        let (responder, _) = seeded_responder(25).await;

        let mut token = String::new();
        let mut sizes = Vec::new();
        let mut seen = std::collections::HashSet::new();

        loop {
            let query = format!("conversation_id=c1&page_size=10&next_token={}", token);
            let response = responder.get_messages(Some(&query)).await;
            assert_eq!(response.status(), StatusCode::OK);

            let json = body_json(response).await;
            let messages = json["Messages"].as_array().unwrap();
            sizes.push(messages.len());
            for message in messages {
                assert!(seen.insert(message["message_id"].as_str().unwrap().to_owned()));
            }

            token = json["NextToken"].as_str().unwrap().to_owned();
            if token.is_empty() {
                break;
            }
            // The wire token is base64
            assert!(base64::decode(&token).is_ok());
        }

        assert_eq!(sizes, [10, 10, 5]);
        assert_eq!(seen.len(), 25);
    }

    #[tokio::test]
    async fn default_the_page_size() {
        let (responder, _) = seeded_responder(15).await;

        let response = responder.get_messages(Some("conversation_id=c1")).await;
        let json = body_json(response).await;

        assert_eq!(json["Messages"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn reject_undecodable_tokens() {
        let (responder, _) = seeded_responder(3).await;

        let response = responder
            .get_messages(Some("conversation_id=c1&next_token=%25%25"))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Invalid next_token");
    }

    #[tokio::test]
    async fn reject_garbage_cursors_inside_valid_base64() {
        let (responder, _) = seeded_responder(3).await;

        let token = base64::encode(b"not a cursor");
        let query = format!("conversation_id=c1&next_token={}", token);
        let response = responder.get_messages(Some(&query)).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn refresh_since_a_marker() {
        let (responder, ids) = seeded_responder(10).await;

        let query = format!("conversation_id=c1&message_id={}", ids[6]);
        let response = responder.refresh_messages(Some(&query)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        let bodies: Vec<&str> = json["Messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["body"].as_str().unwrap())
            .collect();

        assert_eq!(bodies, ["9", "8", "7"]);
    }

    #[tokio::test]
    async fn refresh_the_full_scan_without_a_marker() {
        let (responder, _) = seeded_responder(4).await;

        let response = responder
            .refresh_messages(Some("conversation_id=c1"))
            .await;

        let json = body_json(response).await;
        assert_eq!(json["Messages"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn serialize_rows_with_wire_field_names() {
        let (responder, ids) = seeded_responder(1).await;

        let response = responder
            .get_messages(Some("conversation_id=c1&page_size=1"))
            .await;
        let json = body_json(response).await;
        let row = &json["Messages"][0];

        assert_eq!(row["conversation_id"], "c1");
        assert_eq!(row["message_id"], ids[0].to_string());
        assert_eq!(row["user"], "alice");
        assert_eq!(row["body"], "0");
        assert!(row["created_at"].as_str().is_some());
    }
}
