use crate::constants::DEFAULT_PAGE_SIZE;
use crate::library::clients::{ChatQueueClient, GetMessagesProps, QueryClient};
use crate::library::communication::RecordProducer;
use crate::library::http::{error_response, json_response, query_param, Responder};
use crate::library::storage::MAX_PAGE_SIZE;
use async_trait::async_trait;
use futures::Future;
use hyper::http::{request::Parts, Method, Response, StatusCode};
use hyper::{body, Body};
use serde::Deserialize;
use std::convert::Infallible;
use std::net::IpAddr;
use tracing::{error, warn};

#[derive(Debug, Deserialize)]
struct MessageRequest {
    conversation_id: String,
    user: String,
    body: String,
}

/// Responder serving the public message API
///
/// Submissions are enqueued directly, history reads are proxied to the
/// query service after argument validation.
pub struct MessageApiResponder<P> {
    queue_client: ChatQueueClient<P>,
    query_client: QueryClient,
}

impl<P> MessageApiResponder<P>
where
    P: RecordProducer + Send + Sync,
{
    /// Creates a new instance from raw parts
    pub fn new(queue_client: ChatQueueClient<P>, query_client: QueryClient) -> Self {
        Self {
            queue_client,
            query_client,
        }
    }

    async fn send_message(&self, request_body: Body) -> Response<Body> {
        let bytes = match body::to_bytes(request_body).await {
            Ok(bytes) => bytes,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid request"),
        };

        let request: MessageRequest = match serde_json::from_slice(&bytes) {
            Ok(request) => request,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid request"),
        };

        if request.conversation_id.is_empty() || request.user.is_empty() || request.body.is_empty()
        {
            return error_response(
                StatusCode::BAD_REQUEST,
                "conversation_id, user and body required",
            );
        }

        match self
            .queue_client
            .send_chat_message(&request.conversation_id, &request.user, &request.body)
            .await
        {
            Ok(message_id) => json_response(
                StatusCode::OK,
                &serde_json::json!({ "status": "queued", "message_id": message_id }),
            ),
            Err(error) => {
                error!(?error, "failed to enqueue message");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to enqueue message")
            }
        }
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

        let props = GetMessagesProps {
            page_size: Some(page_size),
            next_token: query_param(query, "next_token"),
        };

        match self.query_client.get_messages(&conversation_id, props).await {
            Ok(response) => json_response(StatusCode::OK, &response),
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

        let message_id = match query_param(query, "message_id") {
            Some(message_id) if !message_id.is_empty() => message_id,
            _ => return error_response(StatusCode::BAD_REQUEST, "Invalid message_id"),
        };

        match self
            .query_client
            .refresh_messages(&conversation_id, &message_id)
            .await
        {
            Ok(response) => json_response(StatusCode::OK, &response),
            Err(error) => {
                warn!(?error, "refresh read failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch messages")
            }
        }
    }
}

#[async_trait]
impl<P> Responder for MessageApiResponder<P>
where
    P: RecordProducer + Send + Sync,
{
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
            (&Method::POST, "/api/v1/messages") => Ok(self.send_message(request_body).await),
            (&Method::GET, "/api/v1/messages") => Ok(self.get_messages(query).await),
            (&Method::GET, "/api/v1/messages/refresh") => Ok(self.refresh_messages(query).await),
            _ => next(parts, request_body, client_ip).await,
        }
    }
}
