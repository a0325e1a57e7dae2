use crate::library::clients::{SendNotificationRequest, SendNotificationResponse};
use crate::library::communication::BroadcastPublisher;
use crate::library::http::{error_response, json_response, Responder};
use async_trait::async_trait;
use futures::Future;
use hyper::http::{request::Parts, Method, Response, StatusCode};
use hyper::{body, Body};
use std::convert::Infallible;
use std::net::IpAddr;
use tracing::warn;

/// Responder publishing notifications onto their broadcast channel
pub struct SendResponder<B> {
    broadcast: B,
}

impl<B> SendResponder<B>
where
    B: BroadcastPublisher + Send + Sync,
{
    /// Creates a new instance publishing through the given backend
    pub fn new(broadcast: B) -> Self {
        Self { broadcast }
    }

    async fn send(&self, request_body: Body) -> Response<Body> {
        let bytes = match body::to_bytes(request_body).await {
            Ok(bytes) => bytes,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid request"),
        };

        let request: SendNotificationRequest = match serde_json::from_slice(&bytes) {
            Ok(request) => request,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid request"),
        };

        match self
            .broadcast
            .broadcast(&request.channel, request.payload.as_bytes())
            .await
        {
            Ok(notified) => json_response(
                StatusCode::OK,
                &SendNotificationResponse {
                    notified: notified as i64,
                },
            ),
            Err(error) => {
                warn!(?error, channel = %request.channel, "notification publish failed");
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to publish notification",
                )
            }
        }
    }
}

#[async_trait]
impl<B> Responder for SendResponder<B>
where
    B: BroadcastPublisher + Send + Sync,
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
        match (&parts.method, parts.uri.path()) {
            (&Method::POST, "/api/v1/send") => Ok(self.send(request_body).await),
            _ => next(parts, request_body, client_ip).await,
        }
    }
}
