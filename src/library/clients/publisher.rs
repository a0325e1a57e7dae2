use super::execute_json;
use crate::library::BoxedError;
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Request};
use serde::{Deserialize, Serialize};

/// Capability to hand a notification to the live fan-out
///
/// Swappable so the write-and-fanout stage can be exercised without a
/// publisher service.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publishes a notification and returns how many subscribers it reached
    async fn notify(
        &self,
        channel: &str,
        notification_type: &str,
        payload: &str,
    ) -> Result<i64, BoxedError>;
}

/// Request body of the publisher's send endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendNotificationRequest {
    /// Broadcast channel to publish on
    pub channel: String,
    /// Type label of the notification
    #[serde(rename = "type")]
    pub notification_type: String,
    /// Payload forwarded verbatim to all subscribers
    pub payload: String,
}

/// Response of the publisher's send endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendNotificationResponse {
    /// Number of subscribers the payload reached
    pub notified: i64,
}

/// Client for the publisher service
pub struct PublisherClient {
    host: String,
    client: Client<HttpConnector>,
}

impl PublisherClient {
    /// Creates a new instance talking to the given host
    pub fn new(host: String) -> Self {
        Self {
            host,
            client: Client::new(),
        }
    }

    /// Publishes a notification and returns how many subscribers it reached
    pub async fn send_notification(
        &self,
        channel: &str,
        notification_type: &str,
        payload: &str,
    ) -> Result<SendNotificationResponse, BoxedError> {
        let body = serde_json::to_vec(&SendNotificationRequest {
            channel: channel.to_owned(),
            notification_type: notification_type.to_owned(),
            payload: payload.to_owned(),
        })?;

        let request = Request::post(format!("{}/api/v1/send", self.host))
            .header("Content-Type", "application/json")
            .body(Body::from(body))?;

        execute_json(&self.client, request).await
    }
}

#[async_trait]
impl Notifier for PublisherClient {
    async fn notify(
        &self,
        channel: &str,
        notification_type: &str,
        payload: &str,
    ) -> Result<i64, BoxedError> {
        let response = self
            .send_notification(channel, notification_type, payload)
            .await?;

        Ok(response.notified)
    }
}
