//! Clients other services use to talk to each other
//!
//! HTTP clients impose a 10-second deadline on every call; the queue client
//! wraps a [`RecordProducer`](crate::library::communication::RecordProducer)
//! and blocks until the record is acknowledged.

mod publisher;
mod query;
mod worker;

pub use publisher::*;
pub use query::*;
pub use worker::*;

use crate::library::BoxedError;
use hyper::body;
use hyper::{Body, Request, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::timeout;

const CLIENT_DEADLINE: Duration = Duration::from_secs(10);

async fn execute_json<T: DeserializeOwned>(
    client: &hyper::Client<hyper::client::HttpConnector>,
    request: Request<Body>,
) -> Result<T, BoxedError> {
    let response: Response<Body> = timeout(CLIENT_DEADLINE, client.request(request)).await??;

    if !response.status().is_success() {
        return Err(format!("unexpected status {}", response.status()).into());
    }

    let bytes = timeout(CLIENT_DEADLINE, body::to_bytes(response.into_body())).await??;

    Ok(serde_json::from_slice(&bytes)?)
}
