//! Trait implementations using [`redis`](::redis)
//!
//! Topics are realised as [Redis Streams](https://redis.io/topics/streams-intro),
//! one stream per partition keyed `{topic}:{partition}`, consumed through
//! consumer groups with explicit `XACK`. The broadcast contract maps onto
//! plain redis pub/sub.

const STREAM_ID_NEW: &str = "*";
const STREAM_ID_HEAD: &str = "0";
const STREAM_ID_TAIL: &str = "$";
const STREAM_ID_ADDITIONS: &str = ">";

const FIELD_KEY: &str = "key";
const FIELD_PAYLOAD: &str = "payload";
const FIELD_HEADERS: &str = "headers";
const FIELD_TIMESTAMP: &str = "timestamp";

use thiserror::Error;

mod consumer;
mod factory;
mod producer;
mod pubsub;

pub use consumer::*;
pub use factory::*;
pub use producer::*;
pub use pubsub::*;

#[derive(Debug, Error)]
enum RedisQueueError {
    #[error("field `{0}` missing from stream entry")]
    MissingField(&'static str),
    #[error("headers field does not contain a JSON object: {0}")]
    InvalidHeaders(#[source] serde_json::Error),
    #[error("timestamp field is not RFC3339: {0}")]
    InvalidTimestamp(#[source] chrono::ParseError),
}
