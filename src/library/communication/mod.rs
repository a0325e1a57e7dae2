//! Structures for communication between services in a distributed system
//!
//! Two modes of operation are provided:
//!
//! 1. A partitioned, ordered, at-least-once record queue ([`RecordProducer`],
//!    [`ConsumerLoop`]) used to hand work between services in a reliable and
//!    resilient way. Records are stored in a log-like data structure and
//!    consumed through [consumer groups](ConsumerGroupDescriptor): each record
//!    is assigned to exactly one consumer within a group and has to be
//!    committed once processing concludes. A consumer that crashes resumes
//!    from the last committed record so no entry is left unprocessed.
//!    Records with equal [keys](QueueRecord::key) share a partition and are
//!    processed one at a time, in order.
//!
//! 2. An ephemeral broadcast ([`BroadcastPublisher`], [`BroadcastSubscriber`])
//!    where subscribers only receive payloads published while they are
//!    subscribed. There is no replay; history is recovered elsewhere.

mod consumer;
mod middleware;
mod producer;
mod pubsub;
mod record;

pub mod implementation;

pub use consumer::*;
pub use middleware::*;
pub use producer::*;
pub use pubsub::*;
pub use record::*;
