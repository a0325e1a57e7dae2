//! Durable queue worker persisting chat messages and triggering their fan-out

use crate::harness::{ConsumerRunner, Heart, Module};
use crate::library::clients::PublisherClient;
use crate::library::communication::{ConsumerGroupDescriptor, QueueLocation};
use crate::library::BoxedError;
use async_trait::async_trait;
use handler::WriteAndFanoutHandler;
use jatsl::{schedule, JobScheduler};
use std::sync::Arc;
use tracing::debug;

mod handler;
mod options;

pub use options::Options;

/// Module implementation
pub struct Worker {
    options: Options,
}

impl Worker {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Module for Worker {
    async fn run(&mut self, scheduler: &JobScheduler) -> Result<Option<Heart>, BoxedError> {
        debug!("Acquiring message store");
        let store = self.options.mongo.store().await?;
        let notifier = PublisherClient::new(self.options.notifier_addr.clone());

        let handler = Arc::new(WriteAndFanoutHandler::new(store, notifier));

        let group = ConsumerGroupDescriptor::new(
            self.options.bus.group.clone(),
            QueueLocation::Head,
        );

        let consumer_runner = ConsumerRunner::new(
            self.options.redis.url.clone(),
            self.options.bus.partitions,
            self.options.bus.topic_descriptor(),
            group,
            self.options.queueing.id.clone(),
            self.options.environment.environment.clone(),
            handler,
        );

        schedule!(scheduler, { consumer_runner });

        Ok(Some(Heart::without_heart_stone()))
    }
}
