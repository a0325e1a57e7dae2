//! HTTP ingress accepting chat message submissions and proxying history reads

use crate::harness::{Heart, Module, RedisBusFactory};
use crate::library::clients::{ChatQueueClient, QueryClient};
use crate::library::communication::TopicDescriptor;
use crate::library::BoxedError;
use crate::make_responder_chain_service_fn;
use async_trait::async_trait;
use hyper::Server;
use jatsl::{schedule, Job, JobManager, JobScheduler};
use messages::MessageApiResponder;
use std::net::SocketAddr;
use std::sync::Arc;

mod messages;
mod options;

pub use options::Options;

struct ApiServerJob {
    port: u16,
    redis_url: String,
    partitions: u32,
    topic: TopicDescriptor,
    query_host: String,
}

#[async_trait]
impl Job for ApiServerJob {
    const NAME: &'static str = module_path!();
    const SUPPORTS_GRACEFUL_TERMINATION: bool = true;

    async fn execute(&self, manager: JobManager) -> Result<(), BoxedError> {
        let handle_provider = Arc::new(manager.clone());
        let factory = RedisBusFactory::new(self.redis_url.clone(), self.partitions, handle_provider);

        let queue_client = ChatQueueClient::new(self.topic.clone(), factory.producer());
        let query_client = QueryClient::new(self.query_host.clone());
        let api_responder = MessageApiResponder::new(queue_client, query_client);

        let make_svc = make_responder_chain_service_fn! {
            api_responder
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let server = Server::bind(&addr).serve(make_svc);
        let graceful = server.with_graceful_shutdown(manager.termination_signal());

        manager.ready().await;
        graceful.await?;

        Ok(())
    }
}

/// Module implementation
pub struct Gateway {
    options: Options,
}

impl Gateway {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Module for Gateway {
    async fn run(&mut self, scheduler: &JobScheduler) -> Result<Option<Heart>, BoxedError> {
        let server_job = ApiServerJob {
            port: self.options.port,
            redis_url: self.options.redis.url.clone(),
            partitions: self.options.bus.partitions,
            topic: self.options.bus.topic_descriptor(),
            query_host: self.options.query_host.clone(),
        };

        schedule!(scheduler, { server_job });

        Ok(Some(Heart::without_heart_stone()))
    }
}
