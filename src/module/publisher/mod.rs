//! Notification publisher bridging the worker fleet onto the broadcast channels

use crate::constants::TOPIC_PARTITIONS;
use crate::harness::{Heart, Module, RedisBusFactory};
use crate::library::BoxedError;
use crate::make_responder_chain_service_fn;
use async_trait::async_trait;
use hyper::Server;
use jatsl::{schedule, Job, JobManager, JobScheduler};
use send::SendResponder;
use std::net::SocketAddr;
use std::sync::Arc;

mod options;
mod send;

pub use options::Options;

struct SendServerJob {
    port: u16,
    redis_url: String,
}

#[async_trait]
impl Job for SendServerJob {
    const NAME: &'static str = module_path!();
    const SUPPORTS_GRACEFUL_TERMINATION: bool = true;

    async fn execute(&self, manager: JobManager) -> Result<(), BoxedError> {
        let handle_provider = Arc::new(manager.clone());
        let factory = RedisBusFactory::new(
            self.redis_url.clone(),
            TOPIC_PARTITIONS,
            handle_provider,
        );

        let send_responder = SendResponder::new(factory.broadcast_publisher());

        let make_svc = make_responder_chain_service_fn! {
            send_responder
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
pub struct Publisher {
    options: Options,
}

impl Publisher {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Module for Publisher {
    async fn run(&mut self, scheduler: &JobScheduler) -> Result<Option<Heart>, BoxedError> {
        let server_job = SendServerJob {
            port: self.options.port,
            redis_url: self.options.redis.url.clone(),
        };

        schedule!(scheduler, { server_job });

        Ok(Some(Heart::without_heart_stone()))
    }
}
