//! Read service recovering conversation history from the store

use crate::harness::{Heart, Module};
use crate::library::storage::MessageStore;
use crate::library::BoxedError;
use crate::make_responder_chain_service_fn;
use async_trait::async_trait;
use hyper::Server;
use jatsl::{schedule, Job, JobManager, JobScheduler};
use messages::HistoryResponder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

mod messages;
mod options;

pub use options::Options;

struct HistoryServerJob {
    port: u16,
    store: Arc<dyn MessageStore>,
}

#[async_trait]
impl Job for HistoryServerJob {
    const NAME: &'static str = module_path!();
    const SUPPORTS_GRACEFUL_TERMINATION: bool = true;

    async fn execute(&self, manager: JobManager) -> Result<(), BoxedError> {
        let history_responder = HistoryResponder::new(self.store.clone());

        let make_svc = make_responder_chain_service_fn! {
            history_responder
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
pub struct Query {
    options: Options,
}

impl Query {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Module for Query {
    async fn run(&mut self, scheduler: &JobScheduler) -> Result<Option<Heart>, BoxedError> {
        debug!("Acquiring message store");
        let store = Arc::new(self.options.mongo.store().await?);

        let server_job = HistoryServerJob {
            port: self.options.port,
            store,
        };

        schedule!(scheduler, { server_job });

        Ok(Some(Heart::without_heart_stone()))
    }
}
