//! Websocket fan-out multiplexing broadcast channels onto client connections

use crate::constants::TOPIC_PARTITIONS;
use crate::harness::{Heart, Module, RedisBusFactory};
use crate::library::communication::BroadcastSubscriber;
use crate::library::http::Responder;
use crate::library::BoxedError;
use crate::make_responder_chain_service_fn;
use async_trait::async_trait;
use futures::Future;
use hyper::http::{request::Parts, Response, StatusCode};
use hyper::{Body, Request, Server};
use jatsl::{schedule, Job, JobManager, JobScheduler};
use session::serve_subscription;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::warn;

mod options;
mod session;

pub use options::Options;

/// Responder upgrading clients to websocket subscriptions, accepting any origin
struct UpgradeResponder<S> {
    subscriber: Arc<S>,
}

#[async_trait]
impl<S> Responder for UpgradeResponder<S>
where
    S: BroadcastSubscriber + Send + Sync + 'static,
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
        let mut request = Request::from_parts(parts, request_body);

        if !hyper_tungstenite::is_upgrade_request(&request) {
            let (parts, request_body) = request.into_parts();
            return next(parts, request_body, client_ip).await;
        }

        match hyper_tungstenite::upgrade(&mut request, None) {
            Ok((response, websocket)) => {
                let subscriber = self.subscriber.clone();

                tokio::spawn(async move {
                    match websocket.await {
                        Ok(stream) => serve_subscription(stream, subscriber.as_ref()).await,
                        Err(error) => warn!(?error, "websocket handshake failed"),
                    }
                });

                Ok(response)
            }
            Err(error) => {
                warn!(?error, "Error upgrading connection");
                Ok(Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .body(Body::empty())
                    .unwrap())
            }
        }
    }
}

struct UpgradeServerJob {
    port: u16,
    redis_url: String,
}

#[async_trait]
impl Job for UpgradeServerJob {
    const NAME: &'static str = module_path!();
    const SUPPORTS_GRACEFUL_TERMINATION: bool = true;

    async fn execute(&self, manager: JobManager) -> Result<(), BoxedError> {
        let handle_provider = Arc::new(manager.clone());
        let factory = RedisBusFactory::new(
            self.redis_url.clone(),
            TOPIC_PARTITIONS,
            handle_provider,
        );

        let upgrade_responder = UpgradeResponder {
            subscriber: Arc::new(factory.broadcast_subscriber()),
        };

        let make_svc = make_responder_chain_service_fn! {
            upgrade_responder
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
pub struct Notifier {
    options: Options,
}

impl Notifier {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Module for Notifier {
    async fn run(&mut self, scheduler: &JobScheduler) -> Result<Option<Heart>, BoxedError> {
        let server_job = UpgradeServerJob {
            port: self.options.port,
            redis_url: self.options.redis.url.clone(),
        };

        schedule!(scheduler, { server_job });

        Ok(Some(Heart::without_heart_stone()))
    }
}
