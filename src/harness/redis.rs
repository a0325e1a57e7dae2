//! Monitored redis connections with [`jatsl`] interop
//!
//! Connections notify their [`TaskResourceHandle`] when they die so dependent
//! jobs get restarted by the scheduler instead of hanging onto a dead socket.

use crate::library::communication::implementation::redis::{
    PubSubResource, PubSubResourceError, RedisBroadcast, RedisConnectionVariant, RedisFactory,
    RedisPublisher, RedisStreamProvider,
};
use crate::library::BoxedError;
use async_trait::async_trait;
use futures::future::FutureExt;
use futures::stream::{once, BoxStream};
use futures::StreamExt;
use jatsl::{TaskManager, TaskResourceHandle};
use redis::aio::{Connection, ConnectionLike, MultiplexedConnection, PubSub};
use redis::{Client, Cmd, Msg, Pipeline, RedisFuture, RedisResult, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{trace, warn};

/// Handle a redis command result.
macro_rules! notify_if_disconnected {
    ($self:expr, $result:expr) => {
        if let Err(ref e) = $result {
            if e.is_connection_dropped()
                || e.is_io_error()
                || e.is_connection_refusal()
                || e.is_timeout()
            {
                $self.handle.resource_died().await;
            }
        }
    };
}

enum RedisConnectionKind {
    Owned(Connection),
    Multiplexed(MultiplexedConnection),
}

/// Redis connection monitoring its own liveness
pub struct RedisResource {
    con: RedisConnectionKind,
    handle: TaskResourceHandle,
}

impl RedisResource {
    async fn new(
        handle: TaskResourceHandle,
        url: &str,
        variant: RedisConnectionVariant,
    ) -> RedisResult<Self> {
        let client = Client::open(url)?;

        let con = match variant {
            RedisConnectionVariant::Owned => {
                RedisConnectionKind::Owned(connect_owned(&client).await)
            }
            RedisConnectionVariant::Multiplexed => {
                RedisConnectionKind::Multiplexed(connect_multiplexed(&client).await)
            }
        };

        Ok(Self { con, handle })
    }
}

async fn connect_owned(client: &Client) -> Connection {
    with_retries(|| client.get_async_connection()).await
}

async fn connect_multiplexed(client: &Client) -> MultiplexedConnection {
    with_retries(|| client.get_multiplexed_tokio_connection()).await
}

async fn with_retries<C, F, Fut>(connect: F) -> C
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = RedisResult<C>>,
{
    let retry_interval = Duration::from_secs(2);
    let request_timeout = Duration::from_secs(4);
    let mut attempt = 0;

    loop {
        trace!(attempt, "Connecting to redis");

        match timeout(request_timeout, connect()).await {
            Ok(Ok(connection)) => return connection,
            Ok(Err(error)) => warn!(?error, "Failed to connect to redis"),
            Err(error) => warn!(?error, "Timeout connecting to redis"),
        }

        sleep(retry_interval).await;
        attempt += 1;
    }
}

impl ConnectionLike for RedisResource {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        (async move {
            let result = match &mut self.con {
                RedisConnectionKind::Owned(con) => con.req_packed_command(cmd).await,
                RedisConnectionKind::Multiplexed(con) => con.req_packed_command(cmd).await,
            };

            notify_if_disconnected!(self, result);
            result
        })
        .boxed()
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        (async move {
            let result = match &mut self.con {
                RedisConnectionKind::Owned(con) => con.req_packed_commands(cmd, offset, count).await,
                RedisConnectionKind::Multiplexed(con) => {
                    con.req_packed_commands(cmd, offset, count).await
                }
            };

            notify_if_disconnected!(self, result);
            result
        })
        .boxed()
    }

    fn get_db(&self) -> i64 {
        match &self.con {
            RedisConnectionKind::Owned(con) => con.get_db(),
            RedisConnectionKind::Multiplexed(con) => con.get_db(),
        }
    }
}

/// Redis pub/sub connection monitoring the connection state
pub struct MonitoredPubSub {
    pubsub: PubSub,
    handle: TaskResourceHandle,
}

impl MonitoredPubSub {
    fn new(con: Connection, handle: TaskResourceHandle) -> Self {
        Self {
            pubsub: con.into_pubsub(),
            handle,
        }
    }
}

#[async_trait]
impl PubSubResource for MonitoredPubSub {
    async fn subscribe(&mut self, channel: &str) -> RedisResult<()> {
        self.pubsub.subscribe(channel).await
    }

    fn into_on_message<'a>(self) -> BoxStream<'a, Result<Msg, PubSubResourceError>> {
        let mut handle = self.handle.clone();

        let message_stream = self
            .pubsub
            .into_on_message()
            .map(Ok::<Msg, PubSubResourceError>);
        let error_stream = once(async move {
            handle.resource_died().await;
            Err(PubSubResourceError::StreamClosed)
        })
        .boxed();

        message_stream.chain(error_stream).boxed()
    }
}

/// [`RedisFactory`] implementation providing [`jatsl`] interop
pub struct MonitoredRedisFactory {
    url: String,
    handle_provider: BoxedResourceHandleProvider,
}

impl MonitoredRedisFactory {
    /// Creates a new factory opening connections to the given URL
    pub fn new(url: String, handle_provider: BoxedResourceHandleProvider) -> Self {
        Self {
            url,
            handle_provider,
        }
    }
}

impl Clone for MonitoredRedisFactory {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            handle_provider: self.handle_provider.clone(),
        }
    }
}

#[async_trait]
impl RedisFactory for MonitoredRedisFactory {
    type PubSub = MonitoredPubSub;
    type Connection = RedisResource;

    async fn pubsub(&self) -> Result<Self::PubSub, BoxedError> {
        let handle = self.handle_provider.create_handle();
        let client = Client::open(self.url.as_str())?;
        let con = connect_owned(&client).await;

        Ok(MonitoredPubSub::new(con, handle))
    }

    async fn connection(
        &self,
        variant: RedisConnectionVariant,
    ) -> Result<Self::Connection, BoxedError> {
        let handle = self.handle_provider.create_handle();

        Ok(RedisResource::new(handle, &self.url, variant).await?)
    }
}

/// Factory to provide [`TaskResourceHandle`] instances
pub trait ResourceHandleProvider {
    /// Instantiates a new [`TaskResourceHandle`]
    fn create_handle(&self) -> TaskResourceHandle;
}

/// Stub resource handle provider
///
/// Creates new instances using [`TaskResourceHandle::stub()`] for situations where you do not need redundancy or task management
pub struct DummyResourceHandleProvider {}

impl DummyResourceHandleProvider {
    /// Creates a new instance wrapped in an [`Arc`]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {})
    }
}

impl ResourceHandleProvider for DummyResourceHandleProvider {
    fn create_handle(&self) -> TaskResourceHandle {
        TaskResourceHandle::stub()
    }
}

impl<C> ResourceHandleProvider for TaskManager<C> {
    fn create_handle(&self) -> TaskResourceHandle {
        self.create_resource_handle()
    }
}

/// Dynamic dispatch version of [`ResourceHandleProvider`]
pub type BoxedResourceHandleProvider = Arc<dyn ResourceHandleProvider + Send + Sync>;

/// Bundles the redis-backed queue and broadcast implementations behind one handle
pub struct RedisBusFactory {
    url: String,
    partitions: u32,
    handle_provider: BoxedResourceHandleProvider,
}

impl RedisBusFactory {
    /// Creates a new instance which connects to the given URL and reports status using the given handle factory
    pub fn new(url: String, partitions: u32, handle_provider: BoxedResourceHandleProvider) -> Self {
        Self {
            url,
            partitions,
            handle_provider,
        }
    }

    fn factory(&self) -> MonitoredRedisFactory {
        MonitoredRedisFactory::new(self.url.clone(), self.handle_provider.clone())
    }

    /// Instantiates a new record producer
    pub fn producer(&self) -> RedisPublisher<MonitoredRedisFactory> {
        RedisPublisher::new(self.factory(), self.partitions)
    }

    /// Instantiates a new partition stream provider
    pub fn stream_provider(&self) -> RedisStreamProvider<MonitoredRedisFactory> {
        RedisStreamProvider::new(self.factory(), self.partitions)
    }

    /// Instantiates a new broadcast publisher
    pub fn broadcast_publisher(&self) -> RedisPublisher<MonitoredRedisFactory> {
        self.producer()
    }

    /// Instantiates a new broadcast subscriber
    pub fn broadcast_subscriber(&self) -> RedisBroadcast<MonitoredRedisFactory> {
        RedisBroadcast::new(self.factory())
    }
}
