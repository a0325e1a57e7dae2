//! Various options usable by modules
//!
//! The structs in this module allow other modules to flatten them into
//! their own options struct. This allows for a unified yet non-cluttered
//! option set.

use crate::constants;

use crate::library::communication::TopicDescriptor;
use crate::library::storage::mongo::MongoMessageStore;
use crate::library::storage::StorageError;
use mongodb::{Client, Database};
use structopt::StructOpt;

/// Options for connecting to the Redis server
#[derive(Debug, StructOpt)]
pub struct RedisOptions {
    /// Redis database server URL
    #[structopt(
        short = "r",
        long = "redis",
        env = "REDIS",
        global = true,
        default_value = "redis://lithium-redis/",
        value_name = "url"
    )]
    pub url: String,
}

/// Options relevant for message queueing
#[derive(Debug, StructOpt)]
pub struct QueueingOptions {
    /// Unique and stable identifier for this instance.
    /// It is used to identify and resume work after a crash
    /// or deliberate restart, thus it may not change across
    /// executions!
    #[structopt(env)]
    pub id: String,
}

/// Options describing the chat message topic
#[derive(Debug, StructOpt)]
pub struct BusOptions {
    /// Topic on which chat messages are queued
    #[structopt(long, env = "TOPIC", default_value = "messages")]
    pub topic: String,

    /// Consumer group which collectively processes the topic
    #[structopt(long, env = "GROUP_ID", default_value = "messages-consumer-group")]
    pub group: String,

    /// Number of partitions the topic is spread across.
    /// All producers and consumers of a deployment have to agree on it.
    #[structopt(long, env = "PARTITIONS", default_value = "8")]
    pub partitions: u32,
}

impl BusOptions {
    /// Descriptor of the configured topic
    pub fn topic_descriptor(&self) -> TopicDescriptor {
        TopicDescriptor::new(self.topic.clone(), constants::QUEUE_SIZE_MESSAGES)
    }
}

/// Options regarding the permanent message storage backend
#[derive(Debug, StructOpt)]
pub struct MongoDBOptions {
    /// MongoDB connection URL
    #[structopt(long, env)]
    mongodb: String,

    /// Name of the database to use
    #[structopt(long, env, default_value = "lithium")]
    database: String,

    /// Name of the collection where messages are stored
    #[structopt(long, env, default_value = "messages")]
    collection: String,
}

impl MongoDBOptions {
    /// Instantiates a new database client instance
    pub async fn client(&self) -> mongodb::error::Result<Client> {
        Client::with_uri_str(&self.mongodb).await
    }

    /// Instantiates a new database connection based on a new client
    pub async fn database(&self) -> mongodb::error::Result<Database> {
        Ok(self.client().await?.database(&self.database))
    }

    /// Opens the message store, creating collection indexes as needed
    pub async fn store(&self) -> Result<MongoMessageStore, StorageError> {
        let database = self
            .database()
            .await
            .map_err(|e| StorageError::Unavailable(Box::new(e)))?;

        MongoMessageStore::initialize(&database, &self.collection).await
    }
}

/// Options describing the surrounding deployment
#[derive(Debug, StructOpt)]
pub struct EnvironmentOptions {
    /// Name of the environment this instance runs in, attached to all
    /// per-record log spans
    #[structopt(long, env, default_value = "local")]
    pub environment: String,
}
