use crate::module::options::{BusOptions, EnvironmentOptions, MongoDBOptions, QueueingOptions, RedisOptions};
use structopt::StructOpt;

/// Options for the worker module
#[derive(Debug, StructOpt)]
pub struct Options {
    /// Base URL of the publisher service fanning out notifications
    #[structopt(long, env = "NOTIFIER_ADDR", default_value = "http://lithium-publisher:9003")]
    pub notifier_addr: String,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub queueing: QueueingOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub redis: RedisOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub bus: BusOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub mongo: MongoDBOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub environment: EnvironmentOptions,
}
