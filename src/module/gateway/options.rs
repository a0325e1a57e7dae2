use crate::module::options::{BusOptions, RedisOptions};
use structopt::StructOpt;

/// Options for the gateway module
#[derive(Debug, StructOpt)]
pub struct Options {
    /// Port on which the HTTP API is served
    #[structopt(long, env = "WEB_PORT", default_value = "9001")]
    pub port: u16,

    /// Base URL of the query service handling history reads
    #[structopt(long, env = "QUERY_HOST", default_value = "http://lithium-query:9002")]
    pub query_host: String,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub redis: RedisOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub bus: BusOptions,
}
