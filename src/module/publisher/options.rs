use crate::module::options::RedisOptions;
use structopt::StructOpt;

/// Options for the publisher module
#[derive(Debug, StructOpt)]
pub struct Options {
    /// Port on which the HTTP API is served
    #[structopt(long, env = "WEB_PORT", default_value = "9003")]
    pub port: u16,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub redis: RedisOptions,
}
