use crate::module::options::RedisOptions;
use structopt::StructOpt;

/// Options for the notifier module
#[derive(Debug, StructOpt)]
pub struct Options {
    /// Port on which websocket upgrades are accepted
    #[structopt(long, env = "WEB_PORT", default_value = "9004")]
    pub port: u16,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub redis: RedisOptions,
}
