use crate::module::options::MongoDBOptions;
use structopt::StructOpt;

/// Options for the query module
#[derive(Debug, StructOpt)]
pub struct Options {
    /// Port on which the HTTP API is served
    #[structopt(long, env = "WEB_PORT", default_value = "9002")]
    pub port: u16,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub mongo: MongoDBOptions,
}
