use structopt::{clap::arg_enum, StructOpt};

arg_enum! {
    #[derive(Debug)]
    pub enum LogFormat {
        Text,
        Compact,
        Json
    }
}

#[derive(Debug, StructOpt)]
#[structopt(
    about = "Distributed chat-message pipeline: ordered ingestion, durable storage and live fan-out.",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct MainOptions {
    /// Log level, scopable to different modules
    ///
    /// Levels: trace, debug, info, warn, error
    #[structopt(
        short,
        long,
        global = true,
        default_value = "info,hyper=warn,tower=warn,h2=warn",
        env = "RUST_LOG",
        value_name = "level"
    )]
    pub log: String,

    /// Formatting style for log outputs
    #[structopt(long, global = true, env, possible_values = &LogFormat::variants(), case_insensitive = true, default_value = "Compact")]
    pub log_format: LogFormat,

    /// Enable status reporting server which can be used as a readiness probe
    #[structopt(long, global = true, env, value_name = "port")]
    pub status_server: Option<u16>,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    Gateway(lithium::module::gateway::Options),
    Worker(lithium::module::worker::Options),
    Query(lithium::module::query::Options),
    Publisher(lithium::module::publisher::Options),
    Notifier(lithium::module::notifier::Options),
}
