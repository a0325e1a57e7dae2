use anyhow::Result;
use lithium::harness::ModuleRunner;
use lithium::module::gateway::Gateway;
use lithium::module::notifier::Notifier;
use lithium::module::publisher::Publisher;
use lithium::module::query::Query;
use lithium::module::worker::Worker;
use options::{Command, LogFormat};
use structopt::StructOpt;
use tracing::info;

mod options;

#[tokio::main]
async fn main() -> Result<()> {
    let (command, runner) = init()?;

    match command {
        Command::Gateway(options) => runner.run(Gateway::new(options)).await,
        Command::Worker(options) => runner.run(Worker::new(options)).await,
        Command::Query(options) => runner.run(Query::new(options)).await,
        Command::Publisher(options) => runner.run(Publisher::new(options)).await,
        Command::Notifier(options) => runner.run(Notifier::new(options)).await,
    };

    Ok(())
}

fn init() -> Result<(options::Command, ModuleRunner)> {
    let options = options::MainOptions::from_args();

    let formatter = tracing_subscriber::fmt().with_env_filter(options.log);

    match options.log_format {
        LogFormat::Text => formatter.init(),
        LogFormat::Compact => formatter.compact().init(),
        LogFormat::Json => formatter.json().init(),
    };

    let runner = match options.status_server {
        Some(port) => ModuleRunner::new_with_status_server(port),
        None => ModuleRunner::default(),
    };

    info!("Lithium {}", env!("CARGO_PKG_VERSION"));

    Ok((options.command, runner))
}
