use std::sync::Arc;

use clap::Parser;
use mediagen::config::{GeneratorConfig, setup_logging};
use mediagen::provider::ReplicateProvider;
use tracing::error;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = mediagen::cli::CliOptions::parse();

    if setup_logging(cli.debug).is_err() {
        return;
    }

    let config = match GeneratorConfig::from_cli(&cli) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!("Configuration error: {}", err);
            std::process::exit(1);
        }
    };

    let provider = Arc::new(ReplicateProvider::new(&config));

    if let Err(err) =
        mediagen::web::setup_server(&cli.listen_address, cli.port, config, provider).await
    {
        error!("Application error: {}", err);
    }
}
