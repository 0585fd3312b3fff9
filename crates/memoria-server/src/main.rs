mod auth;
mod config;
mod http;
mod serve;

use clap::Parser;
use config::Config;
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::parse();

    if let Err(e) = config.validate() {
        error!("configuration error: {e}");
        anyhow::bail!("invalid memoria-server configuration");
    }

    serve::run(config).await
}
