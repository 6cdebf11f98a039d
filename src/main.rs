use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use treeconf::config::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = config::load(&cli)?;

    info!(
        target: "treeconf",
        config = %cli.config.display(),
        "treeconf starting"
    );

    treeconf::run(config).await
}
