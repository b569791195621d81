use anyhow::Result;
use clap::Parser;
use zd_daemon::cli::{init_tracing, Cli};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    tracing::debug!(config = %cli.config.display(), "zd starting");
    cli.run().await
}
