//! demo-forge binary: sets up tracing, then hands over to the CLI.

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = demo_forge::cli::parse_cli();

    // RUST_LOG wins over --log-level
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level)
            .with_context(|| format!("invalid --log-level '{}'", cli.log_level))?,
    };

    // stdout is reserved for command output
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    demo_forge::cli::run_with_cli(cli).await
}
