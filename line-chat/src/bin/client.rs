use anyhow::Result;
use clap::Parser;

use line_chat::{cli::ClientArgs, client};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    // Chat output owns stdout; diagnostics go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = ClientArgs::parse();
    client::run(args).await
}
