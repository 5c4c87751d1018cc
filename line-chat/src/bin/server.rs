use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use line_chat::{cli::ServerArgs, server::ChatServer};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = ServerArgs::parse();
    let server = ChatServer::bind(("0.0.0.0", args.port())).await?;
    let addr = server.local_addr()?;
    info!("chat server listening on {}", addr);

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("chat server exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
