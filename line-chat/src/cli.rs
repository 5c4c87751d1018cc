use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing::warn;

use crate::protocol::{DEFAULT_HOST, DEFAULT_PORT};

/// Run the chat server, relaying every line to all other participants.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServerArgs {
    /// Port to listen on. Invalid values fall back to 5000. Use 0 for an ephemeral port.
    pub port: Option<String>,
}

impl ServerArgs {
    pub fn port(&self) -> u16 {
        match self.port.as_deref() {
            None => DEFAULT_PORT,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(port = raw, "invalid port, using default {DEFAULT_PORT}");
                DEFAULT_PORT
            }),
        }
    }
}

/// Connect to a chat server and relay stdin to it.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ClientArgs {
    /// Host of the chat server.
    #[arg(default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port of the chat server.
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Display name announced on join. Defaults to `User<unix millis>`.
    pub name: Option<String>,
}

impl ClientArgs {
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(generated_name)
    }
}

fn generated_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("User{millis}")
}
