//! Line-oriented TCP chat: a relay server and a console client.
//!
//! See `README.md` for usage and the wire protocol. Each module focuses on a
//! concrete responsibility:
//!
//! - [`protocol`] defines the newline-delimited text grammar and line I/O helpers.
//! - [`registry`] tracks live participants and fans broadcasts out to them
//!   under a single lock.
//! - [`participant`] runs one connection through handshake, relay, and cleanup.
//! - [`server`] accepts TCP connections and spawns a participant task for each.
//! - [`client`] joins a server and relays stdin while printing what comes back.
//! - [`cli`] parses the command-line arguments of both binaries.
//!
//! Integration tests drive the server over loopback TCP and the compiled
//! binaries through piped stdin/stdout.

pub mod cli;
pub mod client;
pub mod participant;
pub mod protocol;
pub mod registry;
pub mod server;
