//! `ccb` binary internals: clap surface, logging, the HTTP server hosting
//! the daemon, and the thin client used by every non-serve subcommand.

pub mod cli;
pub mod client;
pub mod logging;
pub mod server;
