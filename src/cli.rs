use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hostbridge")]
#[command(about = "Loopback HTTP bridge that runs client requests on the host's own thread", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Start the bridge and run the bundled scene host until interrupted.
    Serve {
        /// Loopback port to listen on (0 picks a free port).
        #[arg(long)]
        port: Option<u16>,
        /// Directory for history, memory and tool files.
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// JSON config file, applied before environment variables.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Client page to print a launch URL for.
        #[arg(long)]
        client_url: Option<String>,
        /// Start with a cube carrying a small node graph.
        #[arg(long)]
        seed_demo: bool,
    },

    /// Check whether a bridge is answering on a port.
    Status {
        #[arg(long, default_value_t = hostbridge::config::DEFAULT_PORT)]
        port: u16,
        /// Session token printed by `serve`.
        #[arg(long)]
        token: String,
    },
}
