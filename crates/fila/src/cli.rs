use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Command line options for the fila queue coordinator
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub cmd: OptsCmd,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Directory holding the durable database
    #[arg(env = "FILA_DATA_DIR", long, default_value = "./data")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum OptsCmd {
    /// Start the queue coordinator server
    Serve {
        /// Address to listen on
        #[arg(long, env = "FILA_LISTEN", default_value = "127.0.0.1:7380")]
        listen: String,

        /// Set SO_REUSEPORT on the listening socket
        #[arg(long)]
        reuseport: bool,
    },

    /// Development and debugging commands
    #[command(subcommand)]
    Dev(DevCmd),
}

#[derive(Debug, Subcommand)]
pub enum DevCmd {
    /// Print the contents of a database table as JSON lines
    DbDump {
        /// One of: sessions, sessions_by_code, parties, events,
        /// push_subscriptions, snapshots
        table: String,
    },
}
