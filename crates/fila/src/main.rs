mod cli;

use std::io;
use std::sync::Arc;

use clap::Parser;
use cli::{DevCmd, Opts, OptsCmd};
use fila_db::{Database, DbError, TableDumpError};
use fila_server::config::Config;
use fila_server::push::LogPushTransport;
use fila_server::{Server, ServerError};
use fila_util_error::WhateverResult;
use snafu::{ResultExt as _, Snafu, Whatever};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub const PROJECT_NAME: &str = "fila";
pub const LOG_TARGET: &str = "fila::cli";

#[derive(Debug, Snafu)]
pub enum CliError {
    #[snafu(display("Configuration error: {source}"))]
    Config { source: Whatever },
    #[snafu(display("Server error: {source}"))]
    Server { source: ServerError },
    #[snafu(display("Database error: {source}"))]
    Database { source: DbError },
    #[snafu(transparent)]
    TableDump { source: TableDumpError },
    #[snafu(display("Data dir error: {source:?}"))]
    DataDir { source: io::Error },
    #[snafu(display("Miscellaneous error: {source}"))]
    Whatever { source: Whatever },
}

pub type CliResult<T> = std::result::Result<T, CliError>;

#[snafu::report]
#[tokio::main]
async fn main() -> CliResult<()> {
    init_logging().context(WhateverSnafu)?;

    let opts = Opts::parse();
    handle_cmd(opts).await
}

async fn handle_cmd(opts: Opts) -> CliResult<()> {
    let db_path = Database::mk_db_path(&opts.global.data_dir)
        .await
        .context(DataDirSnafu)?;

    match opts.cmd {
        OptsCmd::Serve { listen, reuseport } => {
            let config = Config::from_env().context(ConfigSnafu)?;
            let db = Arc::new(Database::open(db_path).await.context(DatabaseSnafu)?);

            let server = Server::init(
                fila_server::Opts::new(listen, reuseport),
                config,
                db,
                Arc::new(LogPushTransport),
            )
            .await
            .context(ServerSnafu)?;

            server.run().await.context(ServerSnafu)?;
        }
        OptsCmd::Dev(cmd) => match cmd {
            DevCmd::DbDump { table } => {
                let db = Database::open(db_path).await.context(DatabaseSnafu)?;
                db.dump_table(&table).await?;
            }
        },
    }

    Ok(())
}

pub fn init_logging() -> WhateverResult<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| Whatever::without_source("Failed to initialize logging".to_string()))?;

    Ok(())
}
