mod cli;
mod commands;
mod config;
mod main_lib;
mod secrets;

use std::process::ExitCode;

use clap::Parser;
use cli::Cli;
use config::Config;
use main_lib::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing();
    commands::run(cli, config).await
}
