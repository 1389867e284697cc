mod cli;
mod config;
mod context;
mod error;
mod handlers;
mod logger;
mod metrics;
mod runner;
mod utils;

use clap::Parser;
use cli::{Cli, Commands};
use colored::*;
use handlers::{env, init, list, run};
use log::error;
use runner::task::RunStatus;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{} {:#}", "❌".red(), e);
            2
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Run {
            tasks,
            update_packages,
            continue_on_error,
            dry_run,
        } => {
            let status = run::handle_run(tasks, update_packages, continue_on_error, dry_run)?;
            Ok(match status {
                RunStatus::Success => 0,
                RunStatus::Failure => 1,
                RunStatus::Cancelled => 130,
            })
        }
        Commands::List => {
            list::handle_list()?;
            Ok(0)
        }
        Commands::Init => {
            init::handle_init()?;
            Ok(0)
        }
        Commands::Env => {
            env::handle_env()?;
            Ok(0)
        }
    }
}
