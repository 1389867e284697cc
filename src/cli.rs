use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "upkeep", version, about = "Upkeep: Maintenance Task Runner")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the maintenance plan from upkeep.toml
    Run {
        /// Run only these task ids (default: the whole plan)
        tasks: Vec<String>,

        /// Enable tasks gated on the update-packages flag
        #[arg(long)]
        update_packages: bool,

        /// Keep going after a failed task and report the aggregate
        #[arg(long)]
        continue_on_error: bool,

        /// Run in dry-run mode (print commands without executing)
        #[arg(short = 'd', long = "dry-run")]
        dry_run: bool,
    },

    /// List tasks and whether they are enabled right now
    #[command(visible_alias = "ls")]
    List,

    /// Write a starter upkeep.toml
    Init,

    /// Inspect the merged environment
    Env,
}
