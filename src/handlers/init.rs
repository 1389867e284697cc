use anyhow::{Context, Result, bail};
use colored::*;
use std::env;
use std::fs;

use crate::config::CONFIG_FILE;

const STARTER: &str = include_str!("../../scripts/upkeep.toml");

pub fn handle_init() -> Result<()> {
    let current_dir = env::current_dir()?;
    let target = current_dir.join(CONFIG_FILE);

    if target.exists() {
        bail!("'{}' already exists here, refusing to overwrite it.", CONFIG_FILE);
    }

    fs::write(&target, STARTER).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;
    println!("{} Wrote starter plan to {}", "📝".green(), CONFIG_FILE.bold());
    println!("  Edit the commands and paths, then try: {}", "upkeep list".cyan());
    Ok(())
}
