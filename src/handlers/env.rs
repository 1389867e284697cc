use anyhow::Result;
use colored::*;
use std::env;

use crate::config::load_config;

/// Shows the env layers the runner would hand to tasks, secrets redacted.
pub fn handle_env() -> Result<()> {
    let current_dir = env::current_dir()?;
    let config = load_config(&current_dir)?;

    println!("{} Environment Variables (Layered):", "🔍".cyan());

    if config.env_sources.is_empty() {
        println!("  (no [env] section and no .env file)");
        return Ok(());
    }

    for (source, keys) in &config.env_sources {
        println!("\n[{}]", source.yellow().bold());
        for key in keys {
            let value = match config.env.get(key) {
                Some(v) => v,
                None => continue,
            };
            if is_sensitive(key) {
                println!("  {} = {}", key.bold(), "[REDACTED]".dimmed());
            } else {
                println!("  {} = {}", key.bold(), value);
            }
        }
    }

    Ok(())
}

fn is_sensitive(key: &str) -> bool {
    let upper = key.to_uppercase();
    upper.contains("KEY") || upper.contains("TOKEN") || upper.contains("PASS") || upper.contains("SECRET")
}
