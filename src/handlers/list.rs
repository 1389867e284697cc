use anyhow::Result;
use chrono::Local;
use colored::*;
use std::env;

use crate::config::load_config;
use crate::context::RunContext;

pub fn handle_list() -> Result<()> {
    let current_dir = env::current_dir()?;
    let config = load_config(&current_dir)?;

    if let Some(p) = &config.project {
        let name = p.name.as_deref().unwrap_or("Unnamed Deployment");
        println!("{} {} {}", "🔧".green(), name.bold(), "(Maintenance Plan)".dimmed());
    }
    println!();

    if config.tasks.is_empty() {
        println!("No tasks defined in configuration.");
        return Ok(());
    }

    // Declared order is execution order, so no sorting here.
    println!("{}", "Tasks (run top to bottom):".bold().underline());

    let ctx = RunContext::new(Local::now(), config.merged_env());
    let max_len = config.tasks.iter().map(|t| t.id.len()).max().unwrap_or(0);

    for spec in &config.tasks {
        let padding = " ".repeat(max_len - spec.id.len() + 2);

        let gate = if spec.when.is_always() {
            "enabled".green()
        } else {
            match spec.when.evaluate(&ctx) {
                Ok(true) => format!("enabled ({})", spec.when.describe()).green(),
                Ok(false) => format!("gated ({})", spec.when.describe()).yellow(),
                Err(_) => "invalid condition".red(),
            }
        };

        let mut notes = Vec::new();
        if spec.best_effort {
            notes.push("best-effort".to_string());
        }
        if spec.retries > 0 {
            notes.push(format!("retries {}", spec.retries));
        }
        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!(" [{}]", notes.join(", ")).dimmed().to_string()
        };

        let description = spec.description.as_deref().unwrap_or("");
        println!(
            "  {}{}{}{}  {}",
            spec.id.cyan(),
            padding,
            gate,
            notes,
            description.italic()
        );
    }

    Ok(())
}
