use anyhow::{Context, Result, bail};
use chrono::Local;
use colored::*;
use log::warn;
use std::collections::HashSet;
use std::env;
use std::sync::atomic::Ordering;

use crate::config::load_config;
use crate::context::RunContext;
use crate::logger::{FileSink, LogSink, NullSink, prune_old_captures};
use crate::metrics;
use crate::runner::task::{CapturedOutput, RunReport, RunStatus, TaskStatus};
use crate::runner::{Runner, RunnerOptions};
use crate::utils::detect_shell;

pub fn handle_run(
    tasks: Vec<String>,
    update_packages: bool,
    continue_on_error: bool,
    dry_run: bool,
) -> Result<RunStatus> {
    let current_dir = env::current_dir()?;
    let config = load_config(&current_dir)?;
    let project = config.project.as_ref();

    let mut ctx = RunContext::new(Local::now(), config.merged_env());
    ctx.dry_run = dry_run;
    if update_packages {
        ctx = ctx.with_flag("update-packages");
    }

    let shell = detect_shell(project.and_then(|p| p.shell.as_ref()));
    let sink: Box<dyn LogSink> = match project.and_then(|p| p.log_file.as_ref()) {
        Some(path) => Box::new(FileSink::open(path)?),
        None => Box::new(NullSink),
    };

    let capture_dir = project.and_then(|p| p.capture_dir.clone());
    let mut runner = Runner::new(
        RunnerOptions {
            continue_on_error: continue_on_error
                || project.and_then(|p| p.continue_on_error).unwrap_or(false),
            log_dir: capture_dir.clone(),
        },
        sink,
    );

    let selection: Option<HashSet<&str>> = if tasks.is_empty() {
        None
    } else {
        let known: HashSet<&str> = config.tasks.iter().map(|t| t.id.as_str()).collect();
        for id in &tasks {
            if !known.contains(id.as_str()) {
                bail!("Task '{}' not found", id);
            }
        }
        Some(tasks.iter().map(String::as_str).collect())
    };

    let default_timeout = config.default_timeout();
    for spec in &config.tasks {
        if let Some(selected) = &selection {
            if !selected.contains(spec.id.as_str()) {
                continue;
            }
        }
        runner.register(spec.to_task(&shell, default_timeout))?;
    }
    if runner.is_empty() {
        bail!("No tasks defined in configuration");
    }

    let cancel = runner.cancel_flag();
    ctrlc::set_handler(move || {
        cancel.store(true, Ordering::SeqCst);
    })
    .context("Failed to install interrupt handler")?;

    let report = runner.run(&ctx);

    if let Some(path) = project.and_then(|p| p.metrics_file.as_ref()) {
        if let Err(e) = metrics::write_textfile(&report, path) {
            warn!("{} Could not publish metrics: {}", "⚠️".yellow(), e);
        }
    }

    if let (Some(dir), Some(days)) = (&capture_dir, project.and_then(|p| p.keep_captures_days)) {
        if let Err(e) = prune_old_captures(dir, days) {
            warn!("{} Capture pruning failed: {}", "⚠️".yellow(), e);
        }
    }

    print_summary(&report);
    Ok(report.status)
}

fn print_summary(report: &RunReport) {
    println!();
    println!("{}", "Run Summary:".bold().underline());

    let max_len = report.results.iter().map(|r| r.id.len()).max().unwrap_or(0);
    for result in &report.results {
        let padding = " ".repeat(max_len - result.id.len() + 2);
        let status = match result.status {
            TaskStatus::Success => "success".green(),
            TaskStatus::Failure => "failure".red(),
            TaskStatus::Skipped => "skipped".dimmed(),
            TaskStatus::Cancelled => "cancelled".yellow(),
        };
        let mut detail = match (&result.error, result.status) {
            (Some(err), _) => format!("  {}", err.red()),
            (None, TaskStatus::Success) => {
                format!("  {}", format!("{} ms", result.duration().as_millis()).dimmed())
            }
            _ => String::new(),
        };
        if let Some(CapturedOutput::File(path)) = &result.output {
            detail.push_str(&format!("  {}", format!("(log: {})", path.display()).dimmed()));
        }
        println!("  {}{}{}{}", result.id.cyan(), padding, status, detail);
    }

    println!();
    match report.status {
        RunStatus::Success => println!("{} Run finished: {}", "✅".green(), "success".green().bold()),
        RunStatus::Failure => println!("{} Run finished: {}", "❌".red(), "failure".red().bold()),
        RunStatus::Cancelled => {
            println!("{} Run finished: {}", "🛑".yellow(), "cancelled".yellow().bold())
        }
    }
}
