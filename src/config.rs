use anyhow::{Context, Result, bail};
use colored::*;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::runner::condition::Condition;
use crate::runner::exec::CommandAction;
use crate::runner::task::Task;

pub const CONFIG_FILE: &str = "upkeep.toml";
pub const DEFAULT_TIMEOUT_SECS: u64 = 1800;

#[derive(Debug, Deserialize)]
pub struct UpkeepConfig {
    pub project: Option<ProjectConfig>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Ordered: [[task]] blocks run top to bottom.
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskSpec>,
    /// Which source defined which env keys, for `upkeep env`.
    #[serde(skip)]
    pub env_sources: Vec<(String, Vec<String>)>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    pub name: Option<String>,
    pub shell: Option<String>,
    /// Append-only event log ("YYYY-MM-DD HH:MM:SS ..." lines).
    pub log_file: Option<PathBuf>,
    /// Per-task capture files land under here, in dated subdirectories.
    pub capture_dir: Option<PathBuf>,
    /// Textfile-collector artifact for the metrics scraper.
    pub metrics_file: Option<PathBuf>,
    /// Seconds; tasks without their own timeout get this one.
    pub default_timeout: Option<u64>,
    pub continue_on_error: Option<bool>,
    /// Dated capture directories older than this are pruned after a run.
    pub keep_captures_days: Option<u32>,
}

/// Simple string command or a list of sequential commands.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum TaskCommands {
    Single(String),
    List(Vec<String>),
}

impl TaskCommands {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            TaskCommands::Single(cmd) => vec![cmd.clone()],
            TaskCommands::List(cmds) => cmds.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub description: Option<String>,
    pub cmds: TaskCommands,
    #[serde(default)]
    pub when: Condition,
    /// Seconds; 0 disables the timeout for this task.
    pub timeout: Option<u64>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub best_effort: bool,
    /// Binaries checked on PATH before the task runs.
    #[serde(default)]
    pub requires: Vec<String>,
}

impl TaskSpec {
    pub fn to_task(&self, shell: &str, default_timeout: Duration) -> Task {
        let action = CommandAction::new(self.cmds.to_vec(), shell.to_string());
        let mut task = Task::new(&self.id, Box::new(action))
            .with_condition(self.when.clone())
            .with_retries(self.retries);
        // Some(0) disables the timeout entirely; absent means the default.
        match self.timeout {
            Some(0) => task.timeout = None,
            Some(secs) => task = task.with_timeout(Duration::from_secs(secs)),
            None => task = task.with_timeout(default_timeout),
        }
        if self.best_effort {
            task = task.best_effort();
        }
        task.description = self.description.clone();
        task.requires = self.requires.clone();
        task
    }
}

impl UpkeepConfig {
    pub fn default_timeout(&self) -> Duration {
        let secs = self
            .project
            .as_ref()
            .and_then(|p| p.default_timeout)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    /// Process env overlaid with [env] (which .env already overrode during
    /// loading), so the file wins over the config which wins over the shell.
    pub fn merged_env(&self) -> HashMap<String, String> {
        let mut merged: HashMap<String, String> = env::vars().collect();
        for (key, val) in &self.env {
            merged.insert(key.clone(), val.clone());
        }
        merged
    }
}

pub fn load_config(dir: &Path) -> Result<UpkeepConfig> {
    let config_path = dir.join(CONFIG_FILE);
    if !config_path.exists() {
        bail!("❌ Critical: '{}' not found in {:?}.", CONFIG_FILE, dir);
    }
    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read {}", CONFIG_FILE))?;

    // 1. Parse upkeep.toml (Base Layer)
    let mut config: UpkeepConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", CONFIG_FILE))?;

    if !config.env.is_empty() {
        let mut keys: Vec<String> = config.env.keys().cloned().collect();
        keys.sort();
        config.env_sources.push((CONFIG_FILE.to_string(), keys));
    }

    for spec in &config.tasks {
        if spec.id.trim().is_empty() {
            bail!("❌ Configuration Error: every [[task]] needs a non-empty id.");
        }
        if spec.cmds.to_vec().is_empty() {
            bail!("❌ Configuration Error: task '{}' has no commands.", spec.id);
        }
    }

    // 2. Load .env using dotenvy (Override Layer)
    // Determines filename: .env or .env.prod based on UPKEEP_ENV
    let env_filename = env::var("UPKEEP_ENV")
        .map(|v| format!(".env.{}", v))
        .unwrap_or_else(|_| ".env".to_string());

    let env_path = dir.join(&env_filename);

    if env_path.exists() {
        eprintln!("{} Loading environment from: {}", "🌿".green(), env_filename.bold());

        let mut keys = Vec::new();
        for item in dotenvy::from_path_iter(&env_path)? {
            let (key, val) = item?;
            // .env overrides upkeep.toml
            config.env.insert(key.clone(), val);
            keys.push(key);
        }
        keys.sort();
        config.env_sources.push((env_filename, keys));
    }

    Ok(config)
}
