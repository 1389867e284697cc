use anyhow::{Context, Result};
use blake3::Hasher;
use chrono::Local;
use regex::Regex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub fn strip_ansi(content: &str) -> String {
    let re = Regex::new(r"\x1b\[[0-9;]*m").unwrap();
    re.replace_all(content, "").to_string()
}

/// Append-only event sink. The runner writes one line per task start/end
/// plus the final report through this, so tests can swap in a memory sink
/// and production gets a single shared log file.
pub trait LogSink: Send + Sync {
    fn line(&self, message: &str);
}

/// Timestamped append-only file sink ("YYYY-MM-DD HH:MM:SS message").
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {:?}", path))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LogSink for FileSink {
    fn line(&self, message: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{} {}", stamp, message);
        }
    }
}

/// Discards everything. Used when no log file is configured.
pub struct NullSink;

impl LogSink for NullSink {
    fn line(&self, _message: &str) {}
}

/// Writes the captured output of one task execution to
/// `<log_dir>/<date>/HHMMSS_<task>_<hash>.log` and returns the path.
pub fn write_task_capture(
    log_dir: &Path,
    task_id: &str,
    cmd_str: &str,
    content: &str,
    duration: Duration,
    exit_code: i32,
    env_vars: &HashMap<String, String>,
) -> Result<PathBuf> {
    let now = Local::now();
    let date_str = now.format("%Y-%m-%d").to_string();
    let time_str = now.format("%H%M%S").to_string();

    // Short Hash
    let mut hasher = Hasher::new();
    hasher.update(task_id.as_bytes());
    hasher.update(time_str.as_bytes());
    let hash_full = hasher.finalize().to_hex().to_string();
    let short_hash = &hash_full[0..6];

    let filename = format!("{}_{}_{}.log", time_str, task_id.replace("/", "_"), short_hash);
    let capture_dir = log_dir.join(date_str);

    fs::create_dir_all(&capture_dir).context("Failed to create capture directory")?;
    let capture_path = capture_dir.join(filename);

    let mut file_content = String::new();

    // Header
    file_content.push_str("=== UPKEEP TASK LOG ===\n");
    file_content.push_str(&format!("Task: {}\n", task_id));
    file_content.push_str(&format!("Command: {}\n", cmd_str));
    file_content.push_str(&format!("Time: {}\n", now.to_rfc3339()));
    file_content.push_str("=== ENVIRONMENT SNAPSHOT ===\n");

    // Filter sensitive envs
    let mut sorted_keys: Vec<_> = env_vars.keys().collect();
    sorted_keys.sort();

    for k in sorted_keys {
        let v = &env_vars[k];
        let k_upper = k.to_uppercase();
        if k_upper.contains("KEY")
            || k_upper.contains("TOKEN")
            || k_upper.contains("PASS")
            || k_upper.contains("SECRET")
        {
            file_content.push_str(&format!("{} = [REDACTED]\n", k));
        } else {
            file_content.push_str(&format!("{} = {}\n", k, v));
        }
    }
    file_content.push_str("============================\n\n");

    // Body
    let body = strip_ansi(content);
    file_content.push_str(&body);
    if !body.ends_with('\n') {
        file_content.push('\n');
    }

    // Footer
    file_content.push_str("\n============================\n");
    file_content.push_str(&format!("Exit Code: {}\n", exit_code));
    file_content.push_str(&format!("Duration: {} ms\n", duration.as_millis()));
    file_content.push_str("============================\n");

    fs::write(&capture_path, file_content).context("Failed to write capture file")?;

    Ok(capture_path)
}

/// Housekeeping: drop dated capture directories older than `keep_days`.
/// Directory names are compared lexically, which works for %Y-%m-%d.
pub fn prune_old_captures(log_dir: &Path, keep_days: u32) -> Result<usize> {
    let cutoff = (Local::now() - chrono::Duration::days(i64::from(keep_days)))
        .format("%Y-%m-%d")
        .to_string();

    let pattern = format!("{}/*", log_dir.to_string_lossy());
    let mut removed = 0;
    for entry in glob::glob(&pattern)? {
        let path = match entry {
            Ok(p) => p,
            Err(_) => continue,
        };
        if !path.is_dir() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if name.as_str() < cutoff.as_str() {
            fs::remove_dir_all(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
