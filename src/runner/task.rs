use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::context::RunContext;
use crate::error::RunnerError;
use crate::runner::condition::Condition;

/// What a finished action hands back to the runner. A nonzero exit code is
/// reported here rather than as an Err so the captured output survives;
/// the runner converts it into a Command failure.
#[derive(Debug)]
pub struct ActionOutput {
    pub exit_code: i32,
    /// Merged stdout/stderr of all commands run so far.
    pub log: String,
    /// The command that produced the nonzero exit, if any.
    pub failed_cmd: Option<String>,
}

impl ActionOutput {
    pub fn success(log: String) -> Self {
        Self {
            exit_code: 0,
            log,
            failed_cmd: None,
        }
    }
}

/// One executable unit of work. Implemented by `CommandAction` for
/// configured external commands and by closures in tests.
pub trait TaskAction: Send + Sync {
    fn invoke(
        &self,
        ctx: &RunContext,
        timeout: Option<Duration>,
        cancel: &AtomicBool,
    ) -> Result<ActionOutput, RunnerError>;
}

impl<F> TaskAction for F
where
    F: Fn(&RunContext) -> Result<ActionOutput, RunnerError> + Send + Sync,
{
    fn invoke(
        &self,
        ctx: &RunContext,
        _timeout: Option<Duration>,
        _cancel: &AtomicBool,
    ) -> Result<ActionOutput, RunnerError> {
        self(ctx)
    }
}

/// A maintenance task: condition-gated wrapper around one external
/// command sequence. Definitions are static for the whole invocation.
pub struct Task {
    pub id: String,
    pub description: Option<String>,
    pub condition: Condition,
    pub action: Box<dyn TaskAction>,
    pub timeout: Option<Duration>,
    pub retries: u32,
    pub best_effort: bool,
    /// Binaries that must resolve on PATH before the action runs.
    pub requires: Vec<String>,
}

impl Task {
    pub fn new(id: &str, action: Box<dyn TaskAction>) -> Self {
        Self {
            id: id.to_string(),
            description: None,
            condition: Condition::always(),
            action,
            timeout: None,
            retries: 0,
            best_effort: false,
            requires: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Success,
    Failure,
    Skipped,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Success => "success",
            TaskStatus::Failure => "failure",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Where the captured stdout/stderr of a task ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturedOutput {
    File(PathBuf),
    Inline(String),
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub id: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub output: Option<CapturedOutput>,
    pub error: Option<String>,
    pub best_effort: bool,
}

impl TaskResult {
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failure,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Aggregate outcome of one runner invocation. Fresh each run; persisted
/// only through the log sink and the metrics artifact.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub results: Vec<TaskResult>,
    pub status: RunStatus,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl RunReport {
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}
