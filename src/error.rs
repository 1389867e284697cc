use std::time::Duration;
use thiserror::Error;

/// Errors produced by the runner core.
///
/// Command-class errors (`Command`, `MissingBinary`, `Timeout`) are caught
/// per-task and converted into a failed `TaskResult`; they only abort the
/// run when `continue_on_error` is off. `DuplicateTask` is fatal at
/// registration time.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("duplicate task id '{0}'")]
    DuplicateTask(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("command '{cmd}' exited with code {code}")]
    Command { cmd: String, code: i32 },

    #[error("required binary '{0}' not found on PATH")]
    MissingBinary(String),

    #[error("condition error: {0}")]
    Condition(String),

    #[error("run interrupted")]
    Interrupted,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
