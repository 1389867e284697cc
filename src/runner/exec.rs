use colored::*;
use log::info;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

use crate::context::RunContext;
use crate::error::RunnerError;
use crate::runner::task::{ActionOutput, TaskAction};
use crate::utils::{interpolate_env, needs_shell, shell_flag};

/// Poll granularity for the wait loop; bounds how late a timeout or an
/// interrupt is observed.
const WAIT_SLICE: Duration = Duration::from_millis(200);

/// Runs a configured command sequence through the shell (or directly when
/// the line has no shell metacharacters), with a hard per-task deadline.
pub struct CommandAction {
    pub cmds: Vec<String>,
    pub shell: String,
}

impl CommandAction {
    pub fn new(cmds: Vec<String>, shell: String) -> Self {
        Self { cmds, shell }
    }

    fn build_command(&self, final_cmd: &str) -> Result<Command, RunnerError> {
        let mut command = if needs_shell(final_cmd) {
            let mut c = Command::new(&self.shell);
            c.arg(shell_flag(&self.shell)).arg(final_cmd);
            c
        } else {
            let words = shell_words::split(final_cmd).map_err(|e| {
                RunnerError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("cannot split '{}': {}", final_cmd, e),
                ))
            })?;
            if words.is_empty() {
                return Err(RunnerError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "empty command line",
                )));
            }
            let mut c = Command::new(&words[0]);
            c.args(&words[1..]);
            c
        };

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so a timeout kill takes the whole pipeline down.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        Ok(command)
    }
}

impl TaskAction for CommandAction {
    fn invoke(
        &self,
        ctx: &RunContext,
        timeout: Option<Duration>,
        cancel: &AtomicBool,
    ) -> Result<ActionOutput, RunnerError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut log = String::new();

        for cmd in &self.cmds {
            let final_cmd = interpolate_env(cmd, &ctx.env);

            if ctx.dry_run {
                println!("{} [DRY-RUN] Executing: {}", "::".yellow(), final_cmd);
                log.push_str(&format!("[DRY-RUN] {}\n", final_cmd));
                continue;
            }

            info!("{} Executing: {}", "::".blue(), final_cmd);
            log.push_str(&format!("$ {}\n", final_cmd));

            let mut command = self.build_command(&final_cmd)?;
            command.envs(&ctx.env);

            let mut child = command.spawn().map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    let bin = final_cmd.split_whitespace().next().unwrap_or(&final_cmd);
                    RunnerError::MissingBinary(bin.to_string())
                } else {
                    RunnerError::Io(e)
                }
            })?;

            let drain_out = drain(child.stdout.take());
            let drain_err = drain(child.stderr.take());

            let status = loop {
                if cancel.load(Ordering::SeqCst) {
                    kill_group(&mut child);
                    let _ = child.wait();
                    join_into(&mut log, drain_out, drain_err);
                    return Err(RunnerError::Interrupted);
                }

                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        kill_group(&mut child);
                        let _ = child.wait();
                        join_into(&mut log, drain_out, drain_err);
                        return Err(RunnerError::Timeout(timeout.unwrap_or_default()));
                    }
                }

                match child.wait_timeout(WAIT_SLICE)? {
                    Some(status) => break status,
                    None => continue,
                }
            };

            join_into(&mut log, drain_out, drain_err);

            let exit_code = status.code().unwrap_or(1);
            if exit_code != 0 {
                return Ok(ActionOutput {
                    exit_code,
                    log,
                    failed_cmd: Some(final_cmd),
                });
            }
        }

        Ok(ActionOutput::success(log))
    }
}

type Drain = Option<thread::JoinHandle<String>>;

fn drain<R: Read + Send + 'static>(source: Option<R>) -> Drain {
    source.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).ok();
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_into(log: &mut String, out: Drain, err: Drain) {
    for handle in [out, err].into_iter().flatten() {
        if let Ok(chunk) = handle.join() {
            log.push_str(&chunk);
        }
    }
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;
    if killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL).is_err() {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}
