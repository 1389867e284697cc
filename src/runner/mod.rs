pub mod condition;
pub mod exec;
pub mod task;

use colored::*;
use log::{error, info, warn};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::context::RunContext;
use crate::error::RunnerError;
use crate::logger::{LogSink, write_task_capture};
use self::task::{CapturedOutput, RunReport, RunStatus, Task, TaskResult, TaskStatus};

#[derive(Default)]
pub struct RunnerOptions {
    /// Keep going after a non-best-effort failure and report the aggregate.
    pub continue_on_error: bool,
    /// Where per-task capture files go; None keeps output inline.
    pub log_dir: Option<PathBuf>,
}

/// Sequential maintenance task runner. Tasks execute one at a time in
/// registration order; there is no parallelism by design.
pub struct Runner {
    plan: Vec<Task>,
    ids: HashSet<String>,
    opts: RunnerOptions,
    sink: Box<dyn LogSink>,
    cancel: Arc<AtomicBool>,
}

impl Runner {
    pub fn new(opts: RunnerOptions, sink: Box<dyn LogSink>) -> Self {
        Self {
            plan: Vec::new(),
            ids: HashSet::new(),
            opts,
            sink,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag a signal handler flips to stop the run.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.plan.is_empty()
    }

    /// Appends a task to the ordered execution plan.
    pub fn register(&mut self, task: Task) -> Result<(), RunnerError> {
        if !self.ids.insert(task.id.clone()) {
            return Err(RunnerError::DuplicateTask(task.id));
        }
        self.plan.push(task);
        Ok(())
    }

    /// Executes the plan against the immutable context and returns the
    /// report. Command failures never escape this function; they end up as
    /// failed results and, unless `continue_on_error` is set, truncate the
    /// plan at the failing task. An interrupt records the in-flight task as
    /// cancelled and every remaining task as skipped.
    pub fn run(&self, ctx: &RunContext) -> RunReport {
        let started_at = ctx.now;
        let mut results: Vec<TaskResult> = Vec::new();
        let mut aborted = false;
        let mut interrupted = false;

        for (idx, task) in self.plan.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                interrupted = true;
                self.skip_remaining(&mut results, idx);
                break;
            }

            let result = self.run_task(task, ctx);
            self.sink_task_end(&result);
            let status = result.status;
            results.push(result);

            match status {
                TaskStatus::Cancelled => {
                    self.skip_remaining(&mut results, idx + 1);
                    break;
                }
                TaskStatus::Failure if !task.best_effort && !self.opts.continue_on_error => {
                    // First unrecoverable failure ends the run immediately;
                    // remaining tasks are not observed at all.
                    aborted = true;
                    break;
                }
                _ => {}
            }
        }

        let mut status = overall_status(&results);
        if interrupted {
            status = RunStatus::Cancelled;
        }
        let report = RunReport {
            results,
            status,
            started_at,
            finished_at: chrono::Local::now(),
        };

        if aborted {
            error!("{} Run aborted after first failure.", "🛑".red());
        }
        self.sink_report(&report);
        report
    }

    fn run_task(&self, task: &Task, ctx: &RunContext) -> TaskResult {
        let started_at = chrono::Local::now();
        let mut result = TaskResult {
            id: task.id.clone(),
            status: TaskStatus::Skipped,
            started_at,
            finished_at: started_at,
            output: None,
            error: None,
            best_effort: task.best_effort,
        };

        match task.condition.evaluate(ctx) {
            Ok(true) => {}
            Ok(false) => {
                info!("{} Task '{}' is gated off. Skipping.", "✨".green(), task.id.bold());
                self.sink
                    .line(&format!("task '{}' skipped (condition not met)", task.id));
                result.finished_at = chrono::Local::now();
                return result;
            }
            Err(e) => {
                error!("{} Task '{}' condition error: {}", "❌".red(), task.id.bold(), e);
                result.status = TaskStatus::Failure;
                result.error = Some(e.to_string());
                result.finished_at = chrono::Local::now();
                return result;
            }
        }

        if let Some(missing) = task
            .requires
            .iter()
            .find(|bin| !crate::utils::binary_available(bin))
        {
            let e = RunnerError::MissingBinary(missing.clone());
            error!("{} Task '{}' failed: {}", "❌".red(), task.id.bold(), e);
            result.status = TaskStatus::Failure;
            result.error = Some(e.to_string());
            result.finished_at = chrono::Local::now();
            return result;
        }

        info!("{} Running task: {}", "⚡".yellow(), task.id.bold());
        self.sink.line(&format!("task '{}' started", task.id));

        let timeout = task.timeout;
        let mut attempt = 0;
        loop {
            match task.action.invoke(ctx, timeout, &self.cancel) {
                Ok(out) if out.exit_code == 0 => {
                    result.status = TaskStatus::Success;
                    result.output = self.capture(task, &out.log, &result, 0, ctx);
                    break;
                }
                Ok(out) => {
                    let cmd = out.failed_cmd.clone().unwrap_or_default();
                    let e = RunnerError::Command {
                        cmd,
                        code: out.exit_code,
                    };
                    result.output = self.capture(task, &out.log, &result, out.exit_code, ctx);
                    if attempt < task.retries {
                        attempt += 1;
                        warn!(
                            "{} Task '{}' failed ({}), retry {}/{}",
                            "⚠️".yellow(),
                            task.id.bold(),
                            e,
                            attempt,
                            task.retries
                        );
                        continue;
                    }
                    error!("{} Task '{}' failed: {}", "❌".red(), task.id.bold(), e);
                    result.status = TaskStatus::Failure;
                    result.error = Some(e.to_string());
                    break;
                }
                Err(RunnerError::Interrupted) => {
                    warn!("{} Task '{}' interrupted.", "🛑".red(), task.id.bold());
                    result.status = TaskStatus::Cancelled;
                    result.error = Some(RunnerError::Interrupted.to_string());
                    break;
                }
                Err(e) => {
                    if attempt < task.retries {
                        attempt += 1;
                        warn!(
                            "{} Task '{}' failed ({}), retry {}/{}",
                            "⚠️".yellow(),
                            task.id.bold(),
                            e,
                            attempt,
                            task.retries
                        );
                        continue;
                    }
                    error!("{} Task '{}' failed: {}", "❌".red(), task.id.bold(), e);
                    result.status = TaskStatus::Failure;
                    result.error = Some(e.to_string());
                    break;
                }
            }
        }

        result.finished_at = chrono::Local::now();
        result
    }

    fn capture(
        &self,
        task: &Task,
        log: &str,
        result: &TaskResult,
        exit_code: i32,
        ctx: &RunContext,
    ) -> Option<CapturedOutput> {
        if log.is_empty() {
            return None;
        }
        if let Some(dir) = &self.opts.log_dir {
            let duration = (chrono::Local::now() - result.started_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let cmd_str = task.description.as_deref().unwrap_or("-");
            match write_task_capture(dir, &task.id, cmd_str, log, duration, exit_code, &ctx.env) {
                Ok(path) => return Some(CapturedOutput::File(path)),
                Err(e) => warn!("{} Could not write capture for '{}': {}", "⚠️".yellow(), task.id, e),
            }
        }
        Some(CapturedOutput::Inline(log.to_string()))
    }

    fn skip_remaining(&self, results: &mut Vec<TaskResult>, from: usize) {
        let now = chrono::Local::now();
        for task in &self.plan[from..] {
            self.sink
                .line(&format!("task '{}' skipped (run interrupted)", task.id));
            results.push(TaskResult {
                id: task.id.clone(),
                status: TaskStatus::Skipped,
                started_at: now,
                finished_at: now,
                output: None,
                error: None,
                best_effort: task.best_effort,
            });
        }
    }

    fn sink_task_end(&self, result: &TaskResult) {
        match result.status {
            TaskStatus::Success => self.sink.line(&format!(
                "task '{}' finished: success ({} ms)",
                result.id,
                result.duration().as_millis()
            )),
            TaskStatus::Failure => self.sink.line(&format!(
                "task '{}' failed: {}",
                result.id,
                result.error.as_deref().unwrap_or("unknown error")
            )),
            TaskStatus::Cancelled => self.sink.line(&format!("task '{}' cancelled", result.id)),
            TaskStatus::Skipped => {} // already logged with the reason
        }
    }

    fn sink_report(&self, report: &RunReport) {
        let listing: Vec<String> = report
            .results
            .iter()
            .map(|r| format!("{}={}", r.id, r.status.as_str()))
            .collect();
        self.sink.line(&format!("report: {}", listing.join(" ")));
        self.sink.line(&format!(
            "run finished: {} ({} success, {} failure, {} skipped, {} cancelled)",
            report.status.as_str(),
            report.count(TaskStatus::Success),
            report.count(TaskStatus::Failure),
            report.count(TaskStatus::Skipped),
            report.count(TaskStatus::Cancelled),
        ));
    }
}

fn overall_status(results: &[TaskResult]) -> RunStatus {
    if results.iter().any(|r| r.status == TaskStatus::Cancelled) {
        return RunStatus::Cancelled;
    }
    let failed = results
        .iter()
        .any(|r| r.status == TaskStatus::Failure && !r.best_effort);
    if failed { RunStatus::Failure } else { RunStatus::Success }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::test_sink::MemorySink;
    use crate::runner::condition::Condition;
    use crate::runner::task::ActionOutput;
    use chrono::Local;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn ctx() -> RunContext {
        RunContext::new(Local::now(), HashMap::new())
    }

    fn runner() -> Runner {
        Runner::new(RunnerOptions::default(), Box::new(crate::logger::NullSink))
    }

    fn action_fn<F>(f: F) -> Box<dyn crate::runner::task::TaskAction>
    where
        F: Fn(&RunContext) -> Result<ActionOutput, RunnerError> + Send + Sync + 'static,
    {
        Box::new(f)
    }

    fn ok_task(id: &str, trace: Arc<Mutex<Vec<String>>>) -> Task {
        let id_owned = id.to_string();
        Task::new(
            id,
            action_fn(move |_| {
                trace.lock().unwrap().push(id_owned.clone());
                Ok(ActionOutput::success(String::new()))
            }),
        )
    }

    fn failing_task(id: &str) -> Task {
        Task::new(
            id,
            action_fn(|_| {
                Ok(ActionOutput {
                    exit_code: 1,
                    log: String::new(),
                    failed_cmd: Some("false".to_string()),
                })
            }),
        )
    }

    #[test]
    fn test_tasks_run_in_declared_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut runner = runner();
        for id in ["c", "a", "b"] {
            runner.register(ok_task(id, trace.clone())).unwrap();
        }

        let report = runner.run(&ctx());

        assert_eq!(*trace.lock().unwrap(), vec!["c", "a", "b"]);
        let ids: Vec<&str> = report.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(report.status, RunStatus::Success);
    }

    #[test]
    fn test_duplicate_task_id_is_rejected() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut runner = runner();
        runner.register(ok_task("db-backup", trace.clone())).unwrap();
        let err = runner.register(ok_task("db-backup", trace)).unwrap_err();
        assert!(matches!(err, RunnerError::DuplicateTask(id) if id == "db-backup"));
    }

    #[test]
    fn test_gated_off_task_is_skipped_not_failed() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut runner = runner();
        runner
            .register(ok_task("weekly", trace.clone()).with_condition(Condition {
                flag: Some("update-packages".to_string()),
                ..Default::default()
            }))
            .unwrap();

        let report = runner.run(&ctx());

        assert!(trace.lock().unwrap().is_empty());
        assert_eq!(report.results[0].status, TaskStatus::Skipped);
        assert_eq!(report.status, RunStatus::Success);
    }

    #[test]
    fn test_flag_enables_gated_task() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut runner = runner();
        runner
            .register(ok_task("package-update", trace.clone()).with_condition(Condition {
                flag: Some("update-packages".to_string()),
                ..Default::default()
            }))
            .unwrap();

        let report = runner.run(&ctx().with_flag("--update-packages"));

        assert_eq!(*trace.lock().unwrap(), vec!["package-update"]);
        assert_eq!(report.results[0].status, TaskStatus::Success);
    }

    #[test]
    fn test_first_failure_truncates_the_plan() {
        // A succeeds, B is gated off, C fails, D must never be observed.
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut runner = runner();
        runner.register(ok_task("a", trace.clone())).unwrap();
        runner
            .register(ok_task("b", trace.clone()).with_condition(Condition {
                flag: Some("never".to_string()),
                ..Default::default()
            }))
            .unwrap();
        runner.register(failing_task("c")).unwrap();
        runner.register(ok_task("d", trace.clone())).unwrap();

        let report = runner.run(&ctx());

        assert_eq!(*trace.lock().unwrap(), vec!["a"]);
        let statuses: Vec<(&str, TaskStatus)> = report
            .results
            .iter()
            .map(|r| (r.id.as_str(), r.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("a", TaskStatus::Success),
                ("b", TaskStatus::Skipped),
                ("c", TaskStatus::Failure),
            ]
        );
        assert_eq!(report.status, RunStatus::Failure);
    }

    #[test]
    fn test_continue_on_error_reports_aggregate_failure() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut runner = Runner::new(
            RunnerOptions {
                continue_on_error: true,
                ..Default::default()
            },
            Box::new(crate::logger::NullSink),
        );
        runner.register(failing_task("c")).unwrap();
        runner.register(ok_task("d", trace.clone())).unwrap();

        let report = runner.run(&ctx());

        assert_eq!(*trace.lock().unwrap(), vec!["d"]);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.status, RunStatus::Failure);
    }

    #[test]
    fn test_best_effort_failure_does_not_abort_or_fail_the_run() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut runner = runner();
        runner.register(failing_task("backup-prune").best_effort()).unwrap();
        runner.register(ok_task("d", trace.clone())).unwrap();

        let report = runner.run(&ctx());

        assert_eq!(*trace.lock().unwrap(), vec!["d"]);
        assert_eq!(report.results[0].status, TaskStatus::Failure);
        assert_eq!(report.status, RunStatus::Success);
    }

    #[test]
    fn test_retries_rerun_immediately_until_success() {
        let attempts = Arc::new(Mutex::new(0u32));
        let attempts_clone = attempts.clone();
        let mut runner = runner();
        runner
            .register(
                Task::new(
                    "flaky",
                    action_fn(move |_| {
                        let mut n = attempts_clone.lock().unwrap();
                        *n += 1;
                        if *n < 3 {
                            Ok(ActionOutput {
                                exit_code: 1,
                                log: String::new(),
                                failed_cmd: Some("flaky-cmd".to_string()),
                            })
                        } else {
                            Ok(ActionOutput::success(String::new()))
                        }
                    }),
                )
                .with_retries(2),
            )
            .unwrap();

        let report = runner.run(&ctx());

        assert_eq!(*attempts.lock().unwrap(), 3);
        assert_eq!(report.results[0].status, TaskStatus::Success);
    }

    #[test]
    fn test_retries_exhausted_is_a_failure() {
        let attempts = Arc::new(Mutex::new(0u32));
        let attempts_clone = attempts.clone();
        let mut runner = runner();
        runner
            .register(
                Task::new(
                    "flaky",
                    action_fn(move |_| {
                        *attempts_clone.lock().unwrap() += 1;
                        Err(RunnerError::Command {
                            cmd: "flaky-cmd".to_string(),
                            code: 1,
                        })
                    }),
                )
                .with_retries(1),
            )
            .unwrap();

        let report = runner.run(&ctx());

        assert_eq!(*attempts.lock().unwrap(), 2);
        assert_eq!(report.results[0].status, TaskStatus::Failure);
    }

    #[test]
    fn test_condition_error_is_a_task_failure() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut runner = runner();
        runner
            .register(ok_task("bad", trace.clone()).with_condition(Condition {
                weekday: Some(9),
                ..Default::default()
            }))
            .unwrap();

        let report = runner.run(&ctx());

        assert!(trace.lock().unwrap().is_empty());
        assert_eq!(report.results[0].status, TaskStatus::Failure);
        assert!(report.results[0].error.as_deref().unwrap().contains("condition"));
    }

    #[test]
    fn test_missing_required_binary_is_a_task_failure() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut runner = runner();
        let mut task = ok_task("needs-tool", trace.clone());
        task.requires = vec!["definitely-not-a-real-binary-upkeep".to_string()];
        runner.register(task).unwrap();

        let report = runner.run(&ctx());

        assert!(trace.lock().unwrap().is_empty());
        assert_eq!(report.results[0].status, TaskStatus::Failure);
        assert!(report.results[0].error.as_deref().unwrap().contains("not found"));
    }

    #[test]
    fn test_interrupt_cancels_in_flight_and_skips_the_rest() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut runner = runner();
        let cancel = runner.cancel_flag();
        runner
            .register(Task::new(
                "long",
                action_fn(move |_| {
                    cancel.store(true, Ordering::SeqCst);
                    Err(RunnerError::Interrupted)
                }),
            ))
            .unwrap();
        runner.register(ok_task("after", trace.clone())).unwrap();

        let report = runner.run(&ctx());

        assert!(trace.lock().unwrap().is_empty());
        assert_eq!(report.results[0].status, TaskStatus::Cancelled);
        assert_eq!(report.results[1].status, TaskStatus::Skipped);
        assert_eq!(report.status, RunStatus::Cancelled);
    }

    #[test]
    fn test_interrupt_between_tasks_skips_everything_left() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut runner = runner();
        runner.cancel_flag().store(true, Ordering::SeqCst);
        runner.register(ok_task("a", trace.clone())).unwrap();
        runner.register(ok_task("b", trace.clone())).unwrap();

        let report = runner.run(&ctx());

        assert!(trace.lock().unwrap().is_empty());
        assert!(report.results.iter().all(|r| r.status == TaskStatus::Skipped));
        assert_eq!(report.status, RunStatus::Cancelled);
    }

    #[test]
    fn test_sink_receives_start_end_and_report_lines() {
        let sink = Arc::new(MemorySink::new());
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut runner = Runner::new(RunnerOptions::default(), Box::new(sink.clone()));
        runner.register(ok_task("db-backup", trace)).unwrap();
        runner.run(&ctx());

        let lines = sink.collected();
        assert!(lines.iter().any(|l| l == "task 'db-backup' started"));
        assert!(lines.iter().any(|l| l.starts_with("task 'db-backup' finished: success")));
        assert!(lines.iter().any(|l| l.starts_with("report: db-backup=success")));
        assert!(lines.iter().any(|l| l.starts_with("run finished: success")));
    }

    #[cfg(unix)]
    #[test]
    fn test_timed_out_command_fails_and_aborts_the_run() {
        use crate::runner::exec::CommandAction;

        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut runner = runner();
        runner
            .register(
                Task::new(
                    "sleepy",
                    Box::new(CommandAction::new(vec!["sleep 30".to_string()], "sh".to_string())),
                )
                .with_timeout(Duration::from_millis(300)),
            )
            .unwrap();
        runner.register(ok_task("after", trace.clone())).unwrap();

        let report = runner.run(&ctx());

        assert!(trace.lock().unwrap().is_empty());
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].status, TaskStatus::Failure);
        assert!(report.results[0].error.as_deref().unwrap().contains("timed out"));
        assert_eq!(report.status, RunStatus::Failure);
    }

    #[test]
    fn test_repeat_runs_are_structurally_identical() {
        fn build() -> Runner {
            let mut r = Runner::new(RunnerOptions::default(), Box::new(crate::logger::NullSink));
            r.register(Task::new(
                "a",
                action_fn(|_| Ok(ActionOutput::success("out".to_string()))),
            ))
            .unwrap();
            r.register(failing_task("b").best_effort()).unwrap();
            r
        }

        let context = ctx();
        let first = build().run(&context);
        let second = build().run(&context);

        let shape = |report: &RunReport| {
            report
                .results
                .iter()
                .map(|r| (r.id.clone(), r.status, r.error.clone(), r.output.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(shape(&first), shape(&second));
        assert_eq!(first.status, second.status);
    }
}
