use chrono::{Datelike, NaiveTime};
use serde::Deserialize;

use crate::context::RunContext;
use crate::error::RunnerError;

/// Declarative gate deciding whether a task runs in this invocation.
/// All present clauses must hold; an empty condition is always true.
///
/// Evaluation is a pure function of the context: same context, same answer.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    /// ISO weekday, 1 = Monday .. 7 = Sunday.
    pub weekday: Option<u32>,
    /// Maintenance window "HH:MM-HH:MM"; may span midnight ("22:00-02:00").
    pub window: Option<String>,
    /// CLI mode flag that must have been passed (without leading dashes).
    pub flag: Option<String>,
    /// Environment variable that must be set and non-empty.
    pub env_set: Option<String>,
}

impl Condition {
    pub fn always() -> Self {
        Self::default()
    }

    pub fn is_always(&self) -> bool {
        *self == Self::default()
    }

    pub fn evaluate(&self, ctx: &RunContext) -> Result<bool, RunnerError> {
        if let Some(weekday) = self.weekday {
            if !(1..=7).contains(&weekday) {
                return Err(RunnerError::Condition(format!(
                    "weekday must be 1..=7 (ISO), got {}",
                    weekday
                )));
            }
            if ctx.now.weekday().number_from_monday() != weekday {
                return Ok(false);
            }
        }

        if let Some(window) = &self.window {
            let (start, end) = parse_window(window)?;
            let now = ctx.now.time();
            let inside = if start <= end {
                now >= start && now < end
            } else {
                // Window spans midnight
                now >= start || now < end
            };
            if !inside {
                return Ok(false);
            }
        }

        if let Some(flag) = &self.flag {
            if !ctx.has_flag(flag) {
                return Ok(false);
            }
        }

        if let Some(name) = &self.env_set {
            if !ctx.env_is_set(name) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Human-readable summary for `upkeep list`.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(wd) = self.weekday {
            let name = match wd {
                1 => "Mon",
                2 => "Tue",
                3 => "Wed",
                4 => "Thu",
                5 => "Fri",
                6 => "Sat",
                7 => "Sun",
                _ => "?",
            };
            parts.push(format!("weekday {} ({})", wd, name));
        }
        if let Some(w) = &self.window {
            parts.push(format!("window {}", w));
        }
        if let Some(f) = &self.flag {
            parts.push(format!("--{}", f));
        }
        if let Some(e) = &self.env_set {
            parts.push(format!("env {}", e));
        }
        if parts.is_empty() {
            "always".to_string()
        } else {
            parts.join(", ")
        }
    }
}

fn parse_window(window: &str) -> Result<(NaiveTime, NaiveTime), RunnerError> {
    let (start_str, end_str) = window.split_once('-').ok_or_else(|| {
        RunnerError::Condition(format!("window '{}' is not of the form HH:MM-HH:MM", window))
    })?;

    let parse = |s: &str| {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map_err(|e| RunnerError::Condition(format!("bad time '{}' in window: {}", s, e)))
    };

    Ok((parse(start_str)?, parse(end_str)?))
}
