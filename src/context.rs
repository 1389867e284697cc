use chrono::{DateTime, Local};
use std::collections::{BTreeSet, HashMap};

/// Immutable per-invocation context handed to conditions and actions.
///
/// Built once by the run handler; tasks never mutate it, which keeps
/// condition evaluation deterministic and repeat runs comparable.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub now: DateTime<Local>,
    /// CLI mode flags, normalized without the leading dashes ("update-packages").
    pub flags: BTreeSet<String>,
    /// Merged environment: upkeep.toml [env] overlaid by .env via dotenvy.
    pub env: HashMap<String, String>,
    pub dry_run: bool,
}

impl RunContext {
    pub fn new(now: DateTime<Local>, env: HashMap<String, String>) -> Self {
        Self {
            now,
            flags: BTreeSet::new(),
            env,
            dry_run: false,
        }
    }

    pub fn with_flag(mut self, flag: &str) -> Self {
        self.flags.insert(flag.trim_start_matches('-').to_string());
        self
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag.trim_start_matches('-'))
    }

    pub fn env_is_set(&self, name: &str) -> bool {
        self.env.get(name).is_some_and(|v| !v.trim().is_empty())
    }
}
