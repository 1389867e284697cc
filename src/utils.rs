use regex::Regex;
use std::collections::HashMap;
use std::env;

/// Replaces ${VAR} references with values from the merged env map.
/// Unknown variables expand to the empty string (shell behavior).
pub fn interpolate_env(cmd_template: &str, env_vars: &HashMap<String, String>) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    re.replace_all(cmd_template, |caps: &regex::Captures| {
        env_vars.get(&caps[1]).cloned().unwrap_or_default()
    })
    .into_owned()
}

/// True if the command line needs a shell (pipes, redirects, expansion...).
/// Metachar-free lines are split with shell-words and exec'd directly.
pub fn needs_shell(cmd: &str) -> bool {
    cmd.chars()
        .any(|c| matches!(c, '|' | '&' | ';' | '<' | '>' | '$' | '*' | '?' | '(' | ')' | '`' | '~'))
}

pub fn detect_shell(config_shell: Option<&String>) -> String {
    config_shell
        .cloned()
        .or_else(|| env::var("SHELL").ok())
        .unwrap_or_else(|| if cfg!(windows) { "cmd".to_string() } else { "sh".to_string() })
}

/// Flag used to hand a command string to the detected shell.
/// Simple heuristic: "cmd" or "cmd.exe" uses /C, others use -c.
pub fn shell_flag(shell_cmd: &str) -> &'static str {
    if shell_cmd.contains("cmd") && !shell_cmd.contains("sh") {
        "/C"
    } else {
        "-c"
    }
}

pub fn binary_available(name: &str) -> bool {
    which::which(name).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env() {
        let mut env = HashMap::new();
        env.insert("BACKUP_DIR".to_string(), "/srv/backups".to_string());
        env.insert("DB".to_string(), "prod".to_string());

        let out = interpolate_env("pg_dump ${DB} -f ${BACKUP_DIR}/dump.sql", &env);
        assert_eq!(out, "pg_dump prod -f /srv/backups/dump.sql");
    }

    #[test]
    fn test_interpolate_env_unknown_is_empty() {
        let env = HashMap::new();
        assert_eq!(interpolate_env("echo ${NOPE}!", &env), "echo !");
    }

    #[test]
    fn test_interpolate_env_leaves_bare_dollar_alone() {
        // $VAR without braces is left for the shell to expand at runtime.
        let env = HashMap::new();
        assert_eq!(interpolate_env("echo $HOME", &env), "echo $HOME");
    }

    #[test]
    fn test_needs_shell() {
        assert!(needs_shell("docker ps -q | xargs docker rm"));
        assert!(needs_shell("echo hi > /tmp/out"));
        assert!(needs_shell("du -sh /srv/*"));
        assert!(!needs_shell("docker system prune -f"));
        assert!(!needs_shell("mkdir -p /srv/storage/media"));
    }

    #[test]
    fn test_shell_flag() {
        assert_eq!(shell_flag("sh"), "-c");
        assert_eq!(shell_flag("/bin/bash"), "-c");
        assert_eq!(shell_flag("cmd.exe"), "/C");
        assert_eq!(shell_flag("powershell"), "-c");
    }
}
