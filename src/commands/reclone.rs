//! The `reclone` command: replays saved clone invocations.
//!
//! Reads a YAML table mapping keys to `gitfleet clone …` command lines.
//! Only clone command lines are permitted, and token values are scrubbed
//! from anything echoed to the terminal.

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::colorlog;

#[derive(Args, Debug, Default)]
pub struct RecloneArgs {
    /// Keys to run; with none given, every entry runs
    pub keys: Vec<String>,
    /// Path to the reclone configuration file
    #[arg(long)]
    pub reclone_path: Option<String>,
    /// Quiet logging output, shows a spinner instead of child output
    #[arg(long)]
    pub quiet: bool,
    /// Print the configured commands (tokens scrubbed) and exit
    #[arg(long)]
    pub list: bool,
    /// Only use environment variables to configure the child clones
    #[arg(long)]
    pub env_config_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct RecloneEntry {
    pub cmd: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub post_exec_script: Option<String>,
}

pub type RecloneMap = BTreeMap<String, RecloneEntry>;

pub fn reclone_config_path(args: &RecloneArgs) -> PathBuf {
    if let Some(path) = &args.reclone_path {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var("GITFLEET_RECLONE_PATH") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".config")
        .join("gitfleet")
        .join("reclone.yaml")
}

pub fn load_reclone_map(path: &PathBuf) -> Result<RecloneMap> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("could not read reclone config {}", path.display()))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("could not parse reclone config {}", path.display()))
}

/// Scrubs token values from a command line before it is echoed anywhere.
pub fn sanitize_cmd(cmd: &str) -> String {
    let mut sanitized = cmd.to_string();
    for marker in ["-t=", "--token=", "-t ", "--token "] {
        if let Some(idx) = sanitized.find(marker) {
            let value_start = idx + marker.len();
            let rest = &sanitized[value_start..];
            let value_end = rest.find(' ').map(|i| value_start + i).unwrap_or(sanitized.len());
            sanitized.replace_range(value_start..value_end, "XXXXXXX");
        }
    }
    sanitized
}

pub fn run(args: RecloneArgs) -> Result<i32> {
    let path = reclone_config_path(&args);
    let map = load_reclone_map(&path)?;

    if args.list {
        colorlog::print_info("**************************************************************");
        colorlog::print_info("**** Available reclone commands and optional descriptions ****");
        colorlog::print_info("**************************************************************");
        println!();
        for (key, entry) in &map {
            colorlog::print_info(format!("- {key}"));
            if let Some(description) = &entry.description {
                colorlog::print_subtle_info(format!("    description: {description}"));
            }
            colorlog::print_subtle_info(format!("    cmd: {}", sanitize_cmd(&entry.cmd)));
            println!();
        }
        return Ok(0);
    }

    let selected: Vec<&String> = if args.keys.is_empty() {
        map.keys().collect()
    } else {
        for key in &args.keys {
            if !map.contains_key(key) {
                bail!("the key '{key}' was not found in {}", path.display());
            }
        }
        args.keys.iter().collect()
    };

    for key in &selected {
        run_single(&map[key.as_str()], key.as_str(), &args)?;
    }

    println!();
    colorlog::print_success("Completed! The following reclones were ran successfully...");
    for key in &selected {
        colorlog::print_success(format!("  * {key}"));
    }
    Ok(0)
}

fn run_single(entry: &RecloneEntry, key: &str, args: &RecloneArgs) -> Result<()> {
    let words: Vec<&str> = entry.cmd.split_whitespace().collect();
    if words.len() < 2 || words[0] != "gitfleet" || words[1] != "clone" {
        bail!("only gitfleet clone commands are permitted in the reclone config");
    }

    let safe_cmd = sanitize_cmd(&entry.cmd);
    if !args.quiet {
        println!();
        colorlog::print_info(format!("Running reclone: {key}"));
        if let Some(description) = &entry.description {
            colorlog::print_info(format!("Description: {description}"));
        }
        colorlog::print_info(format!("> {safe_cmd}"));
    }

    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("gitfleet"));
    let mut child_cmd = Command::new(exe);
    child_cmd.args(&words[1..]);

    // The saved command line is the configuration of record; ambient
    // GITFLEET_ variables from this process would silently override it.
    if !args.env_config_only {
        for (key, _) in std::env::vars() {
            let keep = matches!(
                key.as_str(),
                "GITFLEET_COLOR" | "GITFLEET_RECLONE_PATH" | "GITFLEET_RECLONE_QUIET"
            );
            if key.starts_with("GITFLEET_") && !keep {
                child_cmd.env_remove(&key);
            }
        }
    }

    let spinner = if args.quiet {
        child_cmd.stdout(Stdio::null()).stderr(Stdio::null());
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner());
        spinner.set_message(format!("recloning {key}"));
        spinner.enable_steady_tick(Duration::from_millis(100));
        Some(spinner)
    } else {
        None
    };

    let status = child_cmd
        .status()
        .with_context(|| format!("could not start clone command: {safe_cmd}"))?;

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let status_word = if status.success() { "success" } else { "fail" };
    if let Some(script) = &entry.post_exec_script {
        let post = Command::new(script).arg(status_word).arg(key).status();
        if let Err(err) = post {
            colorlog::print_error(format!(
                "Error running post_exec_script {script}: {err}"
            ));
        }
    }

    if !status.success() {
        bail!("clone command exited non-zero: {safe_cmd}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_cmd_scrubs_token_forms() {
        assert_eq!(
            sanitize_cmd("gitfleet clone org -t=abc123 --backup"),
            "gitfleet clone org -t=XXXXXXX --backup"
        );
        assert_eq!(
            sanitize_cmd("gitfleet clone org --token secret"),
            "gitfleet clone org --token XXXXXXX"
        );
        assert_eq!(
            sanitize_cmd("gitfleet clone org --token=secret --prune"),
            "gitfleet clone org --token=XXXXXXX --prune"
        );
    }

    #[test]
    fn test_sanitize_cmd_leaves_tokenless_commands() {
        let cmd = "gitfleet clone org --backup";
        assert_eq!(sanitize_cmd(cmd), cmd);
    }

    #[test]
    fn test_reclone_map_parses_yaml() {
        let yaml = r#"
prod:
  cmd: "gitfleet clone my-org --backup"
  description: nightly backup
lab:
  cmd: "gitfleet clone lab-org"
  post_exec_script: /usr/local/bin/notify
"#;
        let map: RecloneMap = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["prod"].description.as_deref(), Some("nightly backup"));
        assert_eq!(
            map["lab"].post_exec_script.as_deref(),
            Some("/usr/local/bin/notify")
        );
    }
}
