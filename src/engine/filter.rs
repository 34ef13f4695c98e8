//! Repository filtering.
//!
//! A chain of sieves applied in a fixed order, so the kept set for a given
//! input and configuration is reproducible regardless of input order.
//! Most sieves only remove entries; the target-repos sieve additionally
//! records entries that never matched anything so the engine can surface
//! them as info events.

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::scm::Repo;

/// Result of filtering: the kept set plus info events gathered on the way.
pub struct FilterOutcome {
    pub repos: Vec<Repo>,
    pub infos: Vec<String>,
}

/// Default location of the ignore file when no explicit path is set.
pub fn ignore_location(settings: &Settings) -> PathBuf {
    match &settings.ignore_path {
        Some(path) => PathBuf::from(path),
        None => default_config_dir().join("ignore"),
    }
}

/// Default location of the only file when no explicit path is set.
pub fn only_location(settings: &Settings) -> PathBuf {
    match &settings.only_path {
        Some(path) => PathBuf::from(path),
        None => default_config_dir().join("only"),
    }
}

fn default_config_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join("gitfleet")
}

pub fn ignore_file_in_effect(settings: &Settings) -> bool {
    ignore_location(settings).exists()
}

pub fn only_file_in_effect(settings: &Settings) -> bool {
    only_location(settings).exists()
}

fn read_non_empty_lines(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    Ok(contents
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn provider_exposes_topics(scm_type: &str) -> bool {
    matches!(scm_type, "github" | "gitlab" | "gitea")
}

/// Applies every configured sieve in order and returns the kept set.
pub fn apply_filters(mut repos: Vec<Repo>, settings: &Settings) -> Result<FilterOutcome> {
    let mut infos = Vec::new();

    if settings.skip_archived {
        repos.retain(|r| !r.archived);
    }
    if settings.skip_forks {
        repos.retain(|r| !r.fork);
    }

    if let Some(prefixes) = settings.match_prefix.as_deref().map(split_csv) {
        repos.retain(|r| prefixes.iter().any(|p| r.name.starts_with(p.as_str())));
    }
    if let Some(prefixes) = settings.exclude_match_prefix.as_deref().map(split_csv) {
        repos.retain(|r| !prefixes.iter().any(|p| r.name.starts_with(p.as_str())));
    }

    if let Some(pattern) = &settings.match_regex {
        let re = Regex::new(pattern).context("invalid match regex")?;
        repos.retain(|r| re.is_match(&r.name));
    }
    if let Some(pattern) = &settings.exclude_match_regex {
        let re = Regex::new(pattern).context("invalid exclude match regex")?;
        repos.retain(|r| !re.is_match(&r.name));
    }

    if let Some(pattern) = &settings.gitlab_group_exclude_match_regex {
        let re = Regex::new(pattern).context("invalid gitlab group exclude regex")?;
        repos.retain(|r| {
            let namespace = r.path.rsplit_once('/').map(|(ns, _)| ns).unwrap_or("");
            !re.is_match(namespace)
        });
    }

    if !settings.topics.is_empty() && provider_exposes_topics(&settings.scm_type) {
        repos.retain(|r| r.topics.iter().any(|t| settings.topics.contains(t)));
    }

    if ignore_file_in_effect(settings) {
        let patterns = read_non_empty_lines(&ignore_location(settings))
            .context("could not parse ignore file")?;
        if !patterns.is_empty() {
            infos.push("Using ignore file, filtering repos down...".to_string());
            repos.retain(|r| !patterns.iter().any(|p| r.url.contains(p.as_str())));
        }
    }

    if only_file_in_effect(settings) {
        let patterns = read_non_empty_lines(&only_location(settings))
            .context("could not parse only file")?;
        if !patterns.is_empty() {
            infos.push("Using only file, filtering repos down...".to_string());
            repos.retain(|r| patterns.iter().any(|p| r.url.contains(p.as_str())));
        }
    }

    if let Some(target_path) = &settings.target_repos_path {
        let targets = read_non_empty_lines(Path::new(target_path))
            .context("could not parse target repos file")?;
        infos.push("Using target repos file, filtering repos down...".to_string());
        let (kept, misses) = filter_by_target_names(repos, &targets, settings);
        repos = kept;
        for miss in misses {
            infos.push(format!(
                "Target repo was not found in the enumerated set, repo: {miss}"
            ));
        }
    }

    Ok(FilterOutcome { repos, infos })
}

/// Keeps repos whose name matches an entry in the target list, plus their
/// wikis and snippets. Returns the entries that matched nothing.
fn filter_by_target_names(
    repos: Vec<Repo>,
    targets: &[String],
    settings: &Settings,
) -> (Vec<Repo>, Vec<String>) {
    let mut seen: Vec<bool> = vec![false; targets.len()];
    let mut kept = Vec::new();

    for repo in repos {
        let base_name = repo
            .url
            .rsplit('/')
            .next()
            .unwrap_or(&repo.name)
            .trim_end_matches(".git")
            .to_string();
        let mut matched = false;

        for (i, target) in targets.iter().enumerate() {
            if base_name.eq_ignore_ascii_case(target) {
                matched = true;
                seen[i] = true;
            }
            if settings.clone_wiki {
                let wiki_name = format!("{target}.wiki");
                if base_name.eq_ignore_ascii_case(&wiki_name) {
                    matched = true;
                    seen[i] = true;
                }
            }
            if settings.clone_snippets && repo.is_snippet {
                if let Some(parent_url) = &repo.snippet_url_of_repo {
                    let parent_name = parent_url
                        .rsplit('/')
                        .next()
                        .unwrap_or("")
                        .trim_end_matches(".git");
                    if parent_name.eq_ignore_ascii_case(target) {
                        matched = true;
                        seen[i] = true;
                    }
                }
            }
        }

        if matched {
            kept.push(repo);
        }
    }

    let misses = targets
        .iter()
        .zip(seen)
        .filter(|(_, seen)| !seen)
        .map(|(t, _)| t.clone())
        .collect();
    (kept, misses)
}
