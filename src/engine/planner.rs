//! Destination planning.
//!
//! Computes every kept repo's local destination before the worker pool
//! starts: flat layout or namespace-preserving layout, wiki and snippet
//! suffixes, collision disambiguation for short names shared across
//! namespaces, and a hard refusal of path separators smuggled in by a
//! hostile provider.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::scm::Repo;

/// Directory names longer than this break checkouts on common filesystems.
const MAX_FILENAME_LEN: usize = 248;

/// Collision map plus whether any collision was found. Built in one pass
/// before dispatch; read-only afterwards.
pub struct PlanOutcome {
    pub collisions: HashMap<String, bool>,
    pub has_collisions: bool,
}

/// Assigns a `host_path` to every repo and rewrites `path` to the final
/// root-relative form the pruner compares against.
pub fn plan(repos: &mut [Repo], settings: &Settings) -> Result<PlanOutcome> {
    let root = settings.output_dir_absolute_path.clone();
    let (collisions, has_collisions) = build_collision_map(repos, settings);

    for repo in repos.iter_mut() {
        let relative = if settings.preserve_dir && !repo.path.is_empty() {
            preserve_dir_relative(repo)
        } else {
            // Flat layout: the whole slug is one directory name.
            let slug = flat_relative(repo, &collisions);
            if !is_path_segment_safe(&slug) {
                bail!("Unsafe path segment found in SCM output: '{slug}'");
            }
            slug
        };

        let mut host_path = root.clone();
        for segment in relative.split('/') {
            if !is_path_segment_safe(segment) {
                bail!("Unsafe path segment found in SCM output: '{segment}'");
            }
            host_path.push(segment);
        }
        repo.host_path = host_path;
        repo.path = relative;
    }

    Ok(PlanOutcome {
        collisions,
        has_collisions,
    })
}

/// One pass over the kept set counting short-name collisions. Wikis and
/// snippets never collide: wikis carry a suffix and snippet directories
/// embed the snippet id.
fn build_collision_map(repos: &[Repo], settings: &Settings) -> (HashMap<String, bool>, bool) {
    let mut map = HashMap::new();
    if settings.preserve_dir {
        return (map, false);
    }

    let mut has_collisions = false;
    for repo in repos {
        if repo.is_wiki || repo.is_snippet {
            continue;
        }
        match map.get_mut(&repo.name) {
            Some(collided) => {
                *collided = true;
                has_collisions = true;
            }
            None => {
                map.insert(repo.name.clone(), false);
            }
        }
    }
    (map, has_collisions)
}

fn preserve_dir_relative(repo: &Repo) -> String {
    repo.path
        .trim_start_matches('/')
        .replace('\\', "/")
}

fn flat_relative(repo: &Repo, collisions: &HashMap<String, bool>) -> String {
    if repo.is_snippet {
        let base = match (&repo.is_root_level_snippet, &repo.snippet_url_of_repo) {
            (false, Some(parent_url)) => app_name_from_url(parent_url),
            _ => repo.name.clone(),
        };
        return match &repo.snippet_id {
            Some(id) => format!("{base}-snippet-{id}"),
            None => base,
        };
    }
    if collisions.get(&repo.name).copied().unwrap_or(false) {
        // A short name shared across namespaces; the namespace path keeps
        // the destinations apart.
        return trim_collision_filename(&repo.path.trim_start_matches('/').replace('/', "_"));
    }
    repo.name.clone()
}

/// Derives the directory-friendly application name from a clone URL.
pub fn app_name_from_url(url: &str) -> String {
    let last = url.rsplit('/').next().unwrap_or(url);
    last.trim_end_matches(".git").to_string()
}

/// Rejects segments that could escape the clone root.
fn is_path_segment_safe(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains('/')
        && !segment.contains(std::path::MAIN_SEPARATOR)
}

/// Keeps collision-expanded names inside the platform-safe length by
/// cutting at the last underscore that fits.
fn trim_collision_filename(filename: &str) -> String {
    if filename.len() <= MAX_FILENAME_LEN {
        return filename.to_string();
    }
    let head = &filename[..MAX_FILENAME_LEN];
    match head.rfind('_') {
        Some(idx) => head[..idx].to_string(),
        None => head.to_string(),
    }
}

/// Normalises a provider-delivered or locally-derived path for comparison:
/// leading slash dropped, separators unified to forward slashes.
pub fn normalize_compare_path(path: &str) -> String {
    path.trim_start_matches('/')
        .replace('\\', "/")
}

/// Relative path of a clone under the root, in comparison form.
pub fn relative_compare_path(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|rel| normalize_compare_path(&rel.to_string_lossy()))
}
