//! Reconciling the local tree with the remote set.
//!
//! After the fan-out completes, every local clone with no counterpart in
//! the kept set is a prune candidate. Deletion is destructive, so two
//! safeguards apply: path comparison happens on normalised forms (leading
//! slash stripped, separators unified), and no path is ever removed unless
//! its canonicalised form sits under the canonicalised clone root.

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::planner::normalize_compare_path;
use crate::colorlog;
use crate::config::Settings;
use crate::scm::Repo;

/// True when the directory is itself a Git clone: it has a `.git` child,
/// either the usual directory or the file form a submodule checkout leaves
/// behind.
fn is_git_clone(path: &Path) -> bool {
    let marker = path.join(".git");
    if marker.is_dir() {
        return true;
    }
    if marker.is_file() {
        if let Ok(file) = fs::File::open(&marker) {
            return BufReader::new(file)
                .lines()
                .take(5)
                .filter_map(Result::ok)
                .any(|line| line.trim_start().starts_with("gitdir:"));
        }
    }
    false
}

/// Walks the clone root depth-first and yields the root-relative path of
/// every clone. Does not descend into a clone once found, so nested
/// submodule checkouts are not reported separately.
pub fn find_local_clones(root: &Path) -> Result<Vec<PathBuf>> {
    let mut clones = Vec::new();
    let mut it = walkdir::WalkDir::new(root).into_iter();
    while let Some(entry) = it.next() {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        if path == root {
            continue;
        }
        if is_git_clone(path) {
            clones.push(path.strip_prefix(root)?.to_path_buf());
            it.skip_current_dir();
        }
    }
    Ok(clones)
}

fn kept_path_set(kept: &[Repo]) -> HashSet<String> {
    kept.iter()
        .map(|r| normalize_compare_path(&r.path))
        .collect()
}

/// Aborts the run when a candidate escapes the clone root. Deleting outside
/// the sandbox is never acceptable, whatever the comparison logic said.
fn ensure_contained(candidate: &Path, canonical_root: &Path) -> Result<()> {
    let canonical = candidate.canonicalize()?;
    if !canonical.starts_with(canonical_root) {
        bail!(
            "DANGEROUS ACTION DETECTED! Preventing deletion of {} as it is outside the \
             clone root {}; this deletion is not expected, exiting.",
            candidate.display(),
            canonical_root.display()
        );
    }
    Ok(())
}

/// Dry-run companion to [`prune_repos`]: reports how many local clones
/// would be eligible without touching anything.
pub fn count_prune_candidates(kept: &[Repo], root: &Path) -> Result<usize> {
    let kept_paths = kept_path_set(kept);
    let mut eligible = 0;
    for relative in find_local_clones(root)? {
        let compare = normalize_compare_path(&relative.to_string_lossy());
        if !kept_paths.contains(&compare) {
            colorlog::print_subtle_info(format!("{compare} not found in remote."));
            eligible += 1;
        }
    }
    Ok(eligible)
}

/// Deletes local clones absent from the kept set. Interactive unless
/// `prune_no_confirm`; a single "no" stops all further prunes in the run.
pub fn prune_repos(kept: &[Repo], settings: &Settings) -> Result<usize> {
    colorlog::print_info("\nScanning for local clones that have been removed on remote...");
    let root = &settings.output_dir_absolute_path;
    if !root.is_dir() {
        return Ok(0);
    }

    let kept_paths = kept_path_set(kept);
    let canonical_root = root.canonicalize()?;
    let mut user_agrees = true;
    let mut count = 0;

    for relative in find_local_clones(root)? {
        let absolute = root.join(&relative);
        ensure_contained(&absolute, &canonical_root)?;

        let compare = normalize_compare_path(&relative.to_string_lossy());
        if user_agrees && !kept_paths.contains(&compare) {
            user_agrees = settings.prune_no_confirm
                || interactive_yes_no(&format!(
                    "{compare} was not found in remote. Do you want to prune it? {}",
                    absolute.display()
                ));
            if user_agrees {
                colorlog::print_subtle_info(format!("Deleting {}", absolute.display()));
                fs::remove_dir_all(&absolute)?;
                count += 1;
            } else {
                colorlog::print_error(
                    "Pruning cancelled by user. No more prunes will be considered.",
                );
            }
        }
    }

    Ok(count)
}

/// Deletes the repos the processor recorded as having no divergence from
/// origin. Presents the batch once and proceeds on a single Enter unless
/// confirmation is disabled.
pub fn prune_untouched_repos(paths: &[PathBuf], settings: &Settings) -> usize {
    if paths.is_empty() {
        return 0;
    }

    if !settings.prune_untouched_no_confirm {
        colorlog::print_success(format!(
            "PLEASE CONFIRM: The following {} untouched repositories will be deleted. \
             Press enter to confirm: ",
            paths.len()
        ));
        for path in paths {
            colorlog::print_info(format!("- {}", path.display()));
        }
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
    }

    let mut count = 0;
    for path in paths {
        match fs::remove_dir_all(path) {
            Ok(()) => {
                count += 1;
                colorlog::print_success(format!("Successfully deleted {}", path.display()));
            }
            Err(err) => {
                colorlog::print_error(format!(
                    "Failed to prune repository at {}: {err}",
                    path.display()
                ));
            }
        }
    }
    count
}

fn interactive_yes_no(prompt: &str) -> bool {
    print!("{} (y/N) ", prompt.trim());
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn git_init(path: &Path) {
        fs::create_dir_all(path).unwrap();
        let status = Command::new("git")
            .args(["init", "--quiet"])
            .current_dir(path)
            .status()
            .expect("git must be available for pruner tests");
        assert!(status.success());
    }

    fn repo_with_path(path: &str) -> Repo {
        Repo {
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    fn settings_with_root(root: &Path) -> Settings {
        let mut s = Settings::from_env();
        s.absolute_path_to_clone_to = format!("{}/", root.display());
        s.prune_no_confirm = true;
        s.output_dir_absolute_path = root.to_path_buf();
        s
    }

    #[test]
    fn test_find_local_clones_requires_git_marker() {
        let dir = tempfile::tempdir().unwrap();
        git_init(&dir.path().join("repo-a"));
        fs::create_dir_all(dir.path().join("not-a-repo")).unwrap();

        let clones = find_local_clones(dir.path()).unwrap();
        assert_eq!(clones, vec![PathBuf::from("repo-a")]);
    }

    #[test]
    fn test_find_local_clones_accepts_git_file_marker() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("submodule-style");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join(".git"), "gitdir: ../.git/modules/submodule-style\n").unwrap();

        let clones = find_local_clones(dir.path()).unwrap();
        assert_eq!(clones, vec![PathBuf::from("submodule-style")]);
    }

    #[test]
    fn test_find_local_clones_does_not_descend_into_clones() {
        let dir = tempfile::tempdir().unwrap();
        let outer = dir.path().join("outer");
        git_init(&outer);
        git_init(&outer.join("vendored"));

        let clones = find_local_clones(dir.path()).unwrap();
        assert_eq!(clones, vec![PathBuf::from("outer")]);
    }

    #[test]
    fn test_prune_removes_only_unmatched_clones() {
        let dir = tempfile::tempdir().unwrap();
        git_init(&dir.path().join("kept"));
        git_init(&dir.path().join("gone"));

        let kept = vec![repo_with_path("kept")];
        let settings = settings_with_root(dir.path());
        let pruned = prune_repos(&kept, &settings).unwrap();

        assert_eq!(pruned, 1);
        assert!(dir.path().join("kept").exists());
        assert!(!dir.path().join("gone").exists());
    }

    #[test]
    fn test_prune_comparison_ignores_leading_slash() {
        let dir = tempfile::tempdir().unwrap();
        git_init(&dir.path().join("group").join("app"));

        // Provider-delivered paths can carry a leading slash.
        let kept = vec![repo_with_path("/group/app")];
        let settings = settings_with_root(dir.path());
        let pruned = prune_repos(&kept, &settings).unwrap();

        assert_eq!(pruned, 0);
        assert!(dir.path().join("group/app").exists());
    }

    #[test]
    fn test_count_prune_candidates_leaves_tree_untouched() {
        let dir = tempfile::tempdir().unwrap();
        git_init(&dir.path().join("dir-a"));
        git_init(&dir.path().join("dir-b"));

        let kept = vec![repo_with_path("dir-a")];
        let eligible = count_prune_candidates(&kept, dir.path()).unwrap();

        assert_eq!(eligible, 1);
        assert!(dir.path().join("dir-a").exists());
        assert!(dir.path().join("dir-b").exists());
    }

    #[test]
    fn test_containment_check_rejects_paths_outside_root() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let canonical_root = root.path().canonicalize().unwrap();

        let err = ensure_contained(outside.path(), &canonical_root).unwrap_err();
        assert!(err.to_string().contains("DANGEROUS ACTION DETECTED"));
        assert!(outside.path().exists());
    }

    #[test]
    fn test_prune_untouched_no_confirm_deletes_batch() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        git_init(&a);
        git_init(&b);

        let mut settings = settings_with_root(dir.path());
        settings.prune_untouched_no_confirm = true;
        let count = prune_untouched_repos(&[a.clone(), b.clone()], &settings);

        assert_eq!(count, 2);
        assert!(!a.exists());
        assert!(!b.exists());
    }
}
