//! Backend that drives the system `git` executable.

use std::path::Path;
use std::process::Command;

use super::{GitError, GitOptions, Gitter};
use crate::scm::Repo;

pub struct SubprocessGit {
    opts: GitOptions,
}

impl SubprocessGit {
    pub fn new(opts: GitOptions) -> Self {
        SubprocessGit { opts }
    }

    /// Runs git with the given arguments and returns
    /// `(success, stdout, stderr)`, both streams trimmed.
    fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<(bool, String, String), GitError> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        let output = cmd.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Ok((output.status.success(), stdout, stderr))
    }

    /// Runs git and maps a non-zero exit into a classified error.
    fn run_checked(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
        let (success, stdout, stderr) = self.run(dir, args)?;
        if success {
            Ok(stdout)
        } else {
            Err(classify_git_failure(&stderr, args))
        }
    }

    fn depth_arg(&self) -> Option<String> {
        self.opts.clone_depth.map(|d| format!("--depth={d}"))
    }
}

/// Sorts a git failure into the error taxonomy from the stderr text.
fn classify_git_failure(stderr: &str, args: &[&str]) -> GitError {
    let lowered = stderr.to_lowercase();
    let summary = if stderr.is_empty() {
        format!("git {} failed", args.first().unwrap_or(&""))
    } else {
        stderr.to_string()
    };

    if lowered.contains("authentication failed")
        || lowered.contains("permission denied")
        || lowered.contains("invalid credentials")
        || lowered.contains("401")
        || lowered.contains("403")
    {
        GitError::Auth(summary)
    } else if lowered.contains("could not resolve host")
        || lowered.contains("unable to access")
        || lowered.contains("connection refused")
        || lowered.contains("connection timed out")
        || lowered.contains("could not read from remote repository")
    {
        GitError::RemoteUnavailable(summary)
    } else if lowered.contains("not a git repository")
        || lowered.contains("unknown revision")
        || lowered.contains("not something we can merge")
        || lowered.contains("not possible to fast-forward")
        || lowered.contains("refusing to merge unrelated histories")
    {
        GitError::InvalidState(summary)
    } else {
        GitError::Other(summary)
    }
}

impl Gitter for SubprocessGit {
    fn clone_repo(&self, repo: &Repo) -> Result<(), GitError> {
        let host_path = repo.host_path.to_string_lossy().to_string();
        let mut args: Vec<String> = vec!["clone".to_string()];
        if self.opts.include_submodules {
            args.push("--recursive".to_string());
        }
        if let Some(depth) = self.depth_arg() {
            args.push(depth);
        }
        if let Some(filter) = &self.opts.git_filter {
            args.push(format!("--filter={filter}"));
        }
        if self.opts.mirror {
            args.push("--mirror".to_string());
        }
        args.push(repo.clone_url.clone());
        args.push(host_path);

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(None, &arg_refs).map(|_| ())
    }

    fn checkout(&self, repo: &Repo) -> Result<(), GitError> {
        self.run_checked(
            Some(&repo.host_path),
            &["checkout", &repo.clone_branch],
        )
        .map(|_| ())
    }

    fn clean(&self, repo: &Repo) -> Result<(), GitError> {
        self.run_checked(Some(&repo.host_path), &["clean", "-f", "-d"])
            .map(|_| ())
    }

    fn pull(&self, repo: &Repo) -> Result<(), GitError> {
        let mut args: Vec<String> = vec!["pull".to_string()];
        if self.opts.include_submodules {
            args.push("--recurse-submodules".to_string());
        }
        if let Some(depth) = self.depth_arg() {
            args.push(depth);
        }
        args.push("origin".to_string());
        args.push(repo.clone_branch.clone());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(Some(&repo.host_path), &arg_refs).map(|_| ())
    }

    fn fetch_all(&self, repo: &Repo) -> Result<(), GitError> {
        let mut args: Vec<String> = vec!["fetch".to_string()];
        if let Some(depth) = self.depth_arg() {
            args.push(depth);
        }
        args.push("--all".to_string());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(Some(&repo.host_path), &arg_refs).map(|_| ())
    }

    fn fetch_clone_branch(&self, repo: &Repo) -> Result<(), GitError> {
        let mut args: Vec<String> = vec!["fetch".to_string()];
        if let Some(depth) = self.depth_arg() {
            args.push(depth);
        }
        args.push("origin".to_string());
        args.push(repo.clone_branch.clone());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(Some(&repo.host_path), &arg_refs).map(|_| ())
    }

    fn update_remote(&self, repo: &Repo) -> Result<(), GitError> {
        self.run_checked(Some(&repo.host_path), &["remote", "update"])
            .map(|_| ())
    }

    fn reset_to_origin(&self, repo: &Repo) -> Result<(), GitError> {
        let target = format!("origin/{}", repo.clone_branch);
        self.run_checked(Some(&repo.host_path), &["reset", "--hard", &target])
            .map(|_| ())
    }

    fn set_origin(&self, repo: &Repo) -> Result<(), GitError> {
        self.run_checked(
            Some(&repo.host_path),
            &["remote", "set-url", "origin", &repo.url],
        )
        .map(|_| ())
    }

    fn set_origin_with_credentials(&self, repo: &Repo) -> Result<(), GitError> {
        self.run_checked(
            Some(&repo.host_path),
            &["remote", "set-url", "origin", &repo.clone_url],
        )
        .map(|_| ())
    }

    fn branch_list(&self, repo: &Repo) -> Result<String, GitError> {
        self.run_checked(Some(&repo.host_path), &["branch"])
    }

    fn short_status(&self, repo: &Repo) -> Result<String, GitError> {
        self.run_checked(Some(&repo.host_path), &["status", "--short"])
    }

    fn repo_commit_count(&self, repo: &Repo) -> Result<u64, GitError> {
        let output = self.run_checked(
            Some(&repo.host_path),
            &["rev-list", "--count", &repo.clone_branch, "--"],
        )?;
        output
            .parse()
            .map_err(|_| GitError::Other(format!("could not parse commit count '{output}'")))
    }

    fn has_remote_heads(&self, repo: &Repo) -> Result<bool, GitError> {
        let output = Command::new("git")
            .args(["ls-remote", "--heads", "--quiet", "--exit-code"])
            .current_dir(&repo.host_path)
            .output()?;
        match output.status.code() {
            Some(0) => Ok(true),
            // Exit code 2 means no matching refs, which is how an empty
            // repository answers. Anything else is a real failure.
            Some(2) => Ok(false),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                Err(classify_git_failure(&stderr, &["ls-remote"]))
            }
        }
    }

    fn get_remote_url(&self, repo: &Repo, remote: &str) -> Result<String, GitError> {
        self.run_checked(Some(&repo.host_path), &["remote", "get-url", remote])
    }

    fn get_remote_default_branch(&self, repo: &Repo) -> Result<String, GitError> {
        // The symbolic ref is fast and needs no network.
        if let Ok(output) = self.run_checked(
            Some(&repo.host_path),
            &["symbolic-ref", "refs/remotes/origin/HEAD"],
        ) {
            if let Some(branch) = output.rsplit('/').next() {
                if !branch.is_empty() {
                    return Ok(branch.to_string());
                }
            }
        }

        let output = self.run_checked(
            Some(&repo.host_path),
            &["ls-remote", "--symref", "origin", "HEAD"],
        )?;
        for line in output.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("ref:") {
                if let Some(refpath) = trimmed.split_whitespace().nth(1) {
                    if let Some(branch) = refpath.strip_prefix("refs/heads/") {
                        return Ok(branch.to_string());
                    }
                }
            }
        }
        Err(GitError::Other(
            "could not determine default branch from ls-remote output".to_string(),
        ))
    }

    fn get_current_branch(&self, repo: &Repo) -> Result<String, GitError> {
        self.run_checked(
            Some(&repo.host_path),
            &["rev-parse", "--abbrev-ref", "HEAD"],
        )
    }

    fn get_ref_hash(&self, repo: &Repo, refname: &str) -> Result<String, GitError> {
        self.run_checked(Some(&repo.host_path), &["rev-parse", refname])
    }

    fn has_local_changes(&self, repo: &Repo) -> Result<bool, GitError> {
        let status = self.short_status(repo)?;
        Ok(!status.is_empty())
    }

    fn has_unpushed_commits(&self, repo: &Repo) -> Result<bool, GitError> {
        let (success, stdout, stderr) = self.run(
            Some(&repo.host_path),
            &["rev-list", "--count", "@{u}..HEAD"],
        )?;
        if !success {
            let lowered = stderr.to_lowercase();
            // No tracking ref means there is nothing to be ahead of.
            if lowered.contains("no upstream") || lowered.contains("does not point to a branch") {
                return Ok(false);
            }
            return Err(classify_git_failure(&stderr, &["rev-list"]));
        }
        let count: u64 = stdout
            .parse()
            .map_err(|_| GitError::Other(format!("could not parse unpushed count '{stdout}'")))?;
        Ok(count > 0)
    }

    fn has_commits_not_on_default_branch(
        &self,
        repo: &Repo,
        current_branch: &str,
    ) -> Result<bool, GitError> {
        let default_ref = format!("^refs/heads/{}", repo.clone_branch);
        let output = self.run_checked(
            Some(&repo.host_path),
            &["rev-list", "--count", current_branch, &default_ref],
        )?;
        let count: u64 = output
            .parse()
            .map_err(|_| GitError::Other(format!("could not parse commit count '{output}'")))?;
        Ok(count > 0)
    }

    fn is_default_branch_behind_head(
        &self,
        repo: &Repo,
        current_branch: &str,
    ) -> Result<bool, GitError> {
        let default_ref = format!("refs/heads/{}", repo.clone_branch);
        // Equal tips are not "behind"; is-ancestor alone would say yes.
        let default_hash = self.get_ref_hash(repo, &default_ref)?;
        let current_hash = self.get_ref_hash(repo, current_branch)?;
        if default_hash == current_hash {
            return Ok(false);
        }
        let output = Command::new("git")
            .args(["merge-base", "--is-ancestor", &default_ref, current_branch])
            .current_dir(&repo.host_path)
            .output()?;
        match output.status.code() {
            Some(0) => Ok(true),
            // Exit code 1 means "not an ancestor", a valid answer.
            Some(1) => Ok(false),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                Err(classify_git_failure(&stderr, &["merge-base"]))
            }
        }
    }

    fn merge_fast_forward(&self, repo: &Repo) -> Result<(), GitError> {
        let remote_branch = format!("origin/{}", repo.clone_branch);
        self.run_checked(
            Some(&repo.host_path),
            &["merge", "--ff-only", &remote_branch],
        )
        .map(|_| ())
    }

    fn merge_into_default_branch(
        &self,
        repo: &Repo,
        current_branch: &str,
    ) -> Result<(), GitError> {
        self.checkout(repo)?;
        self.run_checked(
            Some(&repo.host_path),
            &["merge", "--ff-only", current_branch],
        )
        .map(|_| ())
    }

    fn update_ref(&self, repo: &Repo, refname: &str, commit_ref: &str) -> Result<(), GitError> {
        let sha = self.run_checked(Some(&repo.host_path), &["rev-parse", commit_ref])?;
        self.run_checked(Some(&repo.host_path), &["update-ref", refname, &sha])
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_auth_failure() {
        let err = classify_git_failure("fatal: Authentication failed for 'https://x'", &["clone"]);
        assert!(matches!(err, GitError::Auth(_)));
    }

    #[test]
    fn test_classify_remote_unavailable() {
        let err = classify_git_failure("fatal: Could not resolve host: example.com", &["fetch"]);
        assert!(matches!(err, GitError::RemoteUnavailable(_)));
    }

    #[test]
    fn test_classify_invalid_state() {
        let err = classify_git_failure(
            "fatal: Not possible to fast-forward, aborting.",
            &["merge"],
        );
        assert!(matches!(err, GitError::InvalidState(_)));
    }

    #[test]
    fn test_classify_fallback_keeps_message() {
        let err = classify_git_failure("something odd happened", &["pull"]);
        match err {
            GitError::Other(msg) => assert_eq!(msg, "something odd happened"),
            other => panic!("expected Other, got {other:?}"),
        }
    }
}
