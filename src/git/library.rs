//! In-process backend over libgit2.
//!
//! Partial-clone filters are not supported by libgit2; when one is
//! configured this backend announces that it is ignoring it and proceeds,
//! it never fails the run over it. Operators who need server-side filtering
//! choose the subprocess backend instead.

use git2::build::RepoBuilder;
use git2::{
    BranchType, Cred, CredentialType, Direction, ErrorClass, ErrorCode, FetchOptions,
    Repository, ResetType, StatusOptions,
};
use std::path::Path;

use super::{GitError, GitOptions, Gitter};
use crate::colorlog;
use crate::scm::Repo;

pub struct LibraryGit {
    opts: GitOptions,
}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        let message = err.message().to_string();
        match (err.class(), err.code()) {
            (_, ErrorCode::Auth) => GitError::Auth(message),
            (ErrorClass::Net, _) | (ErrorClass::Http, _) | (ErrorClass::Ssh, _) => {
                GitError::RemoteUnavailable(message)
            }
            (ErrorClass::Os, _) | (ErrorClass::Filesystem, _) => GitError::Filesystem(message),
            (ErrorClass::Repository, _)
            | (ErrorClass::Reference, _)
            | (ErrorClass::Merge, _)
            | (ErrorClass::Checkout, _) => GitError::InvalidState(message),
            _ => GitError::Other(message),
        }
    }
}

/// Credential callback driving both auth styles: SSH answers from the
/// agent, HTTPS answers with the userinfo embedded in the clone URL.
fn remote_callbacks(clone_url: String) -> git2::RemoteCallbacks<'static> {
    let mut callbacks = git2::RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, allowed| {
        if allowed.contains(CredentialType::SSH_KEY) {
            return Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"));
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            if let Ok(parsed) = reqwest::Url::parse(&clone_url) {
                let user = parsed.username();
                if !user.is_empty() {
                    return Cred::userpass_plaintext(user, parsed.password().unwrap_or(""));
                }
            }
        }
        Cred::default()
    });
    callbacks
}

impl LibraryGit {
    pub fn new(opts: GitOptions) -> Self {
        LibraryGit { opts }
    }

    fn fetch_options(&self, repo: &Repo) -> FetchOptions<'static> {
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(remote_callbacks(repo.clone_url.clone()));
        if let Some(depth) = self.opts.clone_depth {
            fetch.depth(depth as i32);
        }
        fetch
    }

    fn open(&self, repo: &Repo) -> Result<Repository, GitError> {
        Ok(Repository::open(&repo.host_path)?)
    }

    /// Bare mirror clone: init, set the all-refs mirror refspec, fetch.
    fn clone_mirror(&self, repo: &Repo) -> Result<(), GitError> {
        std::fs::create_dir_all(&repo.host_path)?;
        let bare = Repository::init_bare(&repo.host_path)?;
        {
            let mut remote =
                bare.remote_with_fetch("origin", &repo.clone_url, "+refs/*:refs/*")?;
            let mut config = bare.config()?;
            config.set_bool("remote.origin.mirror", true)?;
            let mut fetch = self.fetch_options(repo);
            remote.fetch(&["+refs/*:refs/*"], Some(&mut fetch), None)?;
        }
        Ok(())
    }

    fn checkout_branch(&self, git_repo: &Repository, branch: &str) -> Result<(), GitError> {
        let refname = format!("refs/heads/{branch}");
        if git_repo.find_reference(&refname).is_err() {
            // Local branch missing: create it from the remote-tracking ref.
            let remote_ref = git_repo
                .find_reference(&format!("refs/remotes/origin/{branch}"))?
                .peel_to_commit()?;
            git_repo.branch(branch, &remote_ref, false)?;
        }
        git_repo.set_head(&refname)?;
        git_repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
        Ok(())
    }

    fn fast_forward_to(
        &self,
        git_repo: &Repository,
        target_ref: &str,
    ) -> Result<(), GitError> {
        let target_oid = git_repo.refname_to_id(target_ref)?;
        let annotated = git_repo.find_annotated_commit(target_oid)?;
        let (analysis, _) = git_repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            return Ok(());
        }
        if !analysis.is_fast_forward() {
            return Err(GitError::InvalidState(format!(
                "not possible to fast-forward to {target_ref}"
            )));
        }

        let head_ref = git_repo.head()?;
        let head_name = head_ref
            .name()
            .ok_or_else(|| GitError::InvalidState("HEAD has no name".to_string()))?
            .to_string();
        git_repo.reference(
            &head_name,
            target_oid,
            true,
            &format!("fast-forward to {target_ref}"),
        )?;
        git_repo.set_head(&head_name)?;
        git_repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
        Ok(())
    }

    fn statuses_string(&self, git_repo: &Repository) -> Result<String, GitError> {
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = git_repo.statuses(Some(&mut options))?;

        let mut lines = Vec::new();
        for entry in statuses.iter() {
            let status = entry.status();
            // Untracked entries use both columns, like porcelain output.
            if status.is_wt_new() {
                lines.push(format!("?? {}", entry.path().unwrap_or("")));
                continue;
            }
            let staging = if status.is_index_new() {
                'A'
            } else if status.is_index_modified() {
                'M'
            } else if status.is_index_deleted() {
                'D'
            } else if status.is_index_renamed() {
                'R'
            } else {
                ' '
            };
            let worktree = if status.is_wt_modified() {
                'M'
            } else if status.is_wt_deleted() {
                'D'
            } else if status.is_wt_renamed() {
                'R'
            } else {
                ' '
            };
            if staging != ' ' || worktree != ' ' {
                lines.push(format!(
                    "{staging}{worktree} {}",
                    entry.path().unwrap_or("")
                ));
            }
        }
        Ok(lines.join("\n"))
    }
}

impl Gitter for LibraryGit {
    fn clone_repo(&self, repo: &Repo) -> Result<(), GitError> {
        if let Some(filter) = &self.opts.git_filter {
            colorlog::print_info(format!(
                "Warning: git filter '{filter}' is not supported by the library backend, ignoring"
            ));
        }

        if self.opts.mirror {
            return self.clone_mirror(repo);
        }

        let mut builder = RepoBuilder::new();
        builder.fetch_options(self.fetch_options(repo));
        let host_path: &Path = &repo.host_path;
        let cloned = builder.clone(&repo.clone_url, host_path)?;

        if self.opts.include_submodules {
            for mut submodule in cloned.submodules()? {
                submodule.update(true, None)?;
            }
        }
        Ok(())
    }

    fn checkout(&self, repo: &Repo) -> Result<(), GitError> {
        let git_repo = self.open(repo)?;
        self.checkout_branch(&git_repo, &repo.clone_branch)
    }

    fn clean(&self, repo: &Repo) -> Result<(), GitError> {
        let git_repo = self.open(repo)?;
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = git_repo.statuses(Some(&mut options))?;

        let workdir = git_repo
            .workdir()
            .ok_or_else(|| GitError::InvalidState("repository has no working tree".to_string()))?
            .to_path_buf();

        for entry in statuses.iter() {
            if entry.status().is_wt_new() {
                if let Some(rel) = entry.path() {
                    let absolute = workdir.join(rel);
                    if absolute.is_dir() {
                        std::fs::remove_dir_all(&absolute)?;
                    } else if absolute.exists() {
                        std::fs::remove_file(&absolute)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn pull(&self, repo: &Repo) -> Result<(), GitError> {
        self.fetch_clone_branch(repo)?;
        self.merge_fast_forward(repo)?;

        if self.opts.include_submodules {
            let git_repo = self.open(repo)?;
            for mut submodule in git_repo.submodules()? {
                submodule.update(true, None)?;
            }
        }
        Ok(())
    }

    fn fetch_all(&self, repo: &Repo) -> Result<(), GitError> {
        let git_repo = self.open(repo)?;
        let mut remote = git_repo.find_remote("origin")?;
        let mut fetch = self.fetch_options(repo);
        remote.fetch(
            &["+refs/heads/*:refs/remotes/origin/*"],
            Some(&mut fetch),
            None,
        )?;
        Ok(())
    }

    fn fetch_clone_branch(&self, repo: &Repo) -> Result<(), GitError> {
        let git_repo = self.open(repo)?;
        let mut remote = git_repo.find_remote("origin")?;
        let refspec = format!(
            "+refs/heads/{branch}:refs/remotes/origin/{branch}",
            branch = repo.clone_branch
        );
        let mut fetch = self.fetch_options(repo);
        remote.fetch(&[refspec.as_str()], Some(&mut fetch), None)?;
        Ok(())
    }

    fn update_remote(&self, repo: &Repo) -> Result<(), GitError> {
        let git_repo = self.open(repo)?;
        let names = git_repo.remotes()?;
        for name in names.iter().flatten() {
            let mut remote = git_repo.find_remote(name)?;
            let mut fetch = self.fetch_options(repo);
            // An empty refspec list fetches the remote's configured
            // refspecs, which for a mirror is the all-refs spec.
            remote.fetch(&[] as &[&str], Some(&mut fetch), None)?;
        }
        Ok(())
    }

    fn reset_to_origin(&self, repo: &Repo) -> Result<(), GitError> {
        let git_repo = self.open(repo)?;
        let oid = git_repo.refname_to_id(&format!(
            "refs/remotes/origin/{}",
            repo.clone_branch
        ))?;
        let object = git_repo.find_object(oid, None)?;
        git_repo.reset(&object, ResetType::Hard, None)?;
        Ok(())
    }

    fn set_origin(&self, repo: &Repo) -> Result<(), GitError> {
        let git_repo = self.open(repo)?;
        if git_repo.find_remote("origin").is_ok() {
            git_repo.remote_set_url("origin", &repo.url)?;
        } else {
            git_repo.remote("origin", &repo.url)?;
        }
        Ok(())
    }

    fn set_origin_with_credentials(&self, repo: &Repo) -> Result<(), GitError> {
        let git_repo = self.open(repo)?;
        if git_repo.find_remote("origin").is_ok() {
            git_repo.remote_set_url("origin", &repo.clone_url)?;
        } else {
            git_repo.remote("origin", &repo.clone_url)?;
        }
        Ok(())
    }

    fn branch_list(&self, repo: &Repo) -> Result<String, GitError> {
        let git_repo = self.open(repo)?;
        let head_branch = git_repo
            .head()
            .ok()
            .and_then(|h| h.shorthand().map(|s| s.to_string()));

        let mut lines = Vec::new();
        for branch in git_repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                if head_branch.as_deref() == Some(name) {
                    lines.push(format!("* {name}"));
                } else {
                    lines.push(format!("  {name}"));
                }
            }
        }
        Ok(lines.join("\n"))
    }

    fn short_status(&self, repo: &Repo) -> Result<String, GitError> {
        let git_repo = self.open(repo)?;
        self.statuses_string(&git_repo)
    }

    fn repo_commit_count(&self, repo: &Repo) -> Result<u64, GitError> {
        let git_repo = self.open(repo)?;
        let oid = git_repo.refname_to_id(&format!("refs/heads/{}", repo.clone_branch))?;
        let mut walk = git_repo.revwalk()?;
        walk.push(oid)?;
        Ok(walk.count() as u64)
    }

    fn has_remote_heads(&self, repo: &Repo) -> Result<bool, GitError> {
        let git_repo = self.open(repo)?;
        let mut remote = git_repo.find_remote("origin")?;
        let connection = remote.connect_auth(
            Direction::Fetch,
            Some(remote_callbacks(repo.clone_url.clone())),
            None,
        )?;
        let has_heads = connection
            .list()?
            .iter()
            .any(|head| head.name().starts_with("refs/heads/"));
        Ok(has_heads)
    }

    fn get_remote_url(&self, repo: &Repo, remote: &str) -> Result<String, GitError> {
        let git_repo = self.open(repo)?;
        let remote = git_repo.find_remote(remote)?;
        remote
            .url()
            .map(|u| u.to_string())
            .ok_or_else(|| GitError::Other("remote has no URL".to_string()))
    }

    fn get_remote_default_branch(&self, repo: &Repo) -> Result<String, GitError> {
        let git_repo = self.open(repo)?;

        // Symbolic ref first: fast and offline.
        if let Ok(reference) = git_repo.find_reference("refs/remotes/origin/HEAD") {
            if let Some(target) = reference.symbolic_target() {
                if let Some(branch) = target.rsplit('/').next() {
                    if !branch.is_empty() {
                        return Ok(branch.to_string());
                    }
                }
            }
        }

        let mut remote = git_repo.find_remote("origin")?;
        let connection = remote.connect_auth(
            Direction::Fetch,
            Some(remote_callbacks(repo.clone_url.clone())),
            None,
        )?;
        let default = connection.default_branch()?;
        let refname = default
            .as_str()
            .ok_or_else(|| GitError::Other("default branch name is not utf-8".to_string()))?;
        refname
            .strip_prefix("refs/heads/")
            .map(|b| b.to_string())
            .ok_or_else(|| {
                GitError::Other(format!("unexpected default branch ref '{refname}'"))
            })
    }

    fn get_current_branch(&self, repo: &Repo) -> Result<String, GitError> {
        let git_repo = self.open(repo)?;
        let head = git_repo.head()?;
        if head.is_branch() {
            return Ok(head.shorthand().unwrap_or_default().to_string());
        }
        // Detached HEAD reports the abbreviated commit, like rev-parse does.
        let oid = head
            .target()
            .ok_or_else(|| GitError::InvalidState("HEAD has no target".to_string()))?;
        Ok(oid.to_string()[..7].to_string())
    }

    fn get_ref_hash(&self, repo: &Repo, refname: &str) -> Result<String, GitError> {
        let git_repo = self.open(repo)?;
        let oid = git_repo.refname_to_id(refname)?;
        Ok(oid.to_string())
    }

    fn has_local_changes(&self, repo: &Repo) -> Result<bool, GitError> {
        Ok(!self.short_status(repo)?.is_empty())
    }

    fn has_unpushed_commits(&self, repo: &Repo) -> Result<bool, GitError> {
        let git_repo = self.open(repo)?;
        let head = git_repo.head()?;
        if !head.is_branch() {
            return Ok(false);
        }
        let branch_name = head.shorthand().unwrap_or_default().to_string();
        let branch = git_repo.find_branch(&branch_name, BranchType::Local)?;
        let upstream = match branch.upstream() {
            Ok(upstream) => upstream,
            // No tracking ref configured means nothing to be ahead of.
            Err(_) => return Ok(false),
        };

        let local_oid = head
            .target()
            .ok_or_else(|| GitError::InvalidState("HEAD has no target".to_string()))?;
        let upstream_oid = upstream
            .get()
            .target()
            .ok_or_else(|| GitError::InvalidState("upstream has no target".to_string()))?;
        let (ahead, _behind) = git_repo.graph_ahead_behind(local_oid, upstream_oid)?;
        Ok(ahead > 0)
    }

    fn has_commits_not_on_default_branch(
        &self,
        repo: &Repo,
        current_branch: &str,
    ) -> Result<bool, GitError> {
        let git_repo = self.open(repo)?;
        let current = git_repo.refname_to_id(&format!("refs/heads/{current_branch}"))?;
        let default = git_repo.refname_to_id(&format!("refs/heads/{}", repo.clone_branch))?;
        if current == default {
            return Ok(false);
        }
        let (ahead, _) = git_repo.graph_ahead_behind(current, default)?;
        Ok(ahead > 0)
    }

    fn is_default_branch_behind_head(
        &self,
        repo: &Repo,
        current_branch: &str,
    ) -> Result<bool, GitError> {
        let git_repo = self.open(repo)?;
        let default = git_repo.refname_to_id(&format!("refs/heads/{}", repo.clone_branch))?;
        let current = git_repo.refname_to_id(&format!("refs/heads/{current_branch}"))?;
        if default == current {
            return Ok(false);
        }
        Ok(git_repo.graph_descendant_of(current, default)?)
    }

    fn merge_fast_forward(&self, repo: &Repo) -> Result<(), GitError> {
        let git_repo = self.open(repo)?;
        let target = format!("refs/remotes/origin/{}", repo.clone_branch);
        self.fast_forward_to(&git_repo, &target)
    }

    fn merge_into_default_branch(
        &self,
        repo: &Repo,
        current_branch: &str,
    ) -> Result<(), GitError> {
        let git_repo = self.open(repo)?;
        self.checkout_branch(&git_repo, &repo.clone_branch)?;
        let source = format!("refs/heads/{current_branch}");
        self.fast_forward_to(&git_repo, &source)
    }

    fn update_ref(&self, repo: &Repo, refname: &str, commit_ref: &str) -> Result<(), GitError> {
        let git_repo = self.open(repo)?;
        let oid = git_repo.refname_to_id(commit_ref)?;
        git_repo.reference(refname, oid, true, &format!("update {refname}"))?;
        Ok(())
    }
}
