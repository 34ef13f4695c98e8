//! Git operations behind a backend-neutral trait.
//!
//! Two backends implement [`Gitter`]: an in-process one over libgit2 and a
//! subprocess one driving the system `git` binary. The backend is selected
//! once per process from configuration and injected into everything that
//! touches a repository. Both must produce equivalent observable results
//! for every operation here; the parity test suite holds them to that.

pub mod library;
pub mod subprocess;

use std::sync::Arc;
use thiserror::Error;

use crate::colorlog;
use crate::config::{GitBackendKind, Settings};
use crate::scm::Repo;

/// Failure classification for Git operations. Callers decide which kinds
/// are fatal; the processor records all of them as per-repo errors while
/// the engine treats configuration-time failures as fatal.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("filesystem error: {0}")]
    Filesystem(String),
    #[error("invalid repository state: {0}")]
    InvalidState(String),
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for GitError {
    fn from(err: std::io::Error) -> Self {
        GitError::Filesystem(err.to_string())
    }
}

/// Clone/fetch behaviour shared by both backends, fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct GitOptions {
    pub clone_depth: Option<u32>,
    pub git_filter: Option<String>,
    pub include_submodules: bool,
    /// Mirror mode: no working tree, branch parameter ignored.
    pub mirror: bool,
}

impl GitOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        GitOptions {
            clone_depth: settings.clone_depth,
            git_filter: settings.git_filter.clone(),
            include_submodules: settings.include_submodules,
            mirror: settings.backup,
        }
    }
}

/// The capability set every backend provides.
pub trait Gitter: Send + Sync {
    fn clone_repo(&self, repo: &Repo) -> Result<(), GitError>;
    fn checkout(&self, repo: &Repo) -> Result<(), GitError>;
    fn clean(&self, repo: &Repo) -> Result<(), GitError>;
    fn pull(&self, repo: &Repo) -> Result<(), GitError>;
    fn fetch_all(&self, repo: &Repo) -> Result<(), GitError>;
    fn fetch_clone_branch(&self, repo: &Repo) -> Result<(), GitError>;
    fn update_remote(&self, repo: &Repo) -> Result<(), GitError>;
    fn reset_to_origin(&self, repo: &Repo) -> Result<(), GitError>;
    fn set_origin(&self, repo: &Repo) -> Result<(), GitError>;
    fn set_origin_with_credentials(&self, repo: &Repo) -> Result<(), GitError>;
    fn branch_list(&self, repo: &Repo) -> Result<String, GitError>;
    fn short_status(&self, repo: &Repo) -> Result<String, GitError>;
    fn repo_commit_count(&self, repo: &Repo) -> Result<u64, GitError>;

    /// False iff the remote advertises no branches (an empty repository).
    /// An unreachable remote is an error, not `false`.
    fn has_remote_heads(&self, repo: &Repo) -> Result<bool, GitError>;
    fn get_remote_url(&self, repo: &Repo, remote: &str) -> Result<String, GitError>;

    /// Short name of the branch the remote declares as its HEAD. Consults
    /// the local symbolic ref first and only then asks the remote.
    fn get_remote_default_branch(&self, repo: &Repo) -> Result<String, GitError>;
    fn get_current_branch(&self, repo: &Repo) -> Result<String, GitError>;
    fn get_ref_hash(&self, repo: &Repo, refname: &str) -> Result<String, GitError>;
    fn has_local_changes(&self, repo: &Repo) -> Result<bool, GitError>;

    /// False when the current branch has no upstream configured. Callers
    /// treat a failure here as "cannot prove safe, skip sync".
    fn has_unpushed_commits(&self, repo: &Repo) -> Result<bool, GitError>;
    fn has_commits_not_on_default_branch(
        &self,
        repo: &Repo,
        current_branch: &str,
    ) -> Result<bool, GitError>;
    fn is_default_branch_behind_head(
        &self,
        repo: &Repo,
        current_branch: &str,
    ) -> Result<bool, GitError>;

    /// Strictly fast-forward-only; any non-fast-forward situation is an
    /// error, never a merge commit.
    fn merge_fast_forward(&self, repo: &Repo) -> Result<(), GitError>;
    fn merge_into_default_branch(
        &self,
        repo: &Repo,
        current_branch: &str,
    ) -> Result<(), GitError>;
    fn update_ref(&self, repo: &Repo, refname: &str, commit_ref: &str) -> Result<(), GitError>;

    /// Brings the local default branch up to date with the remote without
    /// ever touching uncommitted or unpushed work.
    ///
    /// Returns whether the default-branch ref actually moved. Skips (with
    /// `Ok(false)`) when no origin is configured, when the working tree is
    /// dirty, or when the current branch is the default and carries
    /// unpushed commits. Detects the remote's declared default branch,
    /// falling back to the configured branch; fetches it; fast-forwards the
    /// worktree when checked out on the default, otherwise moves
    /// `refs/heads/<default>` without touching the worktree.
    fn sync_default_branch(&self, repo: &mut Repo) -> Result<bool, GitError> {
        if self.get_remote_url(repo, "origin").is_err() {
            return Ok(false);
        }

        let default_branch = match self.get_remote_default_branch(repo) {
            Ok(branch) => branch,
            Err(err) => {
                if repo.clone_branch.is_empty() {
                    let m = format!(
                        "Failed to determine default branch for {}: {err}",
                        repo.name
                    );
                    colorlog::print_error(&m);
                    return Err(GitError::Other(m));
                }
                repo.clone_branch.clone()
            }
        };

        let current_branch = self.get_current_branch(repo).map_err(|err| {
            let m = format!("Failed to get current branch for {}: {err}", repo.name);
            colorlog::print_error(&m);
            GitError::Other(m)
        })?;

        let dirty = self.has_local_changes(repo).map_err(|err| {
            let m = format!(
                "Failed to check working directory status for {}: {err}",
                repo.name
            );
            colorlog::print_error(&m);
            GitError::Other(m)
        })?;
        if dirty {
            return Ok(false);
        }

        // Unpushed work only matters when the sync would move the branch we
        // are standing on. A failure here usually means no tracking ref is
        // configured, which also means the sync cannot be proven safe.
        if current_branch == default_branch {
            match self.has_unpushed_commits(repo) {
                Ok(true) | Err(_) => return Ok(false),
                Ok(false) => {}
            }
        }

        let refname = format!("refs/heads/{default_branch}");
        let before_hash = self.get_ref_hash(repo, &refname).unwrap_or_default();

        let original_clone_branch =
            std::mem::replace(&mut repo.clone_branch, default_branch.clone());
        let fetch_result = self.fetch_clone_branch(repo);

        if let Err(err) = fetch_result {
            repo.clone_branch = original_clone_branch;
            let m = format!("Failed to fetch default branch for {}: {err}", repo.name);
            colorlog::print_error(&m);
            return Err(GitError::Other(m));
        }

        if current_branch == default_branch {
            let merged = self.merge_fast_forward(repo);
            repo.clone_branch = original_clone_branch;
            if let Err(err) = merged {
                let m = format!("Failed to merge remote changes for {}: {err}", repo.name);
                colorlog::print_error(&m);
                return Err(GitError::Other(m));
            }
        } else {
            repo.clone_branch = original_clone_branch;
            let commit_ref = format!("refs/remotes/origin/{default_branch}");
            if let Err(err) = self.update_ref(repo, &refname, &commit_ref) {
                let m = format!(
                    "Failed to update branch reference for {}: {err}",
                    repo.name
                );
                colorlog::print_error(&m);
                return Err(GitError::Other(m));
            }
        }

        match self.get_ref_hash(repo, &refname) {
            Ok(after_hash) => Ok(before_hash != after_hash),
            // Cannot verify the post-sync hash; assume it moved.
            Err(_) => Ok(true),
        }
    }
}

/// Builds the configured backend. Read once per process.
pub fn new_backend(settings: &Settings) -> Arc<dyn Gitter> {
    let opts = GitOptions::from_settings(settings);
    match settings.git_backend {
        GitBackendKind::Subprocess => Arc::new(subprocess::SubprocessGit::new(opts)),
        GitBackendKind::Library => Arc::new(library::LibraryGit::new(opts)),
    }
}
