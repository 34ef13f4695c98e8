//! Per-repository decision making and run statistics.
//!
//! Each kept repo passes through [`RepoProcessor::process`] exactly once:
//! clone when the destination is missing, otherwise one of the update
//! flavours (mirror, no-clean, or the default clean/checkout/reset/pull).
//! All counter and event mutations go through [`RunStats`], which is safe
//! to share across the worker pool.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::Settings;
use crate::git::Gitter;
use crate::scm::Repo;

/// Counters and event logs for one engine invocation.
///
/// Simple counters are atomics; event vectors sit behind mutexes. Both log
/// vectors are append-only: nothing is ever dropped or rewritten.
#[derive(Debug, Default)]
pub struct RunStats {
    pub clone_count: AtomicU64,
    pub pulled_count: AtomicU64,
    pub update_remote_count: AtomicU64,
    pub new_commits: AtomicU64,
    pub synced_count: AtomicU64,
    pub total_duration_seconds: AtomicU64,
    clone_infos: Mutex<Vec<String>>,
    clone_errors: Mutex<Vec<String>>,
    untouched_repos: Mutex<Vec<PathBuf>>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_info(&self, message: impl Into<String>) {
        if let Ok(mut infos) = self.clone_infos.lock() {
            infos.push(message.into());
        }
    }

    pub fn add_error(&self, message: impl Into<String>) {
        if let Ok(mut errors) = self.clone_errors.lock() {
            errors.push(message.into());
        }
    }

    pub fn add_untouched(&self, path: PathBuf) {
        if let Ok(mut untouched) = self.untouched_repos.lock() {
            untouched.push(path);
        }
    }

    pub fn infos(&self) -> Vec<String> {
        self.clone_infos.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<String> {
        self.clone_errors
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn untouched(&self) -> Vec<PathBuf> {
        self.untouched_repos
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn set_total_duration(&self, seconds: u64) {
        self.total_duration_seconds.store(seconds, Ordering::Relaxed);
    }
}

pub struct RepoProcessor {
    git: Arc<dyn Gitter>,
    settings: Arc<Settings>,
    stats: Arc<RunStats>,
}

impl RepoProcessor {
    pub fn new(git: Arc<dyn Gitter>, settings: Arc<Settings>, stats: Arc<RunStats>) -> Self {
        RepoProcessor {
            git,
            settings,
            stats,
        }
    }

    /// Drives one repository to its planned state. Never panics the pool:
    /// every failure lands in the stats as a per-repo error.
    pub fn process(&self, repo: &mut Repo) {
        if repo.host_path.exists() {
            self.update_existing(repo);
        } else {
            self.clone_new(repo);
        }
    }

    fn clone_new(&self, repo: &mut Repo) {
        if let Err(err) = self.git.clone_repo(repo) {
            self.stats.add_error(format!(
                "Problem trying to clone {} Error: {err}",
                repo.url
            ));
            return;
        }
        self.stats.clone_count.fetch_add(1, Ordering::Relaxed);

        // A mirror clone has no working tree to check out.
        if !self.settings.backup {
            match self.git.has_remote_heads(repo) {
                Ok(false) => {
                    self.stats.add_info(format!(
                        "Could not checkout {} due to repository being empty, repo: {}",
                        repo.clone_branch, repo.url
                    ));
                    self.restore_clean_origin(repo);
                    return;
                }
                Err(err) => {
                    self.stats.add_error(format!(
                        "Problem checking remote heads for {} Error: {err}",
                        repo.url
                    ));
                    self.restore_clean_origin(repo);
                    return;
                }
                Ok(true) => {}
            }

            if !repo.clone_branch.is_empty() {
                if let Err(err) = self.git.checkout(repo) {
                    self.stats.add_error(format!(
                        "Problem trying to checkout {} for {} Error: {err}",
                        repo.clone_branch, repo.url
                    ));
                }
            }
        }

        self.restore_clean_origin(repo);
    }

    fn update_existing(&self, repo: &mut Repo) {
        if let Err(err) = self.git.set_origin_with_credentials(repo) {
            self.stats.add_error(format!(
                "Problem setting remote for {} Error: {err}",
                repo.url
            ));
            return;
        }

        if self.settings.backup {
            self.update_mirror(repo);
        } else if self.settings.no_clean {
            self.update_no_clean(repo);
        } else {
            self.update_default(repo);
        }

        self.restore_clean_origin(repo);
    }

    fn update_mirror(&self, repo: &Repo) {
        match self.git.update_remote(repo) {
            Ok(()) => {
                self.stats.update_remote_count.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.stats.add_error(format!(
                    "Could not update remotes in {} Error: {err}",
                    repo.url
                ));
            }
        }
    }

    fn update_no_clean(&self, repo: &mut Repo) {
        if !self.ensure_clone_branch(repo) {
            return;
        }

        let before = self.commit_count(repo);
        if let Err(err) = self.git.fetch_clone_branch(repo) {
            self.stats.add_error(format!(
                "Problem trying to fetch {} for {} Error: {err}",
                repo.clone_branch, repo.url
            ));
            return;
        }
        let after = self.commit_count(repo);
        self.record_new_commits(repo, before, after);

        self.run_sync(repo);
        self.stats.pulled_count.fetch_add(1, Ordering::Relaxed);
    }

    fn update_default(&self, repo: &mut Repo) {
        if !self.ensure_clone_branch(repo) {
            return;
        }

        if let Err(err) = self.git.clean(repo) {
            self.stats.add_error(format!(
                "Problem running git clean in {} Error: {err}",
                repo.url
            ));
            return;
        }
        if let Err(err) = self.git.checkout(repo) {
            self.stats.add_error(format!(
                "Problem trying to checkout {} for {} Error: {err}",
                repo.clone_branch, repo.url
            ));
            return;
        }
        if let Err(err) = self.git.reset_to_origin(repo) {
            self.stats.add_error(format!(
                "Problem resetting {} for {} Error: {err}",
                repo.clone_branch, repo.url
            ));
            return;
        }

        let before = self.commit_count(repo);
        if let Err(err) = self.git.pull(repo) {
            self.stats.add_error(format!(
                "Problem trying to pull {} for {} Error: {err}",
                repo.clone_branch, repo.url
            ));
            return;
        }
        let after = self.commit_count(repo);
        self.record_new_commits(repo, before, after);

        if self.settings.fetch_all {
            if let Err(err) = self.git.fetch_all(repo) {
                self.stats.add_error(format!(
                    "Problem trying to fetch all remote branches for {} Error: {err}",
                    repo.url
                ));
            }
        }

        self.run_sync(repo);
        self.stats.pulled_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Fills in an empty clone branch from the remote's declared default.
    fn ensure_clone_branch(&self, repo: &mut Repo) -> bool {
        if !repo.clone_branch.is_empty() {
            return true;
        }
        match self.git.get_remote_default_branch(repo) {
            Ok(branch) => {
                repo.clone_branch = branch;
                true
            }
            Err(err) => {
                self.stats.add_error(format!(
                    "Could not determine default branch for {} Error: {err}",
                    repo.url
                ));
                false
            }
        }
    }

    fn run_sync(&self, repo: &mut Repo) {
        if !self.settings.sync_default_branch {
            return;
        }
        match self.git.sync_default_branch(repo) {
            Ok(true) => {
                self.stats.synced_count.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(err) => {
                self.stats.add_error(format!(
                    "Problem syncing default branch for {} Error: {err}",
                    repo.url
                ));
            }
        }
    }

    fn commit_count(&self, repo: &Repo) -> u64 {
        self.git.repo_commit_count(repo).unwrap_or(0)
    }

    /// Adds the non-negative pre/post delta to the run total and, when the
    /// repo shows no divergence at all, remembers it as untouched.
    fn record_new_commits(&self, repo: &Repo, before: u64, after: u64) {
        let delta = after.saturating_sub(before);
        if delta > 0 {
            self.stats.new_commits.fetch_add(delta, Ordering::Relaxed);
        }

        if self.settings.prune_untouched && delta == 0 {
            let clean = self
                .git
                .has_local_changes(repo)
                .map(|dirty| !dirty)
                .unwrap_or(false);
            let no_unpushed = self
                .git
                .has_unpushed_commits(repo)
                .map(|ahead| !ahead)
                .unwrap_or(false);
            if clean && no_unpushed {
                self.stats.add_untouched(repo.host_path.clone());
            }
        }
    }

    fn restore_clean_origin(&self, repo: &Repo) {
        if repo.clone_url == repo.url {
            return;
        }
        if let Err(err) = self.git.set_origin(repo) {
            self.stats.add_error(format!(
                "Problem resetting remote URL for {} Error: {err}",
                repo.url
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_counters_accumulate_across_threads() {
        let stats = Arc::new(RunStats::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    stats.clone_count.fetch_add(1, Ordering::Relaxed);
                    stats.new_commits.fetch_add(2, Ordering::Relaxed);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.clone_count.load(Ordering::Relaxed), 800);
        assert_eq!(stats.new_commits.load(Ordering::Relaxed), 1600);
    }

    #[test]
    fn test_event_logs_are_append_only() {
        let stats = RunStats::new();
        stats.add_info("first");
        stats.add_error("bad");
        stats.add_info("second");
        assert_eq!(stats.infos(), vec!["first", "second"]);
        assert_eq!(stats.errors(), vec!["bad"]);
    }

    #[test]
    fn test_untouched_collection() {
        let stats = RunStats::new();
        stats.add_untouched(PathBuf::from("/tmp/x"));
        assert_eq!(stats.untouched(), vec![PathBuf::from("/tmp/x")]);
    }
}
