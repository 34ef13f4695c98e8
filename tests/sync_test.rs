//! Default-branch sync behaviour: fast-forwarding a clean clone, refusing
//! to touch dirty or unpushed work, moving the ref without the worktree
//! from a feature branch, and auto-detecting the remote's declared default.

mod common;

use common::git::{is_git_available, run_git, RemoteRepo};
use gitfleet::git::library::LibraryGit;
use gitfleet::git::subprocess::SubprocessGit;
use gitfleet::git::{GitOptions, Gitter};
use gitfleet::scm::Repo;
use std::path::Path;
use tempfile::TempDir;

fn clone_fixture(remote: &RemoteRepo, root: &Path, name: &str) -> Repo {
    let dest = root.join(name);
    run_git(root, &[
        "clone",
        "--quiet",
        &remote.url(),
        dest.to_str().unwrap(),
    ]);
    Repo {
        name: name.to_string(),
        path: name.to_string(),
        url: remote.url(),
        clone_url: remote.url(),
        clone_branch: "main".to_string(),
        host_path: dest,
        ..Default::default()
    }
}

fn subprocess_backend() -> SubprocessGit {
    SubprocessGit::new(GitOptions::default())
}

#[test]
fn test_sync_fast_forwards_clean_clone_on_default_branch() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clones = TempDir::new().unwrap();

    let remote = RemoteRepo::create(fixtures.path(), "app");
    let mut repo = clone_fixture(&remote, clones.path(), "app");
    remote.add_commit("new-work.txt");
    remote.add_commit("more-work.txt");

    let backend = subprocess_backend();
    let updated = backend.sync_default_branch(&mut repo).unwrap();

    assert!(updated);
    let local = backend.get_ref_hash(&repo, "refs/heads/main").unwrap();
    let remote_head = run_git(&remote.bare, &["rev-parse", "main"]);
    assert_eq!(local, remote_head);
    assert!(repo.host_path.join("new-work.txt").exists());
    assert!(repo.host_path.join("more-work.txt").exists());
}

#[test]
fn test_sync_skips_dirty_working_tree() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clones = TempDir::new().unwrap();

    let remote = RemoteRepo::create(fixtures.path(), "app");
    let mut repo = clone_fixture(&remote, clones.path(), "app");

    let backend = subprocess_backend();
    let before = backend.get_ref_hash(&repo, "refs/heads/main").unwrap();

    std::fs::write(repo.host_path.join("uncommitted.txt"), "wip").unwrap();
    remote.add_commit("remote-change.txt");

    let updated = backend.sync_default_branch(&mut repo).unwrap();
    assert!(!updated);
    let after = backend.get_ref_hash(&repo, "refs/heads/main").unwrap();
    assert_eq!(before, after);
    assert!(!repo.host_path.join("remote-change.txt").exists());
}

#[test]
fn test_sync_skips_unpushed_commits_on_default_branch() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clones = TempDir::new().unwrap();

    let remote = RemoteRepo::create(fixtures.path(), "app");
    let mut repo = clone_fixture(&remote, clones.path(), "app");

    std::fs::write(repo.host_path.join("local-work.txt"), "mine").unwrap();
    run_git(&repo.host_path, &["add", "."]);
    run_git(&repo.host_path, &["commit", "-q", "-m", "local only"]);

    let backend = subprocess_backend();
    let before = backend.get_ref_hash(&repo, "refs/heads/main").unwrap();
    remote.add_commit("remote-change.txt");

    let updated = backend.sync_default_branch(&mut repo).unwrap();
    assert!(!updated);
    let after = backend.get_ref_hash(&repo, "refs/heads/main").unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_sync_from_feature_branch_moves_ref_not_worktree() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clones = TempDir::new().unwrap();

    let remote = RemoteRepo::create(fixtures.path(), "app");
    let mut repo = clone_fixture(&remote, clones.path(), "app");
    run_git(&repo.host_path, &["checkout", "-q", "-b", "feature"]);
    remote.add_commit("on-default.txt");

    let backend = subprocess_backend();
    let updated = backend.sync_default_branch(&mut repo).unwrap();

    assert!(updated);
    let local_main = backend.get_ref_hash(&repo, "refs/heads/main").unwrap();
    let remote_head = run_git(&remote.bare, &["rev-parse", "main"]);
    assert_eq!(local_main, remote_head);
    assert_eq!(
        backend.get_current_branch(&repo).unwrap(),
        "feature"
    );
    assert!(!repo.host_path.join("on-default.txt").exists());
}

#[test]
fn test_sync_auto_detects_default_when_configured_branch_is_wrong() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clones = TempDir::new().unwrap();

    let remote = RemoteRepo::create(fixtures.path(), "app");
    let mut repo = clone_fixture(&remote, clones.path(), "app");
    // Operator configured a branch the remote does not declare.
    repo.clone_branch = "master".to_string();
    remote.add_commit("ahead.txt");

    let backend = subprocess_backend();
    let updated = backend.sync_default_branch(&mut repo).unwrap();

    assert!(updated);
    let local = backend.get_ref_hash(&repo, "refs/heads/main").unwrap();
    let remote_head = run_git(&remote.bare, &["rev-parse", "main"]);
    assert_eq!(local, remote_head);
    // The configured branch is restored once the sync completes.
    assert_eq!(repo.clone_branch, "master");
}

#[test]
fn test_sync_noop_when_remote_unchanged() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clones = TempDir::new().unwrap();

    let remote = RemoteRepo::create(fixtures.path(), "app");
    let mut repo = clone_fixture(&remote, clones.path(), "app");

    let backend = subprocess_backend();
    let updated = backend.sync_default_branch(&mut repo).unwrap();
    assert!(!updated);
}

#[test]
fn test_sync_parity_between_backends() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clones = TempDir::new().unwrap();

    let remote_a = RemoteRepo::create(fixtures.path(), "lib-a");
    let remote_b = RemoteRepo::create(fixtures.path(), "lib-b");
    let mut repo_a = clone_fixture(&remote_a, clones.path(), "lib-a");
    let mut repo_b = clone_fixture(&remote_b, clones.path(), "lib-b");
    remote_a.add_commit("change.txt");
    remote_b.add_commit("change.txt");

    let subprocess = subprocess_backend();
    let library = LibraryGit::new(GitOptions::default());

    let updated_a = subprocess.sync_default_branch(&mut repo_a).unwrap();
    let updated_b = library.sync_default_branch(&mut repo_b).unwrap();
    assert!(updated_a);
    assert!(updated_b);

    assert_eq!(
        subprocess.get_ref_hash(&repo_a, "refs/heads/main").unwrap(),
        run_git(&remote_a.bare, &["rev-parse", "main"])
    );
    assert_eq!(
        library.get_ref_hash(&repo_b, "refs/heads/main").unwrap(),
        run_git(&remote_b.bare, &["rev-parse", "main"])
    );
    assert!(repo_a.host_path.join("change.txt").exists());
    assert!(repo_b.host_path.join("change.txt").exists());
}
