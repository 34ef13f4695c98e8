//! Library and subprocess backends must return equal observable results
//! for the same repository fixture.

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

fn backends() -> (SubprocessGit, LibraryGit) {
    (
        SubprocessGit::new(GitOptions::default()),
        LibraryGit::new(GitOptions::default()),
    )
}

#[test]
fn test_parity_read_operations_on_clean_clone() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clones = TempDir::new().unwrap();

    let remote = RemoteRepo::create(fixtures.path(), "app");
    remote.add_commit("second.txt");
    let repo = clone_fixture(&remote, clones.path(), "app");
    let (subprocess, library) = backends();

    assert_eq!(
        subprocess.get_current_branch(&repo).unwrap(),
        library.get_current_branch(&repo).unwrap()
    );
    assert_eq!(
        subprocess.repo_commit_count(&repo).unwrap(),
        library.repo_commit_count(&repo).unwrap()
    );
    assert_eq!(subprocess.repo_commit_count(&repo).unwrap(), 2);
    assert_eq!(
        subprocess.get_ref_hash(&repo, "refs/heads/main").unwrap(),
        library.get_ref_hash(&repo, "refs/heads/main").unwrap()
    );
    assert_eq!(
        subprocess.get_remote_default_branch(&repo).unwrap(),
        library.get_remote_default_branch(&repo).unwrap()
    );
    assert_eq!(
        subprocess.get_remote_url(&repo, "origin").unwrap(),
        library.get_remote_url(&repo, "origin").unwrap()
    );
    assert_eq!(
        subprocess.branch_list(&repo).unwrap(),
        library.branch_list(&repo).unwrap()
    );
}

#[test]
fn test_parity_local_changes_detection() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clones = TempDir::new().unwrap();

    let remote = RemoteRepo::create(fixtures.path(), "app");
    let repo = clone_fixture(&remote, clones.path(), "app");
    let (subprocess, library) = backends();

    assert!(!subprocess.has_local_changes(&repo).unwrap());
    assert!(!library.has_local_changes(&repo).unwrap());

    std::fs::write(repo.host_path.join("scratch.txt"), "wip").unwrap();
    assert!(subprocess.has_local_changes(&repo).unwrap());
    assert!(library.has_local_changes(&repo).unwrap());
}

#[test]
fn test_parity_unpushed_commit_detection() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clones = TempDir::new().unwrap();

    let remote = RemoteRepo::create(fixtures.path(), "app");
    let repo = clone_fixture(&remote, clones.path(), "app");
    let (subprocess, library) = backends();

    assert!(!subprocess.has_unpushed_commits(&repo).unwrap());
    assert!(!library.has_unpushed_commits(&repo).unwrap());

    std::fs::write(repo.host_path.join("local.txt"), "mine").unwrap();
    run_git(&repo.host_path, &["add", "."]);
    run_git(&repo.host_path, &["commit", "-q", "-m", "local only"]);

    assert!(subprocess.has_unpushed_commits(&repo).unwrap());
    assert!(library.has_unpushed_commits(&repo).unwrap());
}

#[test]
fn test_parity_remote_heads_on_populated_and_empty_remotes() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clones = TempDir::new().unwrap();

    let remote = RemoteRepo::create(fixtures.path(), "full");
    let repo = clone_fixture(&remote, clones.path(), "full");
    let (subprocess, library) = backends();

    assert!(subprocess.has_remote_heads(&repo).unwrap());
    assert!(library.has_remote_heads(&repo).unwrap());

    // A clone whose origin advertises no branches at all.
    let empty_remote = RemoteRepo::create_empty(fixtures.path(), "hollow");
    let hollow_dir = clones.path().join("hollow");
    std::fs::create_dir_all(&hollow_dir).unwrap();
    run_git(&hollow_dir, &["init", "--quiet"]);
    run_git(&hollow_dir, &[
        "remote",
        "add",
        "origin",
        &empty_remote.url(),
    ]);
    let hollow = Repo {
        name: "hollow".to_string(),
        url: empty_remote.url(),
        clone_url: empty_remote.url(),
        host_path: hollow_dir,
        ..Default::default()
    };

    assert!(!subprocess.has_remote_heads(&hollow).unwrap());
    assert!(!library.has_remote_heads(&hollow).unwrap());
}

#[test]
fn test_parity_merge_fast_forward_moves_to_remote_head() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clones = TempDir::new().unwrap();

    let remote_a = RemoteRepo::create(fixtures.path(), "ff-a");
    let remote_b = RemoteRepo::create(fixtures.path(), "ff-b");
    let repo_a = clone_fixture(&remote_a, clones.path(), "ff-a");
    let repo_b = clone_fixture(&remote_b, clones.path(), "ff-b");
    remote_a.add_commit("ahead.txt");
    remote_b.add_commit("ahead.txt");

    let (subprocess, library) = backends();
    subprocess.fetch_clone_branch(&repo_a).unwrap();
    library.fetch_clone_branch(&repo_b).unwrap();
    subprocess.merge_fast_forward(&repo_a).unwrap();
    library.merge_fast_forward(&repo_b).unwrap();

    assert_eq!(
        subprocess.get_ref_hash(&repo_a, "refs/heads/main").unwrap(),
        run_git(&remote_a.bare, &["rev-parse", "main"])
    );
    assert_eq!(
        library.get_ref_hash(&repo_b, "refs/heads/main").unwrap(),
        run_git(&remote_b.bare, &["rev-parse", "main"])
    );
    assert!(repo_a.host_path.join("ahead.txt").exists());
    assert!(repo_b.host_path.join("ahead.txt").exists());
}

#[test]
fn test_parity_update_ref_moves_ref_without_worktree() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clones = TempDir::new().unwrap();

    let remote_a = RemoteRepo::create(fixtures.path(), "ref-a");
    let remote_b = RemoteRepo::create(fixtures.path(), "ref-b");
    let repo_a = clone_fixture(&remote_a, clones.path(), "ref-a");
    let repo_b = clone_fixture(&remote_b, clones.path(), "ref-b");
    remote_a.add_commit("later.txt");
    remote_b.add_commit("later.txt");

    let (subprocess, library) = backends();
    for (backend, repo) in [
        (&subprocess as &dyn Gitter, &repo_a),
        (&library as &dyn Gitter, &repo_b),
    ] {
        run_git(&repo.host_path, &["checkout", "-q", "-b", "feature"]);
        backend.fetch_clone_branch(repo).unwrap();
        backend
            .update_ref(repo, "refs/heads/main", "refs/remotes/origin/main")
            .unwrap();
        assert_eq!(
            backend.get_ref_hash(repo, "refs/heads/main").unwrap(),
            backend
                .get_ref_hash(repo, "refs/remotes/origin/main")
                .unwrap()
        );
        assert_eq!(backend.get_current_branch(repo).unwrap(), "feature");
        assert!(!repo.host_path.join("later.txt").exists());
    }
}

#[test]
fn test_parity_branch_comparison_operations() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clones = TempDir::new().unwrap();

    let remote_a = RemoteRepo::create(fixtures.path(), "cmp-a");
    let remote_b = RemoteRepo::create(fixtures.path(), "cmp-b");
    let repo_a = clone_fixture(&remote_a, clones.path(), "cmp-a");
    let repo_b = clone_fixture(&remote_b, clones.path(), "cmp-b");
    let (subprocess, library) = backends();

    for (backend, repo) in [
        (&subprocess as &dyn Gitter, &repo_a),
        (&library as &dyn Gitter, &repo_b),
    ] {
        // A feature branch one commit ahead of the default branch.
        run_git(&repo.host_path, &["checkout", "-q", "-b", "feature"]);
        std::fs::write(repo.host_path.join("feature.txt"), "work").unwrap();
        run_git(&repo.host_path, &["add", "."]);
        run_git(&repo.host_path, &["commit", "-q", "-m", "feature work"]);

        assert!(backend
            .has_commits_not_on_default_branch(repo, "feature")
            .unwrap());
        assert!(backend
            .is_default_branch_behind_head(repo, "feature")
            .unwrap());

        // Fast-forwarding the default branch up to the feature tip makes
        // both answers flip.
        backend.merge_into_default_branch(repo, "feature").unwrap();
        assert!(!backend
            .has_commits_not_on_default_branch(repo, "feature")
            .unwrap());
        assert!(!backend
            .is_default_branch_behind_head(repo, "feature")
            .unwrap());
        assert_eq!(
            backend.get_ref_hash(repo, "refs/heads/main").unwrap(),
            backend.get_ref_hash(repo, "refs/heads/feature").unwrap()
        );
    }
}

#[test]
fn test_parity_short_status_empty_on_clean_tree() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clones = TempDir::new().unwrap();

    let remote = RemoteRepo::create(fixtures.path(), "app");
    let repo = clone_fixture(&remote, clones.path(), "app");
    let (subprocess, library) = backends();

    assert_eq!(subprocess.short_status(&repo).unwrap(), "");
    assert_eq!(library.short_status(&repo).unwrap(), "");
}
