//! End-to-end clone behaviour against local fixture remotes: first-run
//! clones, filters, collisions, empty repositories, pulls, and mirrors.

mod common;

use common::git::{is_git_available, run_git, RemoteRepo};
use gitfleet::config::{GitBackendKind, Settings};
use gitfleet::engine::filter;
use gitfleet::engine::planner;
use gitfleet::engine::processor::{RepoProcessor, RunStats};
use gitfleet::git;
use gitfleet::scm::Repo;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

fn test_settings(clone_root: &Path) -> Settings {
    let mut settings = Settings::from_env();
    settings.scm_type = "github".to_string();
    settings.no_token = true;
    settings.token = String::new();
    settings.git_backend = GitBackendKind::Subprocess;
    settings.absolute_path_to_clone_to = format!("{}/", clone_root.display());
    // Keep the filters clear of any real operator config.
    settings.ignore_path = Some("/nonexistent/ignore".to_string());
    settings.only_path = Some("/nonexistent/only".to_string());
    settings.set_output_dir("acme");
    settings
}

fn repo_for(remote: &RemoteRepo, name: &str) -> Repo {
    Repo {
        name: name.to_string(),
        path: format!("acme/{name}"),
        url: remote.url(),
        clone_url: remote.url(),
        clone_branch: "main".to_string(),
        ..Default::default()
    }
}

fn process_all(repos: &mut [Repo], settings: &Settings) -> Arc<RunStats> {
    let stats = Arc::new(RunStats::new());
    let backend = git::new_backend(settings);
    let processor = RepoProcessor::new(backend, Arc::new(settings.clone()), Arc::clone(&stats));
    for repo in repos.iter_mut() {
        processor.process(repo);
    }
    stats
}

#[test]
fn test_prefix_filter_clones_only_matching_repos() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clone_root = TempDir::new().unwrap();

    let names = ["test-a", "test-b", "other-c", "other-d"];
    let repos: Vec<Repo> = names
        .iter()
        .map(|name| repo_for(&RemoteRepo::create(fixtures.path(), name), name))
        .collect();

    let mut settings = test_settings(clone_root.path());
    settings.match_prefix = Some("test".to_string());

    let outcome = filter::apply_filters(repos, &settings).unwrap();
    let mut kept = outcome.repos;
    assert_eq!(kept.len(), 2);

    planner::plan(&mut kept, &settings).unwrap();
    std::fs::create_dir_all(&settings.output_dir_absolute_path).unwrap();
    let stats = process_all(&mut kept, &settings);

    assert_eq!(stats.clone_count.load(Ordering::Relaxed), 2);
    let out = settings.output_dir_absolute_path;
    assert!(out.join("test-a").join(".git").is_dir());
    assert!(out.join("test-b").join(".git").is_dir());
    assert!(!out.join("other-c").exists());
    assert!(!out.join("other-d").exists());
}

#[test]
fn test_exclude_regex_clones_the_rest() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clone_root = TempDir::new().unwrap();

    let names = ["test-a", "test-b", "keep-c", "keep-d", "keep-e"];
    let repos: Vec<Repo> = names
        .iter()
        .map(|name| repo_for(&RemoteRepo::create(fixtures.path(), name), name))
        .collect();

    let mut settings = test_settings(clone_root.path());
    settings.exclude_match_regex = Some("^test-".to_string());

    let mut kept = filter::apply_filters(repos, &settings).unwrap().repos;
    assert_eq!(kept.len(), 3);

    planner::plan(&mut kept, &settings).unwrap();
    std::fs::create_dir_all(&settings.output_dir_absolute_path).unwrap();
    process_all(&mut kept, &settings);

    let out = settings.output_dir_absolute_path;
    assert!(out.join("keep-c").exists());
    assert!(out.join("keep-d").exists());
    assert!(out.join("keep-e").exists());
    assert!(!out.join("test-a").exists());
}

#[test]
fn test_empty_repository_clones_without_checkout() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clone_root = TempDir::new().unwrap();

    let remote = RemoteRepo::create_empty(fixtures.path(), "hollow");
    let settings = test_settings(clone_root.path());
    let mut repos = vec![repo_for(&remote, "hollow")];

    planner::plan(&mut repos, &settings).unwrap();
    std::fs::create_dir_all(&settings.output_dir_absolute_path).unwrap();
    let stats = process_all(&mut repos, &settings);

    assert!(settings.output_dir_absolute_path.join("hollow").exists());
    assert_eq!(stats.clone_count.load(Ordering::Relaxed), 1);
    assert_eq!(stats.pulled_count.load(Ordering::Relaxed), 0);
    assert!(stats
        .infos()
        .iter()
        .any(|i| i.contains("repository being empty")));
    assert!(stats.errors().is_empty());
}

#[test]
fn test_second_run_pulls_new_commits() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clone_root = TempDir::new().unwrap();

    let remote = RemoteRepo::create(fixtures.path(), "app");
    let settings = test_settings(clone_root.path());
    let mut repos = vec![repo_for(&remote, "app")];

    planner::plan(&mut repos, &settings).unwrap();
    std::fs::create_dir_all(&settings.output_dir_absolute_path).unwrap();
    let first = process_all(&mut repos, &settings);
    assert_eq!(first.clone_count.load(Ordering::Relaxed), 1);

    remote.add_commit("feature-1.txt");
    remote.add_commit("feature-2.txt");

    let second = process_all(&mut repos, &settings);
    assert_eq!(second.clone_count.load(Ordering::Relaxed), 0);
    assert_eq!(second.pulled_count.load(Ordering::Relaxed), 1);
    assert_eq!(second.new_commits.load(Ordering::Relaxed), 2);
    assert!(second.errors().is_empty());

    let checkout = settings.output_dir_absolute_path.join("app");
    assert!(checkout.join("feature-1.txt").exists());
    assert!(checkout.join("feature-2.txt").exists());
}

#[test]
fn test_local_drift_is_reset_on_default_update() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clone_root = TempDir::new().unwrap();

    let remote = RemoteRepo::create(fixtures.path(), "app");
    let settings = test_settings(clone_root.path());
    let mut repos = vec![repo_for(&remote, "app")];

    planner::plan(&mut repos, &settings).unwrap();
    std::fs::create_dir_all(&settings.output_dir_absolute_path).unwrap();
    process_all(&mut repos, &settings);

    // Untracked junk and a local edit both disappear on the next run.
    let checkout = settings.output_dir_absolute_path.join("app");
    std::fs::write(checkout.join("junk.tmp"), "scratch").unwrap();
    std::fs::write(checkout.join("README.md"), "local edit").unwrap();

    let stats = process_all(&mut repos, &settings);
    assert!(stats.errors().is_empty());
    assert!(!checkout.join("junk.tmp").exists());
    assert_eq!(
        std::fs::read_to_string(checkout.join("README.md")).unwrap(),
        "# app\n"
    );
}

#[test]
fn test_backup_mode_creates_and_updates_mirror() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clone_root = TempDir::new().unwrap();

    let remote = RemoteRepo::create(fixtures.path(), "app");
    let mut settings = test_settings(clone_root.path());
    settings.backup = true;
    settings.set_output_dir("acme");
    let mut repos = vec![repo_for(&remote, "app")];

    planner::plan(&mut repos, &settings).unwrap();
    std::fs::create_dir_all(&settings.output_dir_absolute_path).unwrap();
    let first = process_all(&mut repos, &settings);
    assert_eq!(first.clone_count.load(Ordering::Relaxed), 1);

    // A mirror has refs but no working tree.
    let mirror = repos[0].host_path.clone();
    assert!(mirror.join("HEAD").exists());
    assert!(!mirror.join(".git").exists());
    assert!(!mirror.join("README.md").exists());

    remote.add_commit("later.txt");
    let second = process_all(&mut repos, &settings);
    assert_eq!(second.update_remote_count.load(Ordering::Relaxed), 1);
    assert!(second.errors().is_empty());

    let mirror_head = run_git(&mirror, &["rev-parse", "main"]);
    let remote_head = run_git(&remote.bare, &["rev-parse", "main"]);
    assert_eq!(mirror_head, remote_head);
}

#[test]
fn test_colliding_names_land_in_distinct_directories() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clone_root = TempDir::new().unwrap();

    let remote_a = RemoteRepo::create(fixtures.path(), "team-a-app");
    let remote_b = RemoteRepo::create(fixtures.path(), "team-b-app");

    let mut repo_a = repo_for(&remote_a, "app");
    repo_a.path = "team-a/app".to_string();
    let mut repo_b = repo_for(&remote_b, "app");
    repo_b.path = "team-b/app".to_string();

    let settings = test_settings(clone_root.path());
    let mut repos = vec![repo_a, repo_b];
    let plan = planner::plan(&mut repos, &settings).unwrap();
    assert!(plan.has_collisions);

    std::fs::create_dir_all(&settings.output_dir_absolute_path).unwrap();
    let stats = process_all(&mut repos, &settings);
    assert_eq!(stats.clone_count.load(Ordering::Relaxed), 2);

    let out = settings.output_dir_absolute_path;
    assert!(out.join("team-a_app").join(".git").is_dir());
    assert!(out.join("team-b_app").join(".git").is_dir());
}

#[test]
fn test_unreachable_remote_is_an_error_but_not_fatal() {
    if !is_git_available() {
        eprintln!("git not available, skipping test");
        return;
    }
    let fixtures = TempDir::new().unwrap();
    let clone_root = TempDir::new().unwrap();

    let good = RemoteRepo::create(fixtures.path(), "good");
    let mut bad = repo_for(&good, "bad");
    bad.url = format!("{}/does-not-exist.git", fixtures.path().display());
    bad.clone_url = bad.url.clone();

    let settings = test_settings(clone_root.path());
    let mut repos = vec![bad, repo_for(&good, "good")];
    planner::plan(&mut repos, &settings).unwrap();
    std::fs::create_dir_all(&settings.output_dir_absolute_path).unwrap();

    let stats = process_all(&mut repos, &settings);
    assert_eq!(stats.clone_count.load(Ordering::Relaxed), 1);
    assert_eq!(stats.errors().len(), 1);
    assert!(settings.output_dir_absolute_path.join("good").exists());
}
