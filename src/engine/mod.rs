//! The clone-run engine.
//!
//! One invocation flows: enumerate, filter, plan destinations, fan out the
//! per-repo processors over the bounded pool, reconcile the local tree,
//! then report and record. Per-repo failures are collected and never abort
//! the run; everything before the fan-out is fatal.

pub mod filter;
pub mod planner;
pub mod pool;
pub mod processor;
pub mod pruner;
pub mod stats_file;

use anyhow::{Context, Result};
use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::colorlog;
use crate::config::{CloneType, Settings};
use crate::git;
use crate::scm::{Repo, ScmClient};
use crate::utils::{dir_size_mb, format_duration_text};
use pool::WorkerPool;
use processor::{RepoProcessor, RunStats};

/// Runs one full clone pass and returns the process exit code.
///
/// `start_time` is captured before the SCM API calls so the recorded
/// duration covers the whole run, not just the Git fan-out.
pub async fn run_clone(settings: Settings, start_time: Instant) -> Result<i32> {
    let client = ScmClient::from_settings(&settings)?;
    let enumerated = match settings.clone_type {
        CloneType::Org => client.get_org_repos(&settings.target).await,
        CloneType::User => client.get_user_repos(&settings.target).await,
    }
    .context("encountered an error during enumeration, aborting")?;

    if enumerated.is_empty() {
        colorlog::print_info(format!(
            "No repos found for {} {}: {}, please verify you have sufficient \
             permissions to clone target repos, double check spelling and try again.",
            settings.scm_type,
            settings.clone_type.as_str(),
            settings.target
        ));
        return Ok(0);
    }

    let stats = Arc::new(RunStats::new());
    let filtered = filter::apply_filters(enumerated, &settings)?;
    for info in filtered.infos {
        colorlog::print_info(&info);
        stats.add_info(info);
    }
    let mut repos = filtered.repos;

    print_inventory(&repos, &settings);

    if settings.concurrency_auto_adjusted {
        colorlog::print_info(format!(
            "Clone delay is set to {} seconds. Automatically setting concurrency to 1 \
             for predictable rate limiting.",
            settings.clone_delay_seconds
        ));
    }

    if settings.dry_run {
        print_dry_run(&repos, &settings)?;
        return Ok(0);
    }

    fs::create_dir_all(&settings.output_dir_absolute_path).with_context(|| {
        format!(
            "could not create clone directory {}",
            settings.output_dir_absolute_path.display()
        )
    })?;

    let plan = planner::plan(&mut repos, &settings)?;
    let kept: Vec<Repo> = repos.clone();

    let git_backend = git::new_backend(&settings);
    let shared_settings = Arc::new(settings);
    let processor = Arc::new(RepoProcessor::new(
        git_backend,
        Arc::clone(&shared_settings),
        Arc::clone(&stats),
    ));

    let mut pool = WorkerPool::new(
        shared_settings.concurrency,
        shared_settings.clone_delay_seconds,
    );
    for repo in repos {
        let processor = Arc::clone(&processor);
        let label = repo.name.clone();
        pool.submit(label, move || {
            let mut repo = repo;
            processor.process(&mut repo);
        })
        .await;
    }
    for (label, reason) in pool.wait_and_close().await {
        stats.add_error(format!("Worker for {label} did not complete: {reason}"));
    }

    let settings: &Settings = &shared_settings;
    let duration_seconds = (start_time.elapsed().as_secs_f64() + 0.5) as u64;
    stats.set_total_duration(duration_seconds);

    let mut untouched_prunes = 0;
    if settings.prune_untouched {
        let untouched = stats.untouched();
        untouched_prunes = pruner::prune_untouched_repos(&untouched, settings);
    }

    let infos = stats.infos();
    let errors = stats.errors();
    print_remaining_messages(&infos, &errors);
    print_summary(&stats, untouched_prunes, duration_seconds);

    if plan.has_collisions {
        println!();
        colorlog::print_info(
            "ATTENTION: collisions were detected in repo names from the groups that were \
             cloned. This occurs when multiple groups share a repo name cloned into the \
             same directory. The colliding repos were renamed with the group path appended.",
        );
    }

    let mut prune_count = 0;
    if settings.prune {
        prune_count = pruner::prune_repos(&kept, settings)?;
    }

    let dir_size = finish_and_measure(settings);

    if settings.stats_enabled {
        let row = stats_file::StatsRow {
            datetime: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            clone_path: settings.output_dir_absolute_path.display().to_string(),
            scm: settings.scm_type.clone(),
            clone_type: settings.clone_type.as_str().to_string(),
            clone_target: settings.target.clone(),
            total_count: kept.len(),
            new_clones_count: stats.clone_count.load(Ordering::Relaxed),
            pulled_count: stats.pulled_count.load(Ordering::Relaxed),
            dir_size_mb: dir_size.unwrap_or(0.0),
            new_commits: stats.new_commits.load(Ordering::Relaxed),
            synced_count: stats.synced_count.load(Ordering::Relaxed),
            clone_infos_count: infos.len(),
            clone_errors_count: errors.len(),
            update_remote_count: stats.update_remote_count.load(Ordering::Relaxed),
            prune_count,
            has_collisions: plan.has_collisions,
            ignore_file_used: filter::ignore_file_in_effect(settings),
            only_file_used: filter::only_file_in_effect(settings),
            total_duration_seconds: duration_seconds,
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        if let Err(err) = stats_file::append_row(&settings.stats_root(), &row) {
            colorlog::print_error(format!("Error writing stats file: {err}"));
        }
    }

    Ok(select_exit_code(infos.len(), errors.len(), settings))
}

/// Exit-code policy: info events exit with the configured info code when
/// one is set, error events with the configured issues code, otherwise 0.
fn select_exit_code(info_count: usize, error_count: usize, settings: &Settings) -> i32 {
    if settings.exit_code_on_clone_infos != 0 && info_count > 0 {
        return settings.exit_code_on_clone_infos;
    }
    if error_count > 0 {
        return settings.exit_code_on_clone_issues;
    }
    0
}

fn print_inventory(repos: &[Repo], settings: &Settings) {
    let snippets = repos.iter().filter(|r| r.is_snippet).count();
    let wikis = repos.iter().filter(|r| r.is_wiki).count();
    let plain = repos.len() - snippets - wikis;

    if settings.clone_wiki && settings.clone_snippets {
        colorlog::print_info(format!(
            "{} resources to clone found in {}, {} repos, {} snippets, and {} wikis\n",
            repos.len(),
            settings.target,
            plain,
            snippets,
            wikis
        ));
    } else if settings.clone_wiki {
        colorlog::print_info(format!(
            "{} resources to clone found in {}, {} repos and {} wikis\n",
            repos.len(),
            settings.target,
            plain,
            wikis
        ));
    } else if settings.clone_snippets {
        colorlog::print_info(format!(
            "{} resources to clone found in {}, {} repos and {} snippets\n",
            repos.len(),
            settings.target,
            plain,
            snippets
        ));
    } else {
        colorlog::print_info(format!(
            "{} repos found in {}\n",
            plain, settings.target
        ));
    }
}

/// Prints the planned work without touching disk. With prune enabled, also
/// previews which local clones would be eligible for removal.
fn print_dry_run(repos: &[Repo], settings: &Settings) -> Result<()> {
    for repo in repos {
        colorlog::print_subtle_info(format!("{}\n", repo.url));
    }
    colorlog::print_success(format!(
        "{} repos to be cloned into: {}",
        repos.len(),
        settings.output_dir_absolute_path.display()
    ));

    if settings.prune && settings.output_dir_absolute_path.is_dir() {
        colorlog::print_info("\nScanning for local clones that have been removed on remote...");
        // Dry-run planning never ran, so compare against the flat names the
        // planner would produce.
        let mut planned = repos.to_vec();
        planner::plan(&mut planned, settings)?;
        let eligible =
            pruner::count_prune_candidates(&planned, &settings.output_dir_absolute_path)?;
        colorlog::print_success(format!("Local clones eligible for pruning: {eligible}"));
    }
    Ok(())
}

fn print_remaining_messages(infos: &[String], errors: &[String]) {
    if !infos.is_empty() {
        colorlog::print_info("\n============ Info ============\n");
        for info in infos {
            colorlog::print_info(info);
        }
    }
    if !errors.is_empty() {
        colorlog::print_error("\n============ Issues ============\n");
        for error in errors {
            colorlog::print_error(error);
        }
    }
}

fn print_summary(stats: &RunStats, untouched_prunes: usize, duration_seconds: u64) {
    let clone_count = stats.clone_count.load(Ordering::Relaxed);
    let pulled = stats.pulled_count.load(Ordering::Relaxed);
    let update_remote = stats.update_remote_count.load(Ordering::Relaxed);
    let new_commits = stats.new_commits.load(Ordering::Relaxed);
    let synced = stats.synced_count.load(Ordering::Relaxed);
    let duration_text = format_duration_text(duration_seconds);

    let mut parts = vec![format!("New clones: {clone_count}")];
    parts.push(format!("existing resources pulled: {pulled}"));
    if new_commits > 0 {
        parts.push(format!("total new commits: {new_commits}"));
    }
    if update_remote > 0 {
        parts.push(format!("remotes updated: {update_remote}"));
    }
    if untouched_prunes > 0 {
        parts.push(format!("total prunes: {untouched_prunes}"));
    }
    if synced > 0 {
        parts.push(format!("default branches synced: {synced}"));
    }
    colorlog::print_success(format!("{}{duration_text}", parts.join(", ")));
}

/// Prints the finish line and measures the tree size once, reusing the
/// value for the stats row.
fn finish_and_measure(settings: &Settings) -> Option<f64> {
    let mut size = None;
    if !settings.no_dir_size {
        size = dir_size_mb(&settings.output_dir_absolute_path).ok();
    }

    if !settings.quiet {
        match size {
            Some(mb) if mb > 1000.0 => colorlog::print_success(format!(
                "\nFinished! {} (Size: {:.2} GB)",
                settings.output_dir_absolute_path.display(),
                mb / 1000.0
            )),
            Some(mb) => colorlog::print_success(format!(
                "\nFinished! {} (Size: {:.2} MB)",
                settings.output_dir_absolute_path.display(),
                mb
            )),
            None => colorlog::print_success(format!(
                "\nFinished! {}",
                settings.output_dir_absolute_path.display()
            )),
        }
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_exit_codes(infos: i32, issues: i32) -> Settings {
        let mut settings = Settings::from_env();
        settings.exit_code_on_clone_infos = infos;
        settings.exit_code_on_clone_issues = issues;
        settings
    }

    #[test]
    fn test_exit_code_zero_on_clean_run() {
        let settings = settings_with_exit_codes(0, 1);
        assert_eq!(select_exit_code(0, 0, &settings), 0);
    }

    #[test]
    fn test_exit_code_infos_only_defaults_to_zero() {
        let settings = settings_with_exit_codes(0, 1);
        assert_eq!(select_exit_code(3, 0, &settings), 0);
    }

    #[test]
    fn test_exit_code_infos_respects_override() {
        let settings = settings_with_exit_codes(7, 1);
        assert_eq!(select_exit_code(3, 0, &settings), 7);
    }

    #[test]
    fn test_exit_code_errors_use_issue_code() {
        let settings = settings_with_exit_codes(0, 5);
        assert_eq!(select_exit_code(2, 1, &settings), 5);
    }
}
