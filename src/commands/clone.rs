//! The `clone` command: flag handling, config echo, and engine invocation.

use anyhow::{bail, Result};
use clap::Args;
use std::time::Instant;

use crate::colorlog;
use crate::config::{CloneProtocol, CloneType, GitBackendKind, Settings};
use crate::engine;
use crate::engine::filter;
use crate::utils::{ensure_trailing_slash, token_from_value};

#[derive(Args, Debug, Default)]
pub struct CloneArgs {
    /// Org or user to clone; `all-groups` / `all-users` on self-hosted GitLab
    pub target: Option<String>,

    /// Absolute path to the home for clones, must start with /
    #[arg(short, long)]
    pub path: Option<String>,
    /// Protocol to clone with, ssh or https
    #[arg(long)]
    pub protocol: Option<String>,
    /// Branch left checked out for each repo cloned
    #[arg(short, long)]
    pub branch: Option<String>,
    /// SCM token (or a path to a file containing it)
    #[arg(short, long)]
    pub token: Option<String>,
    /// Run without a token against servers allowing unauthenticated API access
    #[arg(long)]
    pub no_token: bool,
    /// SCM type: github, gitlab, gitea, bitbucket or sourcehut
    #[arg(short, long)]
    pub scm: Option<String>,
    /// Clone target type, org or user
    #[arg(short, long)]
    pub clone_type: Option<String>,
    /// SCM base url for self-hosted instances
    #[arg(long)]
    pub base_url: Option<String>,
    /// Bitbucket only: username associated with the app password
    #[arg(long)]
    pub bitbucket_username: Option<String>,
    /// GitHub only: affiliation for user clones: owner, member or all
    #[arg(long)]
    pub github_user_option: Option<String>,
    /// GitHub only: filter repos by language, comma separated
    #[arg(long)]
    pub github_filter_language: Option<String>,

    /// Skip archived repos
    #[arg(long)]
    pub skip_archived: bool,
    /// Skip forked repos
    #[arg(long)]
    pub skip_forks: bool,
    /// Comma separated list of topics to filter for
    #[arg(long)]
    pub topics: Option<String>,
    /// Only clone repos with a matching name prefix, comma separated
    #[arg(long)]
    pub match_prefix: Option<String>,
    /// Exclude repos with a matching name prefix, comma separated
    #[arg(long)]
    pub exclude_match_prefix: Option<String>,
    /// Only clone repos whose name matches the regex
    #[arg(long)]
    pub match_regex: Option<String>,
    /// Exclude repos whose name matches the regex
    #[arg(long)]
    pub exclude_match_regex: Option<String>,
    /// GitLab only: exclude groups whose namespace matches the regex
    #[arg(long)]
    pub gitlab_group_exclude_match_regex: Option<String>,
    /// Path to the ignore file (URL substrings to skip)
    #[arg(long)]
    pub ignore_path: Option<String>,
    /// Path to the only file (URL substrings to keep)
    #[arg(long)]
    pub only_path: Option<String>,
    /// Path to a file with one repo name per line to clone
    #[arg(long)]
    pub target_repos_path: Option<String>,

    /// Only clone new repos, do not clean existing ones
    #[arg(long)]
    pub no_clean: bool,
    /// Delete local clones not found on the remote, with prompt
    #[arg(long)]
    pub prune: bool,
    /// Prune without prompting
    #[arg(long)]
    pub prune_no_confirm: bool,
    /// Prune local clones with no divergence from origin
    #[arg(long)]
    pub prune_untouched: bool,
    /// Prune untouched clones without the confirmation prompt
    #[arg(long)]
    pub prune_untouched_no_confirm: bool,
    /// Run git fetch --all on each repo
    #[arg(long)]
    pub fetch_all: bool,
    /// Fetch repos but do not clone them
    #[arg(long)]
    pub dry_run: bool,
    /// Backup mode: clone as mirror, no working copy
    #[arg(long)]
    pub backup: bool,
    /// Include submodules in clone and pull operations
    #[arg(long)]
    pub include_submodules: bool,
    /// Keep the default branch in sync with the remote
    #[arg(long)]
    pub sync_default_branch: bool,
    /// Additionally clone wiki pages
    #[arg(long)]
    pub clone_wiki: bool,
    /// Additionally clone snippets, GitLab only
    #[arg(long)]
    pub clone_snippets: bool,

    /// Skip TLS verification for self-hosted GitLab
    #[arg(long)]
    pub insecure_gitlab_client: bool,
    /// Allow plain http against a Gitea instance
    #[arg(long)]
    pub insecure_gitea_client: bool,
    /// Allow plain http against a Bitbucket Server instance
    #[arg(long)]
    pub insecure_bitbucket_client: bool,
    /// Allow plain http against a Sourcehut instance
    #[arg(long)]
    pub insecure_sourcehut_client: bool,

    /// Clone into a directory structure matching the remote namespaces
    #[arg(long)]
    pub preserve_dir: bool,
    /// Name of the directory repos are cloned into
    #[arg(long)]
    pub output_dir: Option<String>,
    /// Skip calculating the output directory size at the end
    #[arg(long)]
    pub no_dir_size: bool,
    /// Organise clones under a per-hostname directory
    #[arg(long)]
    pub preserve_scm_hostname: bool,

    /// Max concurrent clone operations
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// Delay in seconds between clones; forces concurrency to 1 when > 0
    #[arg(long)]
    pub clone_delay_seconds: Option<u64>,
    /// Create a shallow clone truncated to this many commits
    #[arg(long)]
    pub clone_depth: Option<u32>,
    /// Argument for git's --filter flag, e.g. blob:none
    #[arg(long)]
    pub git_filter: Option<String>,
    /// Git backend: library (in-process) or subprocess (system git)
    #[arg(long)]
    pub git_backend: Option<String>,

    /// Exit code when the run ends with info events
    #[arg(long)]
    pub exit_code_on_clone_infos: Option<i32>,
    /// Exit code when the run ends with error events
    #[arg(long)]
    pub exit_code_on_clone_issues: Option<i32>,

    /// Emit critical output only
    #[arg(long)]
    pub quiet: bool,
    /// Append a row per run to the stats file
    #[arg(long)]
    pub stats_enabled: bool,
    /// Toggle colored output: enabled or disabled
    #[arg(long)]
    pub color: Option<String>,
}

impl CloneArgs {
    fn apply(&self, settings: &mut Settings) -> Result<()> {
        if let Some(path) = &self.path {
            settings.absolute_path_to_clone_to = ensure_trailing_slash(path);
        }
        if let Some(protocol) = &self.protocol {
            settings.protocol = match protocol.as_str() {
                "ssh" => CloneProtocol::Ssh,
                "https" => CloneProtocol::Https,
                other => bail!("unsupported protocol '{other}', expected ssh or https"),
            };
        }
        if let Some(branch) = &self.branch {
            settings.branch = Some(branch.clone());
        }
        if let Some(token) = &self.token {
            settings.token = token_from_value(token);
        }
        if self.no_token {
            settings.no_token = true;
        }
        if let Some(scm) = &self.scm {
            settings.scm_type = scm.to_lowercase();
        }
        if let Some(clone_type) = &self.clone_type {
            settings.clone_type = match clone_type.to_lowercase().as_str() {
                "org" => CloneType::Org,
                "user" => CloneType::User,
                other => bail!("unsupported clone type '{other}', expected org or user"),
            };
        }
        if let Some(base_url) = &self.base_url {
            settings.base_url = Some(base_url.clone());
        }
        if let Some(user) = &self.bitbucket_username {
            settings.bitbucket_username = Some(user.clone());
        }
        if let Some(option) = &self.github_user_option {
            settings.github_user_option = option.clone();
        }
        if let Some(language) = &self.github_filter_language {
            settings.github_filter_language = Some(language.clone());
        }
        if let Some(backend) = &self.git_backend {
            settings.git_backend = match backend.as_str() {
                "library" => GitBackendKind::Library,
                "subprocess" => GitBackendKind::Subprocess,
                other => bail!("unsupported git backend '{other}', expected library or subprocess"),
            };
        }

        if self.skip_archived {
            settings.skip_archived = true;
        }
        if self.skip_forks {
            settings.skip_forks = true;
        }
        if let Some(topics) = &self.topics {
            settings.topics = topics
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = &self.match_prefix {
            settings.match_prefix = Some(v.clone());
        }
        if let Some(v) = &self.exclude_match_prefix {
            settings.exclude_match_prefix = Some(v.clone());
        }
        if let Some(v) = &self.match_regex {
            settings.match_regex = Some(v.clone());
        }
        if let Some(v) = &self.exclude_match_regex {
            settings.exclude_match_regex = Some(v.clone());
        }
        if let Some(v) = &self.gitlab_group_exclude_match_regex {
            settings.gitlab_group_exclude_match_regex = Some(v.clone());
        }
        if let Some(v) = &self.ignore_path {
            settings.ignore_path = Some(v.clone());
        }
        if let Some(v) = &self.only_path {
            settings.only_path = Some(v.clone());
        }
        if let Some(v) = &self.target_repos_path {
            settings.target_repos_path = Some(v.clone());
        }

        if self.no_clean {
            settings.no_clean = true;
        }
        if self.prune {
            settings.prune = true;
        }
        if self.prune_no_confirm {
            settings.prune_no_confirm = true;
        }
        if self.prune_untouched {
            settings.prune_untouched = true;
        }
        if self.prune_untouched_no_confirm {
            settings.prune_untouched_no_confirm = true;
        }
        if self.fetch_all {
            settings.fetch_all = true;
        }
        if self.dry_run {
            settings.dry_run = true;
        }
        if self.backup {
            settings.backup = true;
        }
        if self.include_submodules {
            settings.include_submodules = true;
        }
        if self.sync_default_branch {
            settings.sync_default_branch = true;
        }
        if self.clone_wiki {
            settings.clone_wiki = true;
        }
        if self.clone_snippets {
            settings.clone_snippets = true;
        }
        if self.insecure_gitlab_client {
            settings.insecure_gitlab_client = true;
        }
        if self.insecure_gitea_client {
            settings.insecure_gitea_client = true;
        }
        if self.insecure_bitbucket_client {
            settings.insecure_bitbucket_client = true;
        }
        if self.insecure_sourcehut_client {
            settings.insecure_sourcehut_client = true;
        }
        if self.preserve_dir {
            settings.preserve_dir = true;
        }
        if let Some(v) = &self.output_dir {
            settings.output_dir = Some(v.clone());
        }
        if self.no_dir_size {
            settings.no_dir_size = true;
        }
        if self.preserve_scm_hostname {
            settings.preserve_scm_hostname = true;
        }
        if let Some(v) = self.concurrency {
            settings.concurrency = v;
        }
        if let Some(v) = self.clone_delay_seconds {
            settings.clone_delay_seconds = v;
        }
        if let Some(v) = self.clone_depth {
            settings.clone_depth = Some(v);
        }
        if let Some(v) = &self.git_filter {
            settings.git_filter = Some(v.clone());
        }
        if let Some(v) = self.exit_code_on_clone_infos {
            settings.exit_code_on_clone_infos = v;
        }
        if let Some(v) = self.exit_code_on_clone_issues {
            settings.exit_code_on_clone_issues = v;
        }
        if self.quiet {
            settings.quiet = true;
        }
        if self.stats_enabled {
            settings.stats_enabled = true;
        }
        if let Some(color) = &self.color {
            settings.color_enabled = color == "enabled";
        }
        Ok(())
    }
}

pub async fn run(args: CloneArgs) -> Result<i32> {
    // Captured before any API call so the recorded duration covers the run.
    let start_time = Instant::now();

    let mut settings = Settings::from_env();
    args.apply(&mut settings)?;

    colorlog::set_color_enabled(settings.color_enabled);
    colorlog::set_quiet(settings.quiet);

    let target = match &args.target {
        Some(target) => target.clone(),
        // GitHub user clones may omit the target and mean "myself".
        None if settings.scm_type == "github" && settings.clone_type == CloneType::User => {
            String::new()
        }
        None => bail!("you must provide an org or user to clone"),
    };

    settings.validate()?;
    if settings.preserve_scm_hostname {
        settings.apply_hostname_prefix()?;
    }
    settings.set_output_dir(&target);
    settings.adjust_concurrency_for_delay();

    print_configs(&settings);
    engine::run_clone(settings, start_time).await
}

/// Echoes the active configuration before enumeration begins.
fn print_configs(settings: &Settings) {
    if settings.quiet {
        return;
    }

    colorlog::print_info("*************************************");
    colorlog::print_info(format!("* SCM           : {}", settings.scm_type));
    colorlog::print_info(format!("* Type          : {}", settings.clone_type.as_str()));
    colorlog::print_info(format!("* Protocol      : {}", settings.protocol.as_str()));
    colorlog::print_info(format!(
        "* Location      : {}",
        settings.absolute_path_to_clone_to
    ));
    colorlog::print_info(format!("* Concurrency   : {}", settings.concurrency));
    if settings.clone_delay_seconds > 0 {
        colorlog::print_info(format!(
            "* Clone Delay   : {} seconds",
            settings.clone_delay_seconds
        ));
    }
    if let Some(branch) = &settings.branch {
        colorlog::print_info(format!("* Branch        : {branch}"));
    }
    if let Some(base_url) = &settings.base_url {
        colorlog::print_info(format!("* Base URL      : {base_url}"));
    }
    if settings.skip_archived {
        colorlog::print_info("* Skip Archived : true");
    }
    if settings.skip_forks {
        colorlog::print_info("* Skip Forks    : true");
    }
    if settings.backup {
        colorlog::print_info("* Backup        : true");
    }
    if settings.clone_wiki {
        colorlog::print_info("* Wikis         : true");
    }
    if settings.clone_snippets {
        colorlog::print_info("* Snippets      : true");
    }
    if filter::ignore_file_in_effect(settings) {
        colorlog::print_info(format!(
            "* Ignore File   : {}",
            filter::ignore_location(settings).display()
        ));
    }
    if filter::only_file_in_effect(settings) {
        colorlog::print_info(format!(
            "* Only File     : {}",
            filter::only_location(settings).display()
        ));
    }
    if let Some(path) = &settings.target_repos_path {
        colorlog::print_info(format!("* Target Repos  : {path}"));
    }
    if let Some(regex) = &settings.match_regex {
        colorlog::print_info(format!("* Regex Match   : {regex}"));
    }
    if let Some(regex) = &settings.exclude_match_regex {
        colorlog::print_info(format!("* Exclude Regex : {regex}"));
    }
    if let Some(prefix) = &settings.match_prefix {
        colorlog::print_info(format!("* Prefix Match  : {prefix}"));
    }
    if let Some(prefix) = &settings.exclude_match_prefix {
        colorlog::print_info(format!("* Exclude Prefix: {prefix}"));
    }
    if settings.include_submodules {
        colorlog::print_info("* Submodules    : true");
    }
    if let Some(git_filter) = &settings.git_filter {
        colorlog::print_info(format!("* Git --filter= : {git_filter}"));
    }
    if settings.output_dir.is_some() {
        colorlog::print_info(format!("* Output Dir    : {}", settings.output_dir_name));
    }
    if settings.no_clean {
        colorlog::print_info("* No Clean      : true");
    }
    if settings.prune {
        let suffix = if settings.prune_no_confirm {
            " (skipping confirmation)"
        } else {
            ""
        };
        colorlog::print_info(format!("* Prune         : true{suffix}"));
    }
    if settings.fetch_all {
        colorlog::print_info("* Fetch All     : true");
    }
    if settings.dry_run {
        colorlog::print_info("* Dry Run       : true");
    }
    if settings.preserve_dir {
        colorlog::print_info("* Preserve Dir  : true");
    }
    if let Some(depth) = settings.clone_depth {
        colorlog::print_info(format!("* Clone Depth   : {depth}"));
    }
    colorlog::print_info(format!(
        "* Git Backend   : {}",
        settings.git_backend.as_str()
    ));
    if settings.stats_enabled {
        colorlog::print_info("* Stats Enabled : true");
    }
    colorlog::print_info(format!(
        "* Version       : {}",
        env!("CARGO_PKG_VERSION")
    ));
    colorlog::print_info("*************************************");
}
