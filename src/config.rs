//! Run configuration.
//!
//! Every knob the engine recognises lives on [`Settings`]. Values resolve in
//! the order: command-line flag, `GITFLEET_*` environment variable, built-in
//! default. The struct is materialised once per run and handed down by
//! reference; nothing below the command layer reads the environment.

use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;

use crate::utils::{ensure_trailing_slash, token_from_value};

pub const DEFAULT_CONCURRENCY: usize = 25;
pub const DEFAULT_EXIT_CODE_ON_CLONE_ISSUES: i32 = 1;

/// What kind of target the run enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneType {
    Org,
    User,
}

impl CloneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloneType::Org => "org",
            CloneType::User => "user",
        }
    }
}

/// Which URL the network operations use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneProtocol {
    Https,
    Ssh,
}

impl CloneProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloneProtocol::Https => "https",
            CloneProtocol::Ssh => "ssh",
        }
    }
}

/// Which Git implementation performs the work. Selected once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitBackendKind {
    Library,
    Subprocess,
}

impl GitBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitBackendKind::Library => "library",
            GitBackendKind::Subprocess => "subprocess",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    // SCM selection
    pub scm_type: String,
    pub clone_type: CloneType,
    pub base_url: Option<String>,
    pub token: String,
    pub no_token: bool,
    pub bitbucket_username: Option<String>,
    pub github_user_option: String,
    pub github_filter_language: Option<String>,
    pub insecure_gitlab_client: bool,
    pub insecure_gitea_client: bool,
    pub insecure_bitbucket_client: bool,
    pub insecure_sourcehut_client: bool,

    // Transport
    pub protocol: CloneProtocol,
    pub clone_depth: Option<u32>,
    pub git_filter: Option<String>,
    pub include_submodules: bool,
    pub git_backend: GitBackendKind,

    // Behaviour
    pub branch: Option<String>,
    pub sync_default_branch: bool,
    pub clone_wiki: bool,
    pub clone_snippets: bool,
    pub backup: bool,
    pub no_clean: bool,
    pub fetch_all: bool,
    pub dry_run: bool,
    pub prune: bool,
    pub prune_no_confirm: bool,
    pub prune_untouched: bool,
    pub prune_untouched_no_confirm: bool,

    // Selection
    pub match_prefix: Option<String>,
    pub exclude_match_prefix: Option<String>,
    pub match_regex: Option<String>,
    pub exclude_match_regex: Option<String>,
    pub gitlab_group_exclude_match_regex: Option<String>,
    pub skip_archived: bool,
    pub skip_forks: bool,
    pub topics: Vec<String>,
    pub ignore_path: Option<String>,
    pub only_path: Option<String>,
    pub target_repos_path: Option<String>,

    // Layout
    pub absolute_path_to_clone_to: String,
    /// The clone root before the hostname prefix was applied. Stats always
    /// land under this path so history survives layout changes.
    pub original_path_to_clone_to: Option<String>,
    pub output_dir: Option<String>,
    pub preserve_dir: bool,
    pub preserve_scm_hostname: bool,

    // Operations
    pub concurrency: usize,
    pub clone_delay_seconds: u64,
    pub concurrency_auto_adjusted: bool,
    pub quiet: bool,
    pub no_dir_size: bool,
    pub stats_enabled: bool,
    pub color_enabled: bool,

    // Exit policy
    pub exit_code_on_clone_infos: i32,
    pub exit_code_on_clone_issues: i32,

    // Filled in by the clone command once the target argument is known.
    pub target: String,
    pub output_dir_name: String,
    pub output_dir_absolute_path: PathBuf,
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str) -> bool {
    env::var(key).map(|v| v == "true").unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

impl Settings {
    /// Builds settings from `GITFLEET_*` environment variables and defaults.
    /// Flag overrides are applied afterwards by the command layer, then
    /// [`Settings::validate`] runs before any Git work begins.
    pub fn from_env() -> Self {
        let clone_type = match env_string("GITFLEET_CLONE_TYPE").as_deref() {
            Some("user") => CloneType::User,
            _ => CloneType::Org,
        };
        let protocol = match env_string("GITFLEET_CLONE_PROTOCOL").as_deref() {
            Some("ssh") => CloneProtocol::Ssh,
            _ => CloneProtocol::Https,
        };
        let git_backend = match env_string("GITFLEET_GIT_BACKEND").as_deref() {
            Some("subprocess") => GitBackendKind::Subprocess,
            _ => GitBackendKind::Library,
        };

        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let default_clone_path = format!("{home}/gitfleet/");

        Settings {
            scm_type: env_string("GITFLEET_SCM_TYPE").unwrap_or_else(|| "github".to_string()),
            clone_type,
            base_url: env_string("GITFLEET_SCM_BASE_URL"),
            token: env_string("GITFLEET_TOKEN")
                .map(|t| token_from_value(&t))
                .unwrap_or_default(),
            no_token: env_bool("GITFLEET_NO_TOKEN"),
            bitbucket_username: env_string("GITFLEET_BITBUCKET_USERNAME"),
            github_user_option: env_string("GITFLEET_GITHUB_USER_OPTION")
                .unwrap_or_else(|| "owner".to_string()),
            github_filter_language: env_string("GITFLEET_GITHUB_FILTER_LANGUAGE"),
            insecure_gitlab_client: env_bool("GITFLEET_INSECURE_GITLAB_CLIENT"),
            insecure_gitea_client: env_bool("GITFLEET_INSECURE_GITEA_CLIENT"),
            insecure_bitbucket_client: env_bool("GITFLEET_INSECURE_BITBUCKET_CLIENT"),
            insecure_sourcehut_client: env_bool("GITFLEET_INSECURE_SOURCEHUT_CLIENT"),
            protocol,
            clone_depth: env_parse("GITFLEET_CLONE_DEPTH"),
            git_filter: env_string("GITFLEET_GIT_FILTER"),
            include_submodules: env_bool("GITFLEET_INCLUDE_SUBMODULES"),
            git_backend,
            branch: env_string("GITFLEET_BRANCH"),
            sync_default_branch: env_bool("GITFLEET_SYNC_DEFAULT_BRANCH"),
            clone_wiki: env_bool("GITFLEET_CLONE_WIKI"),
            clone_snippets: env_bool("GITFLEET_CLONE_SNIPPETS"),
            backup: env_bool("GITFLEET_BACKUP"),
            no_clean: env_bool("GITFLEET_NO_CLEAN"),
            fetch_all: env_bool("GITFLEET_FETCH_ALL"),
            dry_run: env_bool("GITFLEET_DRY_RUN"),
            prune: env_bool("GITFLEET_PRUNE"),
            prune_no_confirm: env_bool("GITFLEET_PRUNE_NO_CONFIRM"),
            prune_untouched: env_bool("GITFLEET_PRUNE_UNTOUCHED"),
            prune_untouched_no_confirm: env_bool("GITFLEET_PRUNE_UNTOUCHED_NO_CONFIRM"),
            match_prefix: env_string("GITFLEET_MATCH_PREFIX"),
            exclude_match_prefix: env_string("GITFLEET_EXCLUDE_MATCH_PREFIX"),
            match_regex: env_string("GITFLEET_MATCH_REGEX"),
            exclude_match_regex: env_string("GITFLEET_EXCLUDE_MATCH_REGEX"),
            gitlab_group_exclude_match_regex: env_string("GITFLEET_GITLAB_GROUP_EXCLUDE_MATCH_REGEX"),
            skip_archived: env_bool("GITFLEET_SKIP_ARCHIVED"),
            skip_forks: env_bool("GITFLEET_SKIP_FORKS"),
            topics: env_string("GITFLEET_TOPICS")
                .map(|t| {
                    t.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            ignore_path: env_string("GITFLEET_IGNORE_PATH"),
            only_path: env_string("GITFLEET_ONLY_PATH"),
            target_repos_path: env_string("GITFLEET_TARGET_REPOS_PATH"),
            absolute_path_to_clone_to: env_string("GITFLEET_ABSOLUTE_PATH_TO_CLONE_TO")
                .map(|p| ensure_trailing_slash(&p))
                .unwrap_or(default_clone_path),
            original_path_to_clone_to: None,
            output_dir: env_string("GITFLEET_OUTPUT_DIR"),
            preserve_dir: env_bool("GITFLEET_PRESERVE_DIRECTORY_STRUCTURE"),
            preserve_scm_hostname: env_bool("GITFLEET_PRESERVE_SCM_HOSTNAME"),
            concurrency: env_parse("GITFLEET_CONCURRENCY").unwrap_or(DEFAULT_CONCURRENCY),
            clone_delay_seconds: env_parse("GITFLEET_CLONE_DELAY_SECONDS").unwrap_or(0),
            concurrency_auto_adjusted: false,
            quiet: env_bool("GITFLEET_QUIET"),
            no_dir_size: env_bool("GITFLEET_NO_DIR_SIZE"),
            stats_enabled: env_bool("GITFLEET_STATS_ENABLED"),
            color_enabled: env_string("GITFLEET_COLOR").as_deref() == Some("enabled"),
            exit_code_on_clone_infos: env_parse("GITFLEET_EXIT_CODE_ON_CLONE_INFOS").unwrap_or(0),
            exit_code_on_clone_issues: env_parse("GITFLEET_EXIT_CODE_ON_CLONE_ISSUES")
                .unwrap_or(DEFAULT_EXIT_CODE_ON_CLONE_ISSUES),
            target: String::new(),
            output_dir_name: String::new(),
            output_dir_absolute_path: PathBuf::new(),
        }
    }

    /// Forces serial dispatch when a per-clone delay is configured. The
    /// adjustment is silent here; the engine announces it once at run start.
    pub fn adjust_concurrency_for_delay(&mut self) {
        if self.clone_delay_seconds > 0 && self.concurrency > 1 {
            self.concurrency = 1;
            self.concurrency_auto_adjusted = true;
        }
    }

    /// Rejects contradictory or unusable configuration before any Git work.
    pub fn validate(&self) -> Result<()> {
        const SCM_TYPES: &[&str] = &["github", "gitlab", "gitea", "bitbucket", "sourcehut"];
        if !SCM_TYPES.contains(&self.scm_type.as_str()) {
            bail!(
                "unsupported scm type '{}', expected one of {}",
                self.scm_type,
                SCM_TYPES.join(", ")
            );
        }
        if !self.absolute_path_to_clone_to.starts_with('/') {
            bail!(
                "clone path must be absolute, got '{}'",
                self.absolute_path_to_clone_to
            );
        }
        if self.concurrency == 0 {
            bail!("concurrency must be a positive integer");
        }
        if let Some(depth) = self.clone_depth {
            if depth == 0 {
                bail!("clone depth must be a positive integer");
            }
        }
        if self.token.is_empty() && !self.no_token {
            bail!(
                "no token set for {}; supply one with --token or run with --no-token \
                 against a server that allows unauthenticated API access",
                self.scm_type
            );
        }
        Ok(())
    }

    /// Prefixes the clone root with the SCM hostname, keeping the original
    /// root around for the stats file.
    pub fn apply_hostname_prefix(&mut self) -> Result<()> {
        let hostname = match &self.base_url {
            Some(base) => {
                let url = reqwest::Url::parse(base)
                    .with_context(|| format!("could not parse base url '{base}'"))?;
                url.host_str()
                    .map(|h| h.to_string())
                    .context("base url has no hostname")?
            }
            None => self.default_hostname().to_string(),
        };
        self.original_path_to_clone_to = Some(self.absolute_path_to_clone_to.clone());
        self.absolute_path_to_clone_to =
            ensure_trailing_slash(&format!("{}{}", self.absolute_path_to_clone_to, hostname));
        Ok(())
    }

    fn default_hostname(&self) -> &'static str {
        match self.scm_type.as_str() {
            "gitlab" => "gitlab.com",
            "gitea" => "gitea.com",
            "bitbucket" => "bitbucket.org",
            "sourcehut" => "git.sr.ht",
            _ => "github.com",
        }
    }

    /// Resolves the directory the run clones into, from the target argument
    /// and the output-dir override.
    pub fn set_output_dir(&mut self, target: &str) {
        self.target = target.to_string();

        let mut name = match &self.output_dir {
            Some(dir) => dir.clone(),
            None => {
                let mut n = target.to_lowercase();
                // Sourcehut usernames carry a ~ sigil that is unfriendly to shells.
                if self.scm_type == "sourcehut" {
                    n = n.trim_start_matches('~').to_string();
                }
                if !self.preserve_scm_hostname
                    && (target == "all-groups" || target == "all-users")
                {
                    if let Some(base) = &self.base_url {
                        if let Ok(url) = reqwest::Url::parse(base) {
                            if let Some(host) = url.host_str() {
                                n = host.to_string();
                            }
                        }
                    }
                }
                n
            }
        };

        if self.backup && self.output_dir.is_none() {
            name.push_str("_backup");
        }

        self.output_dir_name = name;
        self.output_dir_absolute_path =
            PathBuf::from(&self.absolute_path_to_clone_to).join(&self.output_dir_name);
    }

    /// The directory the stats file lives in. Stable across hostname-prefix
    /// layout changes.
    pub fn stats_root(&self) -> PathBuf {
        match &self.original_path_to_clone_to {
            Some(original) => PathBuf::from(original),
            None => PathBuf::from(&self.absolute_path_to_clone_to),
        }
    }
}
