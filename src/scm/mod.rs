//! Repository enumeration across source-code hosts.
//!
//! Each provider normalises its API payloads into the common [`Repo`]
//! record. Ordering within a single enumeration is stable: page 1 is fetched
//! serially to learn the page count, later pages are fetched concurrently
//! and reassembled in page order.

pub mod bitbucket;
pub mod gitea;
pub mod github;
pub mod gitlab;
pub mod sourcehut;

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{CloneProtocol, Settings};

/// One cloneable resource: a repository, a wiki, or a snippet.
///
/// Produced by a provider, possibly discarded by the filter, annotated with
/// its destination by the path planner, and consumed exactly once by a
/// worker.
#[derive(Debug, Clone, Default)]
pub struct Repo {
    /// Short slug, unique within its enclosing namespace.
    pub name: String,
    /// Namespace-qualified logical path, forward-slash delimited. After
    /// planning this holds the path relative to the clone root, which is
    /// what the pruner compares against.
    pub path: String,
    /// Canonical clone URL without embedded credentials.
    pub url: String,
    /// URL used for network operations; may embed a token.
    pub clone_url: String,
    /// Branch checked out after clone and targeted by pulls. Empty means
    /// "whatever the remote declares as default".
    pub clone_branch: String,
    /// Absolute local destination. Set by the path planner.
    pub host_path: PathBuf,
    pub is_wiki: bool,
    pub is_snippet: bool,
    pub is_root_level_snippet: bool,
    /// For a project snippet, the clone URL of the repository it belongs to.
    pub snippet_url_of_repo: Option<String>,
    /// Snippet id, used to keep snippet directories unique.
    pub snippet_id: Option<String>,
    // Provider-reported attributes consumed by the filter.
    pub archived: bool,
    pub fork: bool,
    pub topics: Vec<String>,
    pub language: Option<String>,
}

/// Provider client, selected once from configuration.
pub enum ScmClient {
    Github(github::GithubClient),
    Gitlab(gitlab::GitlabClient),
    Gitea(gitea::GiteaClient),
    Bitbucket(bitbucket::BitbucketClient),
    Sourcehut(sourcehut::SourcehutClient),
}

impl ScmClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        match settings.scm_type.as_str() {
            "github" => Ok(ScmClient::Github(github::GithubClient::new(settings)?)),
            "gitlab" => Ok(ScmClient::Gitlab(gitlab::GitlabClient::new(settings)?)),
            "gitea" => Ok(ScmClient::Gitea(gitea::GiteaClient::new(settings)?)),
            "bitbucket" => Ok(ScmClient::Bitbucket(bitbucket::BitbucketClient::new(
                settings,
            )?)),
            "sourcehut" => Ok(ScmClient::Sourcehut(sourcehut::SourcehutClient::new(
                settings,
            )?)),
            other => bail!("unsupported scm type '{other}'"),
        }
    }

    pub async fn get_org_repos(&self, target: &str) -> Result<Vec<Repo>> {
        match self {
            ScmClient::Github(c) => c.get_org_repos(target).await,
            ScmClient::Gitlab(c) => c.get_group_repos(target).await,
            ScmClient::Gitea(c) => c.get_org_repos(target).await,
            ScmClient::Bitbucket(c) => c.get_workspace_repos(target).await,
            ScmClient::Sourcehut(c) => c.get_repos(target).await,
        }
    }

    pub async fn get_user_repos(&self, target: &str) -> Result<Vec<Repo>> {
        match self {
            ScmClient::Github(c) => c.get_user_repos(target).await,
            ScmClient::Gitlab(c) => c.get_user_repos(target).await,
            ScmClient::Gitea(c) => c.get_user_repos(target).await,
            ScmClient::Bitbucket(c) => c.get_workspace_repos(target).await,
            ScmClient::Sourcehut(c) => c.get_repos(target).await,
        }
    }
}

/// Builds the HTTP client shared by a provider, honouring the insecure-TLS
/// toggle for self-hosted instances.
pub(crate) fn http_client(insecure: bool) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("gitfleet/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(60))
        .danger_accept_invalid_certs(insecure)
        .build()?;
    Ok(client)
}

/// Embeds credentials into an HTTPS clone URL. The credential-free URL stays
/// on [`Repo::url`]; only the network operations see this form.
pub(crate) fn with_credentials(https_url: &str, userinfo: &str) -> String {
    match https_url.strip_prefix("https://") {
        Some(rest) => format!("https://{userinfo}@{rest}"),
        None => https_url.to_string(),
    }
}

/// Picks the clone URL for the configured protocol and embeds the token for
/// HTTPS when one is present.
pub(crate) fn select_clone_url(
    settings: &Settings,
    https_url: &str,
    ssh_url: &str,
    userinfo: Option<String>,
) -> (String, String) {
    match settings.protocol {
        CloneProtocol::Ssh if !ssh_url.is_empty() => (ssh_url.to_string(), ssh_url.to_string()),
        _ => {
            let clone_url = match userinfo {
                Some(info) if !settings.token.is_empty() => with_credentials(https_url, &info),
                _ => https_url.to_string(),
            };
            (https_url.to_string(), clone_url)
        }
    }
}

/// The branch a fresh clone should leave checked out: the configured branch
/// when one is set, otherwise the remote-declared default.
pub(crate) fn clone_branch_for(settings: &Settings, remote_default: &str) -> String {
    match &settings.branch {
        Some(branch) => branch.clone(),
        None => remote_default.to_string(),
    }
}

/// Parses the `page=N` value out of an RFC 5988 `Link` header's `rel="last"`
/// entry. GitHub and Gitea style pagination.
pub(crate) fn last_page_from_link_header(link: &str) -> Option<u32> {
    for part in link.split(',') {
        let part = part.trim();
        if !part.contains("rel=\"last\"") {
            continue;
        }
        let url = part.split(';').next()?.trim();
        let url = url.strip_prefix('<')?.strip_suffix('>')?;
        let parsed = reqwest::Url::parse(url).ok()?;
        for (key, value) in parsed.query_pairs() {
            if key == "page" {
                return value.parse().ok();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_credentials_inserts_userinfo() {
        assert_eq!(
            with_credentials("https://github.com/o/r.git", "token123"),
            "https://token123@github.com/o/r.git"
        );
    }

    #[test]
    fn test_with_credentials_leaves_ssh_alone() {
        assert_eq!(
            with_credentials("git@github.com:o/r.git", "token123"),
            "git@github.com:o/r.git"
        );
    }

    #[test]
    fn test_last_page_from_link_header() {
        let link = "<https://api.github.com/orgs/o/repos?per_page=100&page=2>; rel=\"next\", \
                    <https://api.github.com/orgs/o/repos?per_page=100&page=7>; rel=\"last\"";
        assert_eq!(last_page_from_link_header(link), Some(7));
    }

    #[test]
    fn test_last_page_missing_rel_last() {
        let link = "<https://api.github.com/orgs/o/repos?page=2>; rel=\"next\"";
        assert_eq!(last_page_from_link_header(link), None);
    }
}
