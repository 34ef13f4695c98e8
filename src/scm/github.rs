//! GitHub provider.
//!
//! Enumerates org or user repositories over the REST v3 API. Page 1 is
//! fetched serially to learn the last page from the `Link` header, pages
//! 2..N are fetched concurrently and reassembled in page order so the
//! produced set is stable within a run.

use anyhow::{bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{
    clone_branch_for, http_client, last_page_from_link_header, select_clone_url, Repo,
};
use crate::config::Settings;

const PER_PAGE: u32 = 100;

#[derive(Debug, Deserialize)]
struct GithubRepo {
    name: String,
    full_name: String,
    clone_url: String,
    ssh_url: String,
    default_branch: Option<String>,
    archived: bool,
    fork: bool,
    has_wiki: Option<bool>,
    language: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
}

pub struct GithubClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
    user_option: String,
    filter_languages: Vec<String>,
    settings_snapshot: Settings,
}

impl GithubClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let api_base = settings
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.github.com".to_string())
            .trim_end_matches('/')
            .to_string();
        let filter_languages = settings
            .github_filter_language
            .as_deref()
            .map(|l| l.split(',').map(|s| s.trim().to_lowercase()).collect())
            .unwrap_or_default();
        Ok(GithubClient {
            client: http_client(false)?,
            api_base,
            token: settings.token.clone(),
            user_option: settings.github_user_option.clone(),
            filter_languages,
            settings_snapshot: settings.clone(),
        })
    }

    pub async fn get_org_repos(&self, org: &str) -> Result<Vec<Repo>> {
        let path = format!("/orgs/{org}/repos?type=all&per_page={PER_PAGE}");
        let repos = self.fetch_all_pages(&path).await?;
        Ok(self.normalize(repos))
    }

    pub async fn get_user_repos(&self, user: &str) -> Result<Vec<Repo>> {
        // An empty target means "the authenticated user", which is the only
        // way to see private repositories across affiliations.
        let path = if user.is_empty() {
            format!(
                "/user/repos?per_page={PER_PAGE}&affiliation={}",
                match self.user_option.as_str() {
                    "all" => "owner,collaborator,organization_member",
                    "member" => "organization_member",
                    _ => "owner",
                }
            )
        } else {
            format!("/users/{user}/repos?per_page={PER_PAGE}")
        };
        let repos = self.fetch_all_pages(&path).await?;
        Ok(self.normalize(repos))
    }

    async fn fetch_page(&self, path: &str, page: u32) -> Result<(Vec<GithubRepo>, Option<u32>)> {
        let sep = if path.contains('?') { '&' } else { '?' };
        let url = format!("{}{}{}page={}", self.api_base, path, sep, page);
        let mut request = self.client.get(&url).header("Accept", "application/vnd.github+json");
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("GitHub API request failed: {url}"))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            bail!("GitHub API authentication failed ({status}) for {url}");
        }
        if !status.is_success() {
            bail!("GitHub API returned {status} for {url}");
        }

        let last_page = response
            .headers()
            .get("link")
            .and_then(|v| v.to_str().ok())
            .and_then(last_page_from_link_header);
        let repos: Vec<GithubRepo> = response
            .json()
            .await
            .with_context(|| format!("could not decode GitHub response from {url}"))?;
        Ok((repos, last_page))
    }

    async fn fetch_all_pages(&self, path: &str) -> Result<Vec<GithubRepo>> {
        let (first, last_page) = self.fetch_page(path, 1).await?;
        let mut all = first;

        if let Some(last) = last_page {
            let mut pending: FuturesUnordered<_> = (2..=last)
                .map(|page| async move { (page, self.fetch_page(path, page).await) })
                .collect();

            let mut by_page: BTreeMap<u32, Vec<GithubRepo>> = BTreeMap::new();
            while let Some((page, result)) = pending.next().await {
                let (repos, _) = result?;
                by_page.insert(page, repos);
            }
            for (_, repos) in by_page {
                all.extend(repos);
            }
        }

        Ok(all)
    }

    fn normalize(&self, raw: Vec<GithubRepo>) -> Vec<Repo> {
        let settings = &self.settings_snapshot;
        let mut out = Vec::with_capacity(raw.len());

        for gh in raw {
            if !self.filter_languages.is_empty() {
                let lang = gh.language.as_deref().unwrap_or("").to_lowercase();
                if !self.filter_languages.contains(&lang) {
                    continue;
                }
            }

            let userinfo = (!settings.token.is_empty()).then(|| settings.token.clone());
            let (url, clone_url) =
                select_clone_url(settings, &gh.clone_url, &gh.ssh_url, userinfo.clone());
            let default_branch = gh.default_branch.as_deref().unwrap_or("");
            let has_wiki = gh.has_wiki.unwrap_or(false);

            let repo = Repo {
                name: gh.name.clone(),
                path: gh.full_name.clone(),
                clone_branch: clone_branch_for(settings, default_branch),
                archived: gh.archived,
                fork: gh.fork,
                topics: gh.topics.clone(),
                language: gh.language.clone(),
                url,
                clone_url,
                ..Default::default()
            };

            if settings.clone_wiki && has_wiki {
                let wiki_https = format!(
                    "{}.wiki.git",
                    gh.clone_url.trim_end_matches(".git")
                );
                let wiki_ssh = format!("{}.wiki.git", gh.ssh_url.trim_end_matches(".git"));
                let (wiki_url, wiki_clone_url) =
                    select_clone_url(settings, &wiki_https, &wiki_ssh, userinfo);
                out.push(Repo {
                    name: format!("{}.wiki", gh.name),
                    path: format!("{}.wiki", gh.full_name),
                    url: wiki_url,
                    clone_url: wiki_clone_url,
                    clone_branch: String::new(),
                    is_wiki: true,
                    archived: gh.archived,
                    fork: gh.fork,
                    ..Default::default()
                });
            }

            out.push(repo);
        }

        out
    }
}
