//! Gitea provider.
//!
//! The Gitea REST API mirrors GitHub's shape closely enough that pagination
//! works the same way: `Link` header for the last page, concurrent fetch of
//! the remaining pages, page-ordered reassembly.

use anyhow::{bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{
    clone_branch_for, http_client, last_page_from_link_header, select_clone_url, Repo,
};
use crate::config::Settings;

const PER_PAGE: u32 = 50;

#[derive(Debug, Deserialize)]
struct GiteaRepo {
    name: String,
    full_name: String,
    clone_url: String,
    ssh_url: String,
    default_branch: Option<String>,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    fork: bool,
    has_wiki: Option<bool>,
}

pub struct GiteaClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
    settings_snapshot: Settings,
}

impl GiteaClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let base = match &settings.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => bail!("gitea requires --base-url pointing at your instance"),
        };
        let api_base = if base.ends_with("/api/v1") {
            base
        } else {
            format!("{base}/api/v1")
        };
        Ok(GiteaClient {
            client: http_client(settings.insecure_gitea_client)?,
            api_base,
            token: settings.token.clone(),
            settings_snapshot: settings.clone(),
        })
    }

    pub async fn get_org_repos(&self, org: &str) -> Result<Vec<Repo>> {
        let path = format!("/orgs/{org}/repos?limit={PER_PAGE}");
        let repos = self.fetch_all_pages(&path).await?;
        Ok(self.normalize(repos))
    }

    pub async fn get_user_repos(&self, user: &str) -> Result<Vec<Repo>> {
        let path = format!("/users/{user}/repos?limit={PER_PAGE}");
        let repos = self.fetch_all_pages(&path).await?;
        Ok(self.normalize(repos))
    }

    async fn fetch_page(&self, path: &str, page: u32) -> Result<(Vec<GiteaRepo>, Option<u32>)> {
        let sep = if path.contains('?') { '&' } else { '?' };
        let url = format!("{}{}{}page={}", self.api_base, path, sep, page);
        let mut request = self.client.get(&url);
        if !self.token.is_empty() {
            request = request.header("Authorization", format!("token {}", self.token));
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Gitea API request failed: {url}"))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            bail!("Gitea API authentication failed ({status}) for {url}");
        }
        if !status.is_success() {
            bail!("Gitea API returned {status} for {url}");
        }
        let last_page = response
            .headers()
            .get("link")
            .and_then(|v| v.to_str().ok())
            .and_then(last_page_from_link_header);
        let repos: Vec<GiteaRepo> = response
            .json()
            .await
            .with_context(|| format!("could not decode Gitea response from {url}"))?;
        Ok((repos, last_page))
    }

    async fn fetch_all_pages(&self, path: &str) -> Result<Vec<GiteaRepo>> {
        let (first, last_page) = self.fetch_page(path, 1).await?;
        let mut all = first;

        if let Some(last) = last_page {
            let mut pending: FuturesUnordered<_> = (2..=last)
                .map(|page| async move { (page, self.fetch_page(path, page).await) })
                .collect();
            let mut by_page: BTreeMap<u32, Vec<GiteaRepo>> = BTreeMap::new();
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

    fn normalize(&self, raw: Vec<GiteaRepo>) -> Vec<Repo> {
        let settings = &self.settings_snapshot;
        let userinfo = (!settings.token.is_empty()).then(|| settings.token.clone());
        let mut out = Vec::with_capacity(raw.len());

        for repo in raw {
            let default_branch = repo.default_branch.as_deref().unwrap_or("");
            let (url, clone_url) =
                select_clone_url(settings, &repo.clone_url, &repo.ssh_url, userinfo.clone());

            if settings.clone_wiki && repo.has_wiki.unwrap_or(false) {
                let wiki_https =
                    format!("{}.wiki.git", repo.clone_url.trim_end_matches(".git"));
                let wiki_ssh = format!("{}.wiki.git", repo.ssh_url.trim_end_matches(".git"));
                let (wiki_url, wiki_clone_url) =
                    select_clone_url(settings, &wiki_https, &wiki_ssh, userinfo.clone());
                out.push(Repo {
                    name: format!("{}.wiki", repo.name),
                    path: format!("{}.wiki", repo.full_name),
                    url: wiki_url,
                    clone_url: wiki_clone_url,
                    is_wiki: true,
                    archived: repo.archived,
                    fork: repo.fork,
                    ..Default::default()
                });
            }

            out.push(Repo {
                name: repo.name,
                path: repo.full_name,
                clone_branch: clone_branch_for(settings, default_branch),
                archived: repo.archived,
                fork: repo.fork,
                url,
                clone_url,
                ..Default::default()
            });
        }

        out
    }
}
