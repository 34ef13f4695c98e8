//! GitLab provider.
//!
//! Supports single groups (with subgroups), users, and the federated
//! `all-groups` / `all-users` roots on self-hosted instances. Pagination
//! follows the `x-total-pages` header: page 1 serially, pages 2..N
//! concurrently, reassembled in page order. Wikis and snippets ride along as
//! additional cloneable resources when enabled.

use anyhow::{bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{clone_branch_for, http_client, select_clone_url, Repo};
use crate::config::Settings;

const PER_PAGE: u32 = 100;

#[derive(Debug, Deserialize)]
struct GitlabProject {
    id: u64,
    path: String,
    path_with_namespace: String,
    http_url_to_repo: String,
    ssh_url_to_repo: String,
    default_branch: Option<String>,
    #[serde(default)]
    archived: bool,
    forked_from_project: Option<serde_json::Value>,
    #[serde(default)]
    topics: Vec<String>,
    wiki_enabled: Option<bool>,
    web_url: String,
}

#[derive(Debug, Deserialize)]
struct GitlabGroup {
    id: u64,
    full_path: String,
}

#[derive(Debug, Deserialize)]
struct GitlabUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct GitlabSnippet {
    id: u64,
    title: String,
}

pub struct GitlabClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
    group_exclude: Option<Regex>,
    settings_snapshot: Settings,
}

impl GitlabClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let host = settings
            .base_url
            .clone()
            .unwrap_or_else(|| "https://gitlab.com".to_string())
            .trim_end_matches('/')
            .to_string();
        let api_base = format!("{host}/api/v4");
        let group_exclude = settings
            .gitlab_group_exclude_match_regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("invalid gitlab group exclude regex")?;
        Ok(GitlabClient {
            client: http_client(settings.insecure_gitlab_client)?,
            api_base,
            token: settings.token.clone(),
            group_exclude,
            settings_snapshot: settings.clone(),
        })
    }

    pub async fn get_group_repos(&self, target: &str) -> Result<Vec<Repo>> {
        let mut repos = if target == "all-groups" {
            let groups = self.list_top_level_groups().await?;
            let mut all = Vec::new();
            for group in groups {
                let path = format!(
                    "/groups/{}/projects?include_subgroups=true&per_page={PER_PAGE}",
                    group.id
                );
                all.extend(self.fetch_projects(&path).await?);
            }
            all
        } else {
            let encoded = target.replace('/', "%2F");
            let path =
                format!("/groups/{encoded}/projects?include_subgroups=true&per_page={PER_PAGE}");
            self.fetch_projects(&path).await?
        };

        if let Some(exclude) = &self.group_exclude {
            repos.retain(|p| {
                let namespace = p
                    .path_with_namespace
                    .rsplit_once('/')
                    .map(|(ns, _)| ns)
                    .unwrap_or("");
                !exclude.is_match(namespace)
            });
        }

        self.normalize(repos).await
    }

    pub async fn get_user_repos(&self, target: &str) -> Result<Vec<Repo>> {
        let projects = if target == "all-users" {
            let users = self.list_users().await?;
            let mut all = Vec::new();
            for user in users {
                let path = format!("/users/{}/projects?per_page={PER_PAGE}", user.username);
                all.extend(self.fetch_projects(&path).await?);
            }
            all
        } else {
            let path = format!("/users/{target}/projects?per_page={PER_PAGE}");
            self.fetch_projects(&path).await?
        };
        self.normalize(projects).await
    }

    async fn get_json(&self, url: &str) -> Result<(reqwest::header::HeaderMap, String)> {
        let mut request = self.client.get(url);
        if !self.token.is_empty() {
            request = request.header("PRIVATE-TOKEN", &self.token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("GitLab API request failed: {url}"))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            bail!("GitLab API authentication failed ({status}) for {url}");
        }
        if !status.is_success() {
            bail!("GitLab API returned {status} for {url}");
        }
        let headers = response.headers().clone();
        let body = response.text().await?;
        Ok((headers, body))
    }

    fn total_pages(headers: &reqwest::header::HeaderMap) -> u32 {
        headers
            .get("x-total-pages")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
    }

    /// Fetches every page of a paginated endpoint: page 1 serially for the
    /// page count, the rest concurrently, results emitted in page order.
    async fn fetch_paged<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let first_url = format!("{}{}&page=1", self.api_base, path);
        let (headers, body) = self.get_json(&first_url).await?;
        let mut all: Vec<T> = serde_json::from_str(&body)
            .with_context(|| format!("could not decode GitLab response from {first_url}"))?;

        let total_pages = Self::total_pages(&headers);
        if total_pages > 1 {
            let mut pending: FuturesUnordered<_> = (2..=total_pages)
                .map(|page| {
                    let url = format!("{}{}&page={}", self.api_base, path, page);
                    async move { (page, self.get_json(&url).await) }
                })
                .collect();

            let mut by_page: BTreeMap<u32, Vec<T>> = BTreeMap::new();
            while let Some((page, result)) = pending.next().await {
                let (_, body) = result?;
                let items: Vec<T> = serde_json::from_str(&body)
                    .with_context(|| format!("could not decode GitLab page {page}"))?;
                by_page.insert(page, items);
            }
            for (_, items) in by_page {
                all.extend(items);
            }
        }

        Ok(all)
    }

    async fn fetch_projects(&self, path: &str) -> Result<Vec<GitlabProject>> {
        self.fetch_paged(path).await
    }

    async fn list_top_level_groups(&self) -> Result<Vec<GitlabGroup>> {
        let path = format!("/groups?top_level_only=true&all_available=true&per_page={PER_PAGE}");
        let mut groups: Vec<GitlabGroup> = self.fetch_paged(&path).await?;
        if let Some(exclude) = &self.group_exclude {
            groups.retain(|g| !exclude.is_match(&g.full_path));
        }
        Ok(groups)
    }

    async fn list_users(&self) -> Result<Vec<GitlabUser>> {
        let path = format!("/users?active=true&per_page={PER_PAGE}");
        self.fetch_paged(&path).await
    }

    async fn normalize(&self, projects: Vec<GitlabProject>) -> Result<Vec<Repo>> {
        let settings = &self.settings_snapshot;
        let userinfo =
            (!settings.token.is_empty()).then(|| format!("oauth2:{}", settings.token));
        let mut out = Vec::with_capacity(projects.len());

        for project in &projects {
            let default_branch = project.default_branch.as_deref().unwrap_or("");
            let (url, clone_url) = select_clone_url(
                settings,
                &project.http_url_to_repo,
                &project.ssh_url_to_repo,
                userinfo.clone(),
            );

            out.push(Repo {
                name: project.path.clone(),
                path: project.path_with_namespace.clone(),
                clone_branch: clone_branch_for(settings, default_branch),
                archived: project.archived,
                fork: project.forked_from_project.is_some(),
                topics: project.topics.clone(),
                url,
                clone_url,
                ..Default::default()
            });

            if settings.clone_wiki && project.wiki_enabled.unwrap_or(false) {
                let wiki_https = format!(
                    "{}.wiki.git",
                    project.http_url_to_repo.trim_end_matches(".git")
                );
                let wiki_ssh = format!(
                    "{}.wiki.git",
                    project.ssh_url_to_repo.trim_end_matches(".git")
                );
                let (wiki_url, wiki_clone_url) =
                    select_clone_url(settings, &wiki_https, &wiki_ssh, userinfo.clone());
                out.push(Repo {
                    name: format!("{}.wiki", project.path),
                    path: format!("{}.wiki", project.path_with_namespace),
                    url: wiki_url,
                    clone_url: wiki_clone_url,
                    is_wiki: true,
                    archived: project.archived,
                    fork: project.forked_from_project.is_some(),
                    ..Default::default()
                });
            }

            if settings.clone_snippets {
                out.extend(self.project_snippets(project, userinfo.as_deref()).await?);
            }
        }

        if settings.clone_snippets {
            out.extend(self.root_level_snippets(userinfo.as_deref()).await?);
        }

        Ok(out)
    }

    async fn project_snippets(
        &self,
        project: &GitlabProject,
        userinfo: Option<&str>,
    ) -> Result<Vec<Repo>> {
        let path = format!("/projects/{}/snippets?per_page={PER_PAGE}", project.id);
        let snippets: Vec<GitlabSnippet> = self.fetch_paged(&path).await.unwrap_or_default();
        let settings = &self.settings_snapshot;

        Ok(snippets
            .into_iter()
            .map(|snippet| {
                let https = format!("{}/snippets/{}.git", project.web_url, snippet.id);
                let clone_url = match userinfo {
                    Some(info) => super::with_credentials(&https, info),
                    None => https.clone(),
                };
                Repo {
                    name: snippet.title,
                    path: format!("{}/snippets/{}", project.path_with_namespace, snippet.id),
                    url: https,
                    clone_url,
                    is_snippet: true,
                    snippet_id: Some(snippet.id.to_string()),
                    snippet_url_of_repo: Some(project.http_url_to_repo.clone()),
                    clone_branch: clone_branch_for(settings, ""),
                    ..Default::default()
                }
            })
            .collect())
    }

    async fn root_level_snippets(&self, userinfo: Option<&str>) -> Result<Vec<Repo>> {
        let path = format!("/snippets?per_page={PER_PAGE}");
        let snippets: Vec<GitlabSnippet> = self.fetch_paged(&path).await.unwrap_or_default();
        let host = self
            .api_base
            .trim_end_matches("/api/v4")
            .to_string();
        let settings = &self.settings_snapshot;

        Ok(snippets
            .into_iter()
            .map(|snippet| {
                let https = format!("{host}/-/snippets/{}.git", snippet.id);
                let clone_url = match userinfo {
                    Some(info) => super::with_credentials(&https, info),
                    None => https.clone(),
                };
                Repo {
                    name: snippet.title,
                    path: format!("snippets/{}", snippet.id),
                    url: https,
                    clone_url,
                    is_snippet: true,
                    is_root_level_snippet: true,
                    snippet_id: Some(snippet.id.to_string()),
                    clone_branch: clone_branch_for(settings, ""),
                    ..Default::default()
                }
            })
            .collect())
    }
}
