//! Sourcehut provider.
//!
//! Uses the legacy REST listing, which paginates with a `next` cursor. Org
//! and user targets resolve to the same repository listing.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::{clone_branch_for, select_clone_url, Repo};
use crate::config::Settings;

#[derive(Debug, Deserialize)]
struct SourcehutPage {
    results: Vec<SourcehutRepo>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SourcehutRepo {
    name: String,
    owner: SourcehutOwner,
}

#[derive(Debug, Deserialize)]
struct SourcehutOwner {
    canonical_name: String,
}

pub struct SourcehutClient {
    client: reqwest::Client,
    host: String,
    token: String,
    settings_snapshot: Settings,
}

impl SourcehutClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let host = settings
            .base_url
            .clone()
            .unwrap_or_else(|| "https://git.sr.ht".to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(SourcehutClient {
            client: super::http_client(settings.insecure_sourcehut_client)?,
            host,
            token: settings.token.clone(),
            settings_snapshot: settings.clone(),
        })
    }

    pub async fn get_repos(&self, target: &str) -> Result<Vec<Repo>> {
        // Usernames are addressed with a ~ sigil.
        let owner = if target.starts_with('~') {
            target.to_string()
        } else {
            format!("~{target}")
        };

        let mut url = format!("{}/api/{owner}/repos", self.host);
        let mut raw = Vec::new();
        loop {
            let mut request = self.client.get(&url);
            if !self.token.is_empty() {
                request = request.header("Authorization", format!("token {}", self.token));
            }
            let response = request
                .send()
                .await
                .with_context(|| format!("Sourcehut API request failed: {url}"))?;
            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                bail!("Sourcehut API authentication failed ({status}) for {url}");
            }
            if !status.is_success() {
                bail!("Sourcehut API returned {status} for {url}");
            }
            let page: SourcehutPage = response
                .json()
                .await
                .with_context(|| format!("could not decode Sourcehut response from {url}"))?;
            raw.extend(page.results);
            match page.next {
                Some(next) if !next.is_empty() => {
                    url = format!("{}/api/{owner}/repos?start={next}", self.host);
                }
                _ => break,
            }
        }

        Ok(self.normalize(raw))
    }

    fn normalize(&self, raw: Vec<SourcehutRepo>) -> Vec<Repo> {
        let settings = &self.settings_snapshot;
        let userinfo = (!settings.token.is_empty()).then(|| settings.token.clone());

        raw.into_iter()
            .map(|repo| {
                let https = format!(
                    "{}/{}/{}",
                    self.host, repo.owner.canonical_name, repo.name
                );
                let host_only = self.host.trim_start_matches("https://");
                let ssh = format!(
                    "git@{host_only}:{}/{}",
                    repo.owner.canonical_name, repo.name
                );
                let (url, clone_url) = select_clone_url(settings, &https, &ssh, userinfo.clone());
                let owner = repo.owner.canonical_name.trim_start_matches('~');
                Repo {
                    path: format!("{owner}/{}", repo.name),
                    name: repo.name,
                    clone_branch: clone_branch_for(settings, ""),
                    url,
                    clone_url,
                    ..Default::default()
                }
            })
            .collect()
    }
}
