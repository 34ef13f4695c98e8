//! Bitbucket Cloud provider.
//!
//! The 2.0 API paginates with a `next` URL in the response body, so pages
//! are followed serially; the workspace listing covers both org and user
//! targets.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::{clone_branch_for, http_client, select_clone_url, Repo};
use crate::config::Settings;

#[derive(Debug, Deserialize)]
struct BitbucketPage {
    values: Vec<BitbucketRepo>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BitbucketRepo {
    slug: String,
    full_name: String,
    mainbranch: Option<BitbucketBranch>,
    links: BitbucketLinks,
    parent: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BitbucketBranch {
    name: String,
}

#[derive(Debug, Deserialize)]
struct BitbucketLinks {
    clone: Vec<BitbucketCloneLink>,
}

#[derive(Debug, Deserialize)]
struct BitbucketCloneLink {
    name: String,
    href: String,
}

pub struct BitbucketClient {
    client: reqwest::Client,
    api_base: String,
    username: Option<String>,
    token: String,
    settings_snapshot: Settings,
}

impl BitbucketClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let api_base = settings
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.bitbucket.org/2.0".to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(BitbucketClient {
            client: http_client(settings.insecure_bitbucket_client)?,
            api_base,
            username: settings.bitbucket_username.clone(),
            token: settings.token.clone(),
            settings_snapshot: settings.clone(),
        })
    }

    pub async fn get_workspace_repos(&self, workspace: &str) -> Result<Vec<Repo>> {
        let mut url = format!("{}/repositories/{workspace}?pagelen=100", self.api_base);
        let mut raw = Vec::new();

        loop {
            let mut request = self.client.get(&url);
            if !self.token.is_empty() {
                match &self.username {
                    // App password auth needs the account username.
                    Some(user) => request = request.basic_auth(user, Some(&self.token)),
                    None => request = request.bearer_auth(&self.token),
                }
            }
            let response = request
                .send()
                .await
                .with_context(|| format!("Bitbucket API request failed: {url}"))?;
            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                bail!("Bitbucket API authentication failed ({status}) for {url}");
            }
            if !status.is_success() {
                bail!("Bitbucket API returned {status} for {url}");
            }
            let page: BitbucketPage = response
                .json()
                .await
                .with_context(|| format!("could not decode Bitbucket response from {url}"))?;
            raw.extend(page.values);
            match page.next {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(self.normalize(raw))
    }

    fn normalize(&self, raw: Vec<BitbucketRepo>) -> Vec<Repo> {
        let settings = &self.settings_snapshot;
        let userinfo = (!settings.token.is_empty()).then(|| match &self.username {
            Some(user) => format!("{user}:{}", settings.token),
            None => format!("x-token-auth:{}", settings.token),
        });

        raw.into_iter()
            .filter_map(|repo| {
                let https = repo
                    .links
                    .clone
                    .iter()
                    .find(|l| l.name == "https")
                    .map(|l| l.href.clone())?;
                let ssh = repo
                    .links
                    .clone
                    .iter()
                    .find(|l| l.name == "ssh")
                    .map(|l| l.href.clone())
                    .unwrap_or_default();
                let default_branch = repo
                    .mainbranch
                    .as_ref()
                    .map(|b| b.name.as_str())
                    .unwrap_or("");
                let (url, clone_url) =
                    select_clone_url(settings, &https, &ssh, userinfo.clone());
                Some(Repo {
                    name: repo.slug,
                    path: repo.full_name,
                    clone_branch: clone_branch_for(settings, default_branch),
                    fork: repo.parent.is_some(),
                    url,
                    clone_url,
                    ..Default::default()
                })
            })
            .collect()
    }
}
