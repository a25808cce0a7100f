//! GitHub contents API and raw content host.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::config::HarvesterConfig;
use crate::model::{RemoteFile, RepoRef};
use crate::traits::{ContentFetcher, DirectoryLister, FetchError, ListingError};

/// Lists repository roots through the contents API and fetches files from
/// the raw content host.
#[derive(Debug, Clone)]
pub struct GitHubSource {
    client: Client,
    api_base_url: String,
    raw_base_url: String,
    branch: String,
}

impl GitHubSource {
    pub fn new(config: &HarvesterConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            raw_base_url: config.raw_base_url.trim_end_matches('/').to_string(),
            branch: config.branch.clone(),
        })
    }

    fn contents_url(&self, repo: &RepoRef) -> String {
        format!(
            "{}/repos/{}/{}/contents",
            self.api_base_url, repo.owner, repo.name
        )
    }

    fn raw_url(&self, repo: &RepoRef, file: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.raw_base_url, repo.owner, repo.name, self.branch, file
        )
    }
}

#[async_trait]
impl DirectoryLister for GitHubSource {
    async fn list(&self, repo: &RepoRef) -> Result<Vec<RemoteFile>, ListingError> {
        let url = self.contents_url(repo);
        debug!(url = %url, "Listing repository contents");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| ListingError::Transport(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(ListingError::Status(response.status().as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ListingError::Transport(e.to_string()))?;
        parse_listing(&body)
    }
}

/// Decodes a contents listing. Only a body that is not a JSON array fails;
/// entries that do not decode as [`RemoteFile`] are dropped.
fn parse_listing(body: &[u8]) -> Result<Vec<RemoteFile>, ListingError> {
    let entries: Vec<Value> =
        serde_json::from_slice(body).map_err(|e| ListingError::InvalidBody(e.to_string()))?;

    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<RemoteFile>(entry) {
            Ok(file) => Some(file),
            Err(e) => {
                debug!(error = %e, "Dropping malformed listing entry");
                None
            }
        })
        .collect())
}

#[async_trait]
impl ContentFetcher for GitHubSource {
    async fn fetch(&self, repo: &RepoRef, file: &str) -> Result<Bytes, FetchError> {
        let url = self.raw_url(repo, file);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        // Read the whole body before handing anything downstream.
        response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))
    }
}
