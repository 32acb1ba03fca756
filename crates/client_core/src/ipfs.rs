//! Content store client for an IPFS node's HTTP RPC API (`/api/v0`).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;
use shared::{
    domain::GrantId,
    error::{ErrorCode, ServiceError},
    protocol::{GrantDraft, GrantMetadata},
};
use tracing::{debug, info};
use url::Url;

use crate::ContentStoreClient;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct IpfsHttpConfig {
    pub api_url: Url,
    pub gateway_url: Url,
    /// Directory CID (or `/ipns/...` path) that holds `{grant_id}.json` files.
    pub grants_root: Option<String>,
    pub display_name: String,
    pub timeout: Duration,
}

impl IpfsHttpConfig {
    pub fn new(api_url: &str, gateway_url: &str) -> Result<Self> {
        Ok(Self {
            api_url: Url::parse(api_url).with_context(|| format!("invalid IPFS API url {api_url}"))?,
            gateway_url: Url::parse(gateway_url)
                .with_context(|| format!("invalid IPFS gateway url {gateway_url}"))?,
            grants_root: None,
            display_name: "IPFS".to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_grants_root(mut self, grants_root: impl Into<String>) -> Self {
        self.grants_root = Some(grants_root.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

pub struct IpfsHttpContentStore {
    http: Client,
    config: IpfsHttpConfig,
}

impl IpfsHttpContentStore {
    pub fn new(config: IpfsHttpConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build IPFS HTTP client")?;
        Ok(Self { http, config })
    }

    fn endpoint(&self, command: &str) -> Result<Url> {
        let base = self.config.api_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/api/v0/{command}"))
            .with_context(|| format!("invalid IPFS endpoint for {command}"))
    }

    pub fn gateway_address(&self, cid: &str) -> String {
        let gateway = self.config.gateway_url.as_str().trim_end_matches('/');
        format!("{gateway}/ipfs/{cid}")
    }

    fn grant_path(&self, grant_id: GrantId) -> Result<String> {
        let root = self.config.grants_root.as_deref().ok_or_else(|| {
            ServiceError::new(
                ErrorCode::Validation,
                "no grants root configured for the IPFS content store",
            )
        })?;
        Ok(format!("{}/{grant_id}.json", root.trim_end_matches('/')))
    }
}

fn status_error(status: StatusCode, command: &str, body: &str) -> anyhow::Error {
    let code = match status {
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        s if s.is_server_error() => ErrorCode::Unavailable,
        _ => ErrorCode::Rejected,
    };
    let detail = body.trim();
    anyhow!(ServiceError::new(
        code,
        format!("IPFS {command} returned {status}: {detail}")
    ))
}

#[async_trait]
impl ContentStoreClient for IpfsHttpContentStore {
    fn display_name(&self) -> &str {
        &self.config.display_name
    }

    async fn initialize(&self) -> Result<()> {
        let res = self
            .http
            .post(self.endpoint("id")?)
            .send()
            .await
            .map_err(|err| {
                ServiceError::new(
                    ErrorCode::Initialization,
                    format!("IPFS node unreachable: {err}"),
                )
            })?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(status_error(status, "id", &body));
        }
        let node: IdResponse = res.json().await.context("malformed IPFS id response")?;
        info!(peer_id = %node.id, "connected to IPFS node");
        Ok(())
    }

    async fn fetch_by_id(&self, grant_id: GrantId) -> Result<GrantMetadata> {
        let path = self.grant_path(grant_id)?;
        let res = self
            .http
            .post(self.endpoint("cat")?)
            .query(&[("arg", path.as_str())])
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(status_error(status, "cat", &body));
        }
        let bytes = res.bytes().await?;
        let draft: GrantDraft = serde_json::from_slice(&bytes)
            .with_context(|| format!("{path} does not contain grant metadata"))?;
        debug!(%grant_id, %path, "fetched grant metadata from IPFS");
        Ok(GrantMetadata::new(grant_id, draft))
    }

    async fn save_named_blob(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
        let part = multipart::Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str("application/json")?;
        let form = multipart::Form::new().part("file", part);
        let res = self
            .http
            .post(self.endpoint("add")?)
            .query(&[("pin", "true")])
            .multipart(form)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(status_error(status, "add", &body));
        }
        let added: AddResponse = res.json().await.context("malformed IPFS add response")?;
        let address = self.gateway_address(&added.hash);
        info!(name, cid = %added.hash, "saved blob to IPFS");
        Ok(address)
    }
}

#[cfg(test)]
#[path = "tests/ipfs_tests.rs"]
mod tests;
