//! Local clients for running the submission lifecycle without a network:
//! a content-addressed in-memory blob store and a publish client that
//! confirms (or rejects) every request.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use shared::{
    domain::GrantId,
    error::{ErrorCode, ServiceError},
    protocol::{GrantDraft, GrantMetadata, NewGrant, PublishEvent, PublishRequest},
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{ContentStoreClient, PublishClient, PublishWatch};

const MEMORY_SCHEME: &str = "memory://";

pub fn content_address(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{MEMORY_SCHEME}{}", URL_SAFE_NO_PAD.encode(digest))
}

/// Parses the grant id out of blob names of the form `grant-{id}.json`.
pub fn grant_id_from_blob_name(name: &str) -> Option<GrantId> {
    name.strip_prefix("grant-")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

#[derive(Default)]
struct MemoryInner {
    blobs: HashMap<String, Vec<u8>>,
    names: HashMap<String, String>,
    grants: HashMap<GrantId, GrantMetadata>,
}

pub struct InMemoryContentStore {
    display_name: String,
    inner: Mutex<MemoryInner>,
    initialize_error: Option<String>,
    save_error: Option<String>,
    initialize_calls: AtomicUsize,
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self {
            display_name: "memory store".to_string(),
            inner: Mutex::new(MemoryInner::default()),
            initialize_error: None,
            save_error: None,
            initialize_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_grant(mut self, metadata: GrantMetadata) -> Self {
        self.inner.get_mut().grants.insert(metadata.id, metadata);
        self
    }

    pub fn failing_initialize(mut self, reason: impl Into<String>) -> Self {
        self.initialize_error = Some(reason.into());
        self
    }

    pub fn failing_save(mut self, reason: impl Into<String>) -> Self {
        self.save_error = Some(reason.into());
        self
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub async fn blob(&self, address: &str) -> Option<Vec<u8>> {
        self.inner.lock().await.blobs.get(address).cloned()
    }

    pub async fn address_for_name(&self, name: &str) -> Option<String> {
        self.inner.lock().await.names.get(name).cloned()
    }
}

#[async_trait]
impl ContentStoreClient for InMemoryContentStore {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn initialize(&self) -> Result<()> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.initialize_error {
            return Err(ServiceError::new(ErrorCode::Initialization, reason.clone()).into());
        }
        Ok(())
    }

    async fn fetch_by_id(&self, grant_id: GrantId) -> Result<GrantMetadata> {
        self.inner
            .lock()
            .await
            .grants
            .get(&grant_id)
            .cloned()
            .ok_or_else(|| {
                ServiceError::not_found(format!("no metadata for grant {grant_id}")).into()
            })
    }

    async fn save_named_blob(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
        if let Some(reason) = &self.save_error {
            return Err(ServiceError::unavailable(reason.clone()).into());
        }

        let address = content_address(&bytes);
        let mut inner = self.inner.lock().await;
        if let Some(grant_id) = grant_id_from_blob_name(name) {
            let draft: GrantDraft = serde_json::from_slice(&bytes)
                .with_context(|| format!("blob {name} is not grant metadata"))?;
            inner
                .grants
                .insert(grant_id, GrantMetadata::new(grant_id, draft));
        }
        inner.names.insert(name.to_string(), address.clone());
        inner.blobs.insert(address.clone(), bytes);
        debug!(name, %address, "stored blob in memory");
        Ok(address)
    }
}

/// Publish client that confirms every request immediately, assigning fresh
/// grant ids to requests that do not carry one.
pub struct SimulatedPublishClient {
    next_grant_id: AtomicU64,
    fail_with: Option<String>,
    requests: Mutex<Vec<PublishRequest>>,
}

impl Default for SimulatedPublishClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPublishClient {
    pub fn new() -> Self {
        Self::starting_at(GrantId(1))
    }

    pub fn starting_at(first_grant_id: GrantId) -> Self {
        Self {
            next_grant_id: AtomicU64::new(first_grant_id.0),
            fail_with: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
            ..Self::new()
        }
    }

    pub async fn requests(&self) -> Vec<PublishRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl PublishClient for SimulatedPublishClient {
    async fn publish(&self, request: PublishRequest) -> Result<PublishWatch> {
        self.requests.lock().await.push(request.clone());

        let outcome = match &self.fail_with {
            Some(reason) => PublishEvent::Failed(reason.clone()),
            None => {
                let id = request.grant_id.unwrap_or_else(|| {
                    GrantId(self.next_grant_id.fetch_add(1, Ordering::SeqCst))
                });
                PublishEvent::Complete(NewGrant {
                    id,
                    meta_data: request.metadata_address,
                })
            }
        };

        Ok(futures::stream::iter([PublishEvent::Initiated, outcome]).boxed())
    }
}
