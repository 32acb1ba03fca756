use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use shared::{
    domain::GrantId,
    protocol::{GrantMetadata, PublishEvent, PublishRequest},
};

pub mod error;
pub mod form;
pub mod ipfs;
pub mod memory;
mod orchestrator;
pub mod store;
pub mod view;

pub use error::SubmissionError;
pub use form::{FormField, GrantForm};
pub use ipfs::{IpfsHttpConfig, IpfsHttpContentStore};
pub use memory::{InMemoryContentStore, SimulatedPublishClient};
pub use orchestrator::{SubmissionEvent, SubmissionOrchestrator};
pub use store::{reduce, Action, SubmissionState};
pub use view::{StatusLine, SubmissionView};

/// Stream of status updates for one publish transaction.
pub type PublishWatch = BoxStream<'static, PublishEvent>;

/// Content-addressed store that grant metadata is saved to and read from.
#[async_trait]
pub trait ContentStoreClient: Send + Sync {
    /// Name shown to the user, e.g. "IPFS".
    fn display_name(&self) -> &str;
    async fn initialize(&self) -> Result<()>;
    async fn fetch_by_id(&self, grant_id: GrantId) -> Result<GrantMetadata>;
    /// Persists `bytes` under `name` and returns the content address.
    async fn save_named_blob(&self, name: &str, bytes: Vec<u8>) -> Result<String>;
}

/// Submits the on-chain reference to saved grant metadata.
#[async_trait]
pub trait PublishClient: Send + Sync {
    async fn publish(&self, request: PublishRequest) -> Result<PublishWatch>;
}

pub struct MissingContentStore;

#[async_trait]
impl ContentStoreClient for MissingContentStore {
    fn display_name(&self) -> &str {
        "content store"
    }

    async fn initialize(&self) -> Result<()> {
        Err(anyhow!("content store client is unavailable"))
    }

    async fn fetch_by_id(&self, grant_id: GrantId) -> Result<GrantMetadata> {
        Err(anyhow!(
            "content store client is unavailable for grant {grant_id}"
        ))
    }

    async fn save_named_blob(&self, name: &str, _bytes: Vec<u8>) -> Result<String> {
        Err(anyhow!("content store client is unavailable to save {name}"))
    }
}

pub struct MissingPublishClient;

#[async_trait]
impl PublishClient for MissingPublishClient {
    async fn publish(&self, _request: PublishRequest) -> Result<PublishWatch> {
        Err(anyhow!("publish client is unavailable"))
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
