//! Submission state store: a pure reducer over a closed set of actions.
//!
//! The store holds three slices:
//!
//! * per-grant metadata fetched from the content store, with loading flags,
//! * content store readiness and file-save progress,
//! * the current publish transaction status and the grants created so far.
//!
//! All I/O lives in the orchestrator; nothing here has side effects.

use std::collections::HashMap;

use shared::{
    domain::{GrantId, TxStatus},
    protocol::{GrantMetadata, NewGrant},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataEntry {
    pub loading: bool,
    pub metadata: Option<GrantMetadata>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentStoreStatus {
    pub initialized: bool,
    pub initialization_error: Option<String>,
    pub saving_file: bool,
    pub last_saved_address: Option<String>,
    pub save_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionState {
    pub status: TxStatus,
    /// Append-only.
    pub grants: Vec<NewGrant>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionState {
    pub grants_metadata: HashMap<GrantId, MetadataEntry>,
    pub content_store: ContentStoreStatus,
    pub transaction: TransactionState,
}

impl SubmissionState {
    pub fn metadata(&self, grant_id: GrantId) -> Option<&MetadataEntry> {
        self.grants_metadata.get(&grant_id)
    }

    /// Initialized and not failed.
    pub fn is_ready(&self) -> bool {
        self.content_store.initialized && self.content_store.initialization_error.is_none()
    }

    pub fn apply(&mut self, action: Action) {
        let state = std::mem::take(self);
        *self = reduce(state, action);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    RequestInit,
    InitSucceeded,
    InitFailed(String),
    RequestFetchMetadata(GrantId),
    MetadataFetched(GrantId, GrantMetadata),
    MetadataFetchFailed(GrantId, String),
    RequestSaveFile { name: String, content: String },
    FileSaved(String),
    SaveFileFailed(String),
    TxStatusChanged(TxStatus),
    PublishFailed(String),
    GrantCreated(NewGrant),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestInit => "request_init",
            Self::InitSucceeded => "init_succeeded",
            Self::InitFailed(_) => "init_failed",
            Self::RequestFetchMetadata(_) => "request_fetch_metadata",
            Self::MetadataFetched(..) => "metadata_fetched",
            Self::MetadataFetchFailed(..) => "metadata_fetch_failed",
            Self::RequestSaveFile { .. } => "request_save_file",
            Self::FileSaved(_) => "file_saved",
            Self::SaveFileFailed(_) => "save_file_failed",
            Self::TxStatusChanged(_) => "tx_status_changed",
            Self::PublishFailed(_) => "publish_failed",
            Self::GrantCreated(_) => "grant_created",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::InitFailed(_)
                | Self::MetadataFetchFailed(..)
                | Self::SaveFileFailed(_)
                | Self::PublishFailed(_)
        )
    }
}

pub fn reduce(mut state: SubmissionState, action: Action) -> SubmissionState {
    match action {
        Action::RequestInit => {
            // initialized only ever goes false -> true here
        }
        Action::InitSucceeded => {
            state.content_store.initialized = true;
            state.content_store.initialization_error = None;
        }
        Action::InitFailed(error) => {
            state.content_store.initialized = false;
            state.content_store.initialization_error = Some(error);
        }
        Action::RequestFetchMetadata(grant_id) => {
            let entry = state
                .grants_metadata
                .entry(grant_id)
                .or_insert_with(|| MetadataEntry {
                    loading: true,
                    ..MetadataEntry::default()
                });
            // a retry after a failed fetch goes back to loading
            if entry.error.take().is_some() {
                entry.loading = true;
            }
        }
        Action::MetadataFetched(grant_id, metadata) => {
            state.grants_metadata.insert(
                grant_id,
                MetadataEntry {
                    loading: false,
                    metadata: Some(metadata),
                    error: None,
                },
            );
        }
        Action::MetadataFetchFailed(grant_id, error) => {
            let entry = state.grants_metadata.entry(grant_id).or_default();
            entry.loading = false;
            entry.error = Some(error);
        }
        Action::RequestSaveFile { .. } => {
            state.content_store.saving_file = true;
            state.content_store.last_saved_address = None;
            state.content_store.save_error = None;
            state.transaction.last_error = None;
        }
        Action::FileSaved(address) => {
            state.content_store.saving_file = false;
            state.content_store.last_saved_address = Some(address);
        }
        Action::SaveFileFailed(error) => {
            state.content_store.saving_file = false;
            state.content_store.save_error = Some(error);
        }
        Action::TxStatusChanged(status) => {
            state.transaction.status = status;
        }
        Action::PublishFailed(error) => {
            state.transaction.status = TxStatus::Failed;
            state.transaction.last_error = Some(error);
        }
        Action::GrantCreated(grant) => {
            state.transaction.grants.push(grant);
        }
    }
    state
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
