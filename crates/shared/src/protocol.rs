use serde::{Deserialize, Serialize};

use crate::domain::{GrantId, ReceivedFunding};

/// Grant fields as entered in the submission form. This is also the JSON body
/// saved to the content store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantDraft {
    pub title: String,
    pub description: String,
    pub website: String,
    pub chain: String,
    pub wallet: String,
    #[serde(default)]
    pub received_funding: ReceivedFunding,
}

impl GrantDraft {
    pub fn text_fields(&self) -> [&str; 5] {
        [
            &self.title,
            &self.description,
            &self.website,
            &self.chain,
            &self.wallet,
        ]
    }

    pub fn filled_text_fields(&self) -> usize {
        self.text_fields()
            .iter()
            .filter(|value| !value.is_empty())
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.filled_text_fields() == self.text_fields().len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantMetadata {
    pub id: GrantId,
    #[serde(flatten)]
    pub draft: GrantDraft,
}

impl GrantMetadata {
    pub fn new(id: GrantId, draft: GrantDraft) -> Self {
        Self { id, draft }
    }
}

/// A grant whose publish transaction completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGrant {
    pub id: GrantId,
    #[serde(rename = "metaData")]
    pub meta_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<GrantId>,
    pub metadata_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PublishEvent {
    Initiated,
    Complete(NewGrant),
    Failed(String),
}
