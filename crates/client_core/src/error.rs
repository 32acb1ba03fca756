use shared::{domain::GrantId, error::ErrorCode};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("content store failed to initialize: {0}")]
    Initialization(String),
    #[error("submission is not available: {0}")]
    NotReady(&'static str),
    #[error("failed to fetch grant {grant_id}: {reason}")]
    Fetch { grant_id: GrantId, reason: String },
    #[error("failed to save grant metadata: {0}")]
    Save(String),
    #[error("failed to publish grant: {0}")]
    Publish(String),
    #[error("failed to serialize grant draft: {0}")]
    Serialize(String),
}

impl SubmissionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Initialization(_) => ErrorCode::Initialization,
            Self::NotReady(_) | Self::Serialize(_) => ErrorCode::Validation,
            Self::Fetch { .. } => ErrorCode::NotFound,
            Self::Save(_) => ErrorCode::Unavailable,
            Self::Publish(_) => ErrorCode::Rejected,
        }
    }

    /// Only an initialization failure blocks the session; it requires a reload.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Initialization(_))
    }
}

impl From<serde_json::Error> for SubmissionError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialize(value.to_string())
    }
}
