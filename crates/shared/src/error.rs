use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Initialization,
    NotFound,
    Unavailable,
    Validation,
    Rejected,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::NotFound => "not_found",
            Self::Unavailable => "unavailable",
            Self::Validation => "validation",
            Self::Rejected => "rejected",
            Self::Internal => "internal",
        }
    }
}

/// Failure reported by a content store or publish client.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{}: {message}", code.as_str())]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }
}

/// Best-effort classification of an arbitrary error chain.
pub fn classify(err: &(dyn std::error::Error + 'static)) -> ErrorCode {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(service) = e.downcast_ref::<ServiceError>() {
            return service.code;
        }
        current = e.source();
    }
    ErrorCode::Internal
}
