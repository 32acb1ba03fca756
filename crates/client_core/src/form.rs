//! Form input aggregation and the submission gate.

use std::str::FromStr;

use shared::{
    domain::ReceivedFunding,
    protocol::{GrantDraft, GrantMetadata},
};
use thiserror::Error;

/// Number of non-empty text fields required before submitting.
pub const REQUIRED_TEXT_FIELDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("unknown form field {0:?}")]
    UnknownField(String),
    #[error("invalid funding answer: {0}")]
    InvalidFunding(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormField {
    Title,
    Description,
    Website,
    Chain,
    Wallet,
    ReceivedFunding,
}

impl FormField {
    pub const ALL: [FormField; 6] = [
        FormField::Title,
        FormField::Description,
        FormField::Website,
        FormField::Chain,
        FormField::Wallet,
        FormField::ReceivedFunding,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::Website => "website",
            Self::Chain => "chain",
            Self::Wallet => "wallet",
            Self::ReceivedFunding => "receivedFunding",
        }
    }
}

impl FromStr for FormField {
    type Err = FormError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.name() == s)
            .ok_or_else(|| FormError::UnknownField(s.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantForm {
    draft: GrantDraft,
    enabled: bool,
}

impl GrantForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self) -> &GrantDraft {
        &self.draft
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn on_field_change(
        &mut self,
        name: &str,
        value: impl Into<String>,
        store_initialized: bool,
    ) -> Result<(), FormError> {
        let field = name.parse::<FormField>()?;
        self.set_field(field, value, store_initialized)
    }

    pub fn set_field(
        &mut self,
        field: FormField,
        value: impl Into<String>,
        store_initialized: bool,
    ) -> Result<(), FormError> {
        let value = value.into();
        match field {
            FormField::Title => self.draft.title = value,
            FormField::Description => self.draft.description = value,
            FormField::Website => self.draft.website = value,
            FormField::Chain => self.draft.chain = value,
            FormField::Wallet => self.draft.wallet = value,
            FormField::ReceivedFunding => {
                self.draft.received_funding = value
                    .parse::<ReceivedFunding>()
                    .map_err(FormError::InvalidFunding)?;
            }
        }
        self.refresh(store_initialized);
        Ok(())
    }

    /// Replaces the whole draft with fetched values. Local edits are lost.
    pub fn apply_metadata(&mut self, metadata: &GrantMetadata, store_initialized: bool) {
        self.draft = metadata.draft.clone();
        self.refresh(store_initialized);
    }

    pub fn refresh(&mut self, store_initialized: bool) {
        self.enabled =
            self.draft.filled_text_fields() >= REQUIRED_TEXT_FIELDS && store_initialized;
    }
}

#[cfg(test)]
#[path = "tests/form_tests.rs"]
mod tests;
