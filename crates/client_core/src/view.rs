//! User-facing status derived from the submission state.

use std::fmt;

use shared::domain::{GrantId, TxStatus};

use crate::store::SubmissionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    /// Terminal: the user must reload.
    InitializationError,
    Initializing,
    LoadingGrant,
    Form,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLine {
    FetchFailed(String),
    Saving,
    Saved { address: String },
    SaveFailed(String),
    Transaction(TxStatus),
    PublishFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionView {
    pub store_name: String,
    pub screen: Screen,
    pub lines: Vec<StatusLine>,
}

impl SubmissionView {
    pub fn from_state(
        state: &SubmissionState,
        grant_id: Option<GrantId>,
        store_name: impl Into<String>,
    ) -> Self {
        let store_name = store_name.into();
        let status = &state.content_store;
        let entry = grant_id.and_then(|id| state.metadata(id));

        let screen = if status.initialization_error.is_some() {
            Screen::InitializationError
        } else if !status.initialized {
            Screen::Initializing
        } else if entry.is_some_and(|entry| entry.loading && entry.metadata.is_none()) {
            Screen::LoadingGrant
        } else {
            Screen::Form
        };

        let mut lines = Vec::new();
        if screen == Screen::Form {
            if let Some(error) = entry.and_then(|entry| entry.error.clone()) {
                lines.push(StatusLine::FetchFailed(error));
            }
            match (status.saving_file, &status.last_saved_address) {
                (true, None) => lines.push(StatusLine::Saving),
                (false, Some(address)) => {
                    lines.push(StatusLine::Saved {
                        address: address.clone(),
                    });
                    let tx = &state.transaction;
                    match (tx.status, &tx.last_error) {
                        (TxStatus::None, _) => {}
                        (TxStatus::Failed, Some(error)) => {
                            lines.push(StatusLine::PublishFailed(error.clone()))
                        }
                        (status, _) => lines.push(StatusLine::Transaction(status)),
                    }
                }
                _ => {}
            }
            if let Some(error) = &status.save_error {
                lines.push(StatusLine::SaveFailed(error.clone()));
            }
        }

        Self {
            store_name,
            screen,
            lines,
        }
    }

    /// True while the form must not be shown or used.
    pub fn is_blocked(&self) -> bool {
        self.screen != Screen::Form
    }

    pub fn render(&self) -> Vec<String> {
        let store = &self.store_name;
        let headline = match self.screen {
            Screen::InitializationError => Some(format!(
                "Error initializing {store}. Reload the page and try again."
            )),
            Screen::Initializing => Some(format!("Initializing {store}...")),
            Screen::LoadingGrant => Some(format!("Loading grant data from {store}...")),
            Screen::Form => None,
        };

        headline
            .into_iter()
            .chain(self.lines.iter().map(|line| render_line(line, store)))
            .collect()
    }
}

fn render_line(line: &StatusLine, store: &str) -> String {
    match line {
        StatusLine::FetchFailed(error) => {
            format!("Failed to load grant data from {store}: {error}")
        }
        StatusLine::Saving => format!("Your file is being saved to {store}"),
        StatusLine::Saved { address } => {
            format!("Your file has been saved to {store} and can be accessed here: {address}")
        }
        StatusLine::SaveFailed(error) => format!("Failed to save your file to {store}: {error}"),
        StatusLine::Transaction(TxStatus::Initiated) => {
            "Transaction initiated, waiting for confirmation...".to_string()
        }
        StatusLine::Transaction(TxStatus::Complete) => "Transaction complete".to_string(),
        StatusLine::Transaction(status) => format!("Transaction {status}"),
        StatusLine::PublishFailed(error) => format!("Transaction failed: {error}"),
    }
}

impl fmt::Display for SubmissionView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render().join("\n"))
    }
}
