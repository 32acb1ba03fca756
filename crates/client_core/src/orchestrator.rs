//! Drives one grant submission: content store initialization, metadata fetch,
//! save, then publish.
//!
//! External calls run as spawned tasks. Each task reports its completions as
//! [`Action`]s over a single channel, and the orchestrator applies them one at
//! a time in arrival order. Nothing in flight is ever cancelled.

use std::sync::Arc;

use futures::StreamExt;
use shared::{
    domain::{GrantId, TxStatus},
    error::classify,
    protocol::{PublishEvent, PublishRequest},
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::SubmissionError,
    form::{FormError, GrantForm},
    store::{Action, SubmissionState},
    view::SubmissionView,
    ContentStoreClient, PublishClient,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionEvent {
    Applied {
        action: Action,
        view: SubmissionView,
    },
    FormChanged {
        enabled: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    Initialize,
    Fetch(GrantId),
    Save,
    Publish,
}

impl TaskKind {
    /// Action reported when the task dies without reporting its own outcome.
    fn failure(self, reason: String) -> Action {
        match self {
            Self::Initialize => Action::InitFailed(reason),
            Self::Fetch(grant_id) => Action::MetadataFetchFailed(grant_id, reason),
            Self::Save => Action::SaveFileFailed(reason),
            Self::Publish => Action::PublishFailed(reason),
        }
    }
}

enum Completion {
    Action(Action),
    Finished(TaskKind),
}

pub struct SubmissionOrchestrator {
    content_store: Arc<dyn ContentStoreClient>,
    publisher: Arc<dyn PublishClient>,
    state: SubmissionState,
    form: GrantForm,
    grant_id: Option<GrantId>,
    init_in_flight: bool,
    in_flight: usize,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    events: broadcast::Sender<SubmissionEvent>,
}

pub(crate) fn blob_name(grant_id: Option<GrantId>) -> String {
    match grant_id {
        Some(id) => format!("grant-{id}.json"),
        None => format!("grant-draft-{}.json", Uuid::new_v4()),
    }
}

impl SubmissionOrchestrator {
    pub fn new(
        content_store: Arc<dyn ContentStoreClient>,
        publisher: Arc<dyn PublishClient>,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        Self {
            content_store,
            publisher,
            state: SubmissionState::default(),
            form: GrantForm::new(),
            grant_id: None,
            init_in_flight: false,
            in_flight: 0,
            completions_tx,
            completions_rx,
            events,
        }
    }

    pub fn state(&self) -> &SubmissionState {
        &self.state
    }

    pub fn form(&self) -> &GrantForm {
        &self.form
    }

    pub fn grant_id(&self) -> Option<GrantId> {
        self.grant_id
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn view(&self) -> SubmissionView {
        SubmissionView::from_state(
            &self.state,
            self.grant_id,
            self.content_store.display_name(),
        )
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SubmissionEvent> {
        self.events.subscribe()
    }

    /// The failure currently shown to the user, most severe first.
    pub fn failure(&self) -> Option<SubmissionError> {
        let status = &self.state.content_store;
        if let Some(error) = &status.initialization_error {
            return Some(SubmissionError::Initialization(error.clone()));
        }
        if let Some(error) = &self.state.transaction.last_error {
            return Some(SubmissionError::Publish(error.clone()));
        }
        if let Some(error) = &status.save_error {
            return Some(SubmissionError::Save(error.clone()));
        }
        let grant_id = self.grant_id?;
        let reason = self.state.metadata(grant_id)?.error.clone()?;
        Some(SubmissionError::Fetch { grant_id, reason })
    }

    /// Starts content store initialization unless it already succeeded, is
    /// running, or failed for this session.
    pub fn activate(&mut self) {
        self.dispatch(Action::RequestInit);

        let status = &self.state.content_store;
        if status.initialized || status.initialization_error.is_some() || self.init_in_flight {
            return;
        }

        self.init_in_flight = true;
        let content_store = Arc::clone(&self.content_store);
        self.spawn_task(TaskKind::Initialize, move |tx| async move {
            let action = match content_store.initialize().await {
                Ok(()) => Action::InitSucceeded,
                Err(err) => Action::InitFailed(format!("{err:#}")),
            };
            let _ = tx.send(Completion::Action(action));
        });
    }

    /// Selects the grant being edited. Its metadata is fetched as soon as the
    /// content store is ready.
    pub fn set_grant_id(&mut self, grant_id: Option<GrantId>) -> Result<(), SubmissionError> {
        if let Some(error) = &self.state.content_store.initialization_error {
            return Err(SubmissionError::Initialization(error.clone()));
        }
        self.grant_id = grant_id;
        if let Some(id) = grant_id {
            if self.state.is_ready() {
                self.request_fetch(id);
            }
        }
        Ok(())
    }

    pub fn on_field_change(
        &mut self,
        name: &str,
        value: impl Into<String>,
    ) -> Result<(), FormError> {
        self.form
            .on_field_change(name, value, self.state.is_ready())?;
        self.emit_form_changed();
        Ok(())
    }

    /// Saves the current draft and, once saved, publishes its address.
    pub fn submit(&mut self) -> Result<(), SubmissionError> {
        if let Some(error) = &self.state.content_store.initialization_error {
            return Err(SubmissionError::Initialization(error.clone()));
        }
        if !self.state.is_ready() {
            return Err(SubmissionError::NotReady(
                "content store is still initializing",
            ));
        }
        if !self.form.enabled() {
            return Err(SubmissionError::NotReady(
                "all grant fields must be filled in",
            ));
        }
        if self.state.content_store.saving_file {
            return Err(SubmissionError::NotReady("a save is already in progress"));
        }

        let name = blob_name(self.grant_id);
        let content = serde_json::to_string(self.form.draft())?;
        self.dispatch(Action::RequestSaveFile {
            name: name.clone(),
            content: content.clone(),
        });

        let content_store = Arc::clone(&self.content_store);
        self.spawn_task(TaskKind::Save, move |tx| async move {
            let action = match content_store
                .save_named_blob(&name, content.into_bytes())
                .await
            {
                Ok(address) => Action::FileSaved(address),
                Err(err) => {
                    warn!(
                        name = %name,
                        code = classify(&*err).as_str(),
                        "saving grant metadata failed"
                    );
                    Action::SaveFileFailed(format!("{err:#}"))
                }
            };
            let _ = tx.send(Completion::Action(action));
        });
        Ok(())
    }

    /// Applies `action` to the store and reacts to the transition.
    pub fn dispatch(&mut self, action: Action) {
        if action.is_failure() {
            warn!(action = action.name(), detail = ?action, "submission step failed");
        } else {
            debug!(action = action.name(), "applying action");
        }
        self.state.apply(action.clone());
        let _ = self.events.send(SubmissionEvent::Applied {
            action: action.clone(),
            view: self.view(),
        });

        match &action {
            Action::InitSucceeded => {
                self.init_in_flight = false;
                info!(
                    store = self.content_store.display_name(),
                    "content store initialized"
                );
                self.form.refresh(true);
                self.emit_form_changed();
                if let Some(id) = self.grant_id {
                    self.request_fetch(id);
                }
            }
            Action::InitFailed(_) => {
                self.init_in_flight = false;
                self.form.refresh(false);
                self.emit_form_changed();
            }
            Action::MetadataFetched(id, metadata) if Some(*id) == self.grant_id => {
                self.form.apply_metadata(metadata, self.state.is_ready());
                self.emit_form_changed();
            }
            Action::FileSaved(address) => self.publish(address.clone()),
            _ => {}
        }
    }

    /// Applies the next completion from an in-flight call. Returns `None` once
    /// nothing is in flight.
    pub async fn step(&mut self) -> Option<Action> {
        while self.in_flight > 0 {
            match self.completions_rx.recv().await? {
                Completion::Action(action) => {
                    self.dispatch(action.clone());
                    return Some(action);
                }
                Completion::Finished(kind) => {
                    self.in_flight -= 1;
                    match kind {
                        TaskKind::Fetch(grant_id) => {
                            debug!(%grant_id, in_flight = self.in_flight, "fetch finished")
                        }
                        other => debug!(task = ?other, in_flight = self.in_flight, "task finished"),
                    }
                }
            }
        }
        None
    }

    pub async fn run_until_idle(&mut self) -> &SubmissionState {
        while self.step().await.is_some() {}
        &self.state
    }

    fn request_fetch(&mut self, grant_id: GrantId) {
        if self
            .state
            .metadata(grant_id)
            .is_some_and(|entry| entry.loading)
        {
            return;
        }
        self.dispatch(Action::RequestFetchMetadata(grant_id));

        let content_store = Arc::clone(&self.content_store);
        self.spawn_task(TaskKind::Fetch(grant_id), move |tx| async move {
            let action = match content_store.fetch_by_id(grant_id).await {
                Ok(metadata) => Action::MetadataFetched(grant_id, metadata),
                Err(err) => Action::MetadataFetchFailed(grant_id, format!("{err:#}")),
            };
            let _ = tx.send(Completion::Action(action));
        });
    }

    fn publish(&mut self, metadata_address: String) {
        let request = PublishRequest {
            grant_id: self.grant_id,
            metadata_address,
        };
        info!(
            grant_id = ?request.grant_id,
            address = %request.metadata_address,
            "publishing grant"
        );

        let publisher = Arc::clone(&self.publisher);
        self.spawn_task(TaskKind::Publish, move |tx| async move {
            let mut watch = match publisher.publish(request).await {
                Ok(watch) => watch,
                Err(err) => {
                    let action = Action::PublishFailed(format!("{err:#}"));
                    let _ = tx.send(Completion::Action(action));
                    return;
                }
            };
            let mut settled = false;
            while let Some(event) = watch.next().await {
                settled |= !matches!(event, PublishEvent::Initiated);
                let actions = match event {
                    PublishEvent::Initiated => {
                        vec![Action::TxStatusChanged(TxStatus::Initiated)]
                    }
                    PublishEvent::Complete(grant) => vec![
                        Action::TxStatusChanged(TxStatus::Complete),
                        Action::GrantCreated(grant),
                    ],
                    PublishEvent::Failed(reason) => vec![Action::PublishFailed(reason)],
                };
                for action in actions {
                    let _ = tx.send(Completion::Action(action));
                }
            }
            if !settled {
                let action =
                    Action::PublishFailed("publish watch ended before confirmation".to_string());
                let _ = tx.send(Completion::Action(action));
            }
        });
    }

    fn spawn_task<F, Fut>(&mut self, kind: TaskKind, task: F)
    where
        F: FnOnce(mpsc::UnboundedSender<Completion>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.completions_tx.clone();
        let work = tokio::spawn(task(tx.clone()));
        tokio::spawn(async move {
            if let Err(err) = work.await {
                warn!(task = ?kind, error = %err, "task aborted");
                let action = kind.failure(format!("{kind:?} task aborted: {err}"));
                let _ = tx.send(Completion::Action(action));
            }
            let _ = tx.send(Completion::Finished(kind));
        });
    }

    fn emit_form_changed(&self) {
        let _ = self.events.send(SubmissionEvent::FormChanged {
            enabled: self.form.enabled(),
        });
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
