use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::{
    memory::{InMemoryContentStore, SimulatedPublishClient},
    view::{Screen, StatusLine},
    MissingPublishClient, PublishWatch,
};
use shared::{
    domain::ReceivedFunding,
    protocol::{GrantDraft, GrantMetadata, NewGrant},
};

const FIELDS: [(&str, &str); 5] = [
    ("title", "Stop destruction in Ukraine"),
    ("description", "Rebuild the school roof"),
    ("website", "https://roof.example"),
    ("chain", "ethereum"),
    ("wallet", "0x00ff"),
];

fn orchestrator(
    store: &Arc<InMemoryContentStore>,
    publisher: &Arc<SimulatedPublishClient>,
) -> SubmissionOrchestrator {
    SubmissionOrchestrator::new(store.clone(), publisher.clone())
}

fn fill_form(orchestrator: &mut SubmissionOrchestrator) {
    for (name, value) in FIELDS {
        orchestrator
            .on_field_change(name, value)
            .expect("field change");
    }
}

fn fetched_metadata(id: u64) -> GrantMetadata {
    GrantMetadata::new(
        GrantId(id),
        GrantDraft {
            title: "Stored title".into(),
            description: "Stored description".into(),
            website: "https://stored.example".into(),
            chain: "polygon".into(),
            wallet: "0xstored".into(),
            received_funding: ReceivedFunding::Yes,
        },
    )
}

#[tokio::test]
async fn activate_twice_initializes_once() {
    let store = Arc::new(InMemoryContentStore::new().with_display_name("IPFS"));
    let publisher = Arc::new(SimulatedPublishClient::new());
    let mut orchestrator = orchestrator(&store, &publisher);

    orchestrator.activate();
    orchestrator.activate();
    assert_eq!(orchestrator.view().to_string(), "Initializing IPFS...");

    let state = orchestrator.run_until_idle().await;
    assert!(state.content_store.initialized);
    assert_eq!(store.initialize_calls(), 1);

    orchestrator.activate();
    assert_eq!(orchestrator.in_flight(), 0);
    assert_eq!(store.initialize_calls(), 1);
}

#[tokio::test]
async fn initialization_failure_is_terminal() {
    let store = Arc::new(
        InMemoryContentStore::new()
            .with_display_name("IPFS")
            .failing_initialize("node did not start"),
    );
    let publisher = Arc::new(SimulatedPublishClient::new());
    let mut orchestrator = orchestrator(&store, &publisher);

    orchestrator.activate();
    orchestrator.run_until_idle().await;
    fill_form(&mut orchestrator);

    let view = orchestrator.view();
    assert!(view.is_blocked());
    assert_eq!(
        view.to_string(),
        "Error initializing IPFS. Reload the page and try again."
    );
    assert!(!orchestrator.form().enabled());
    assert!(matches!(
        orchestrator.submit(),
        Err(SubmissionError::Initialization(_))
    ));
    assert!(orchestrator.failure().is_some_and(|err| err.is_terminal()));
    assert!(orchestrator.set_grant_id(Some(GrantId(1))).is_err());

    orchestrator.activate();
    assert_eq!(orchestrator.in_flight(), 0);
    assert_eq!(store.initialize_calls(), 1);
}

#[tokio::test]
async fn submit_requires_ready_store_and_complete_form() {
    let store = Arc::new(InMemoryContentStore::new());
    let publisher = Arc::new(SimulatedPublishClient::new());
    let mut orchestrator = orchestrator(&store, &publisher);

    fill_form(&mut orchestrator);
    assert!(!orchestrator.form().enabled());
    assert!(matches!(
        orchestrator.submit(),
        Err(SubmissionError::NotReady(_))
    ));

    orchestrator.activate();
    orchestrator.run_until_idle().await;
    assert!(orchestrator.form().enabled());

    orchestrator
        .on_field_change("wallet", "")
        .expect("clear wallet");
    assert!(matches!(
        orchestrator.submit(),
        Err(SubmissionError::NotReady(_))
    ));
    assert_eq!(store.initialize_calls(), 1);
}

#[tokio::test]
async fn new_grant_is_saved_then_published_with_saved_address() {
    let store = Arc::new(InMemoryContentStore::new().with_display_name("IPFS"));
    let publisher = Arc::new(SimulatedPublishClient::starting_at(GrantId(40)));
    let mut orchestrator = orchestrator(&store, &publisher);

    orchestrator.activate();
    orchestrator.run_until_idle().await;
    fill_form(&mut orchestrator);
    orchestrator.submit().expect("submit");
    assert_eq!(
        orchestrator.view().to_string(),
        "Your file is being saved to IPFS"
    );

    let state = orchestrator.run_until_idle().await.clone();
    let address = state
        .content_store
        .last_saved_address
        .clone()
        .expect("saved address");
    assert!(!state.content_store.saving_file);
    assert_eq!(state.transaction.status, TxStatus::Complete);
    assert_eq!(
        state.transaction.grants,
        vec![NewGrant {
            id: GrantId(40),
            meta_data: address.clone(),
        }]
    );

    let requests = publisher.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].grant_id, None);
    assert_eq!(requests[0].metadata_address, address);

    let saved: GrantDraft =
        serde_json::from_slice(&store.blob(&address).await.expect("blob")).expect("json");
    assert_eq!(&saved, orchestrator.form().draft());

    assert_eq!(
        orchestrator.view().render(),
        vec![
            format!("Your file has been saved to IPFS and can be accessed here: {address}"),
            "Transaction complete".to_string(),
        ]
    );
}

#[tokio::test]
async fn applied_actions_are_broadcast_in_order() {
    let store = Arc::new(InMemoryContentStore::new());
    let publisher = Arc::new(SimulatedPublishClient::new());
    let mut orchestrator = orchestrator(&store, &publisher);
    let mut events = orchestrator.subscribe_events();

    orchestrator.activate();
    orchestrator.run_until_idle().await;
    fill_form(&mut orchestrator);
    orchestrator.submit().expect("submit");
    orchestrator.run_until_idle().await;

    let mut applied = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SubmissionEvent::Applied { action, .. } = event {
            applied.push(action.name());
        }
    }
    assert_eq!(
        applied,
        vec![
            "request_init",
            "init_succeeded",
            "request_save_file",
            "file_saved",
            "tx_status_changed",
            "tx_status_changed",
            "grant_created",
        ]
    );
}

#[tokio::test]
async fn existing_grant_is_loaded_into_the_form_and_republished_under_its_id() {
    let store = Arc::new(
        InMemoryContentStore::new()
            .with_display_name("IPFS")
            .with_grant(fetched_metadata(7)),
    );
    let publisher = Arc::new(SimulatedPublishClient::new());
    let mut orchestrator = orchestrator(&store, &publisher);

    orchestrator
        .set_grant_id(Some(GrantId(7)))
        .expect("grant id");
    orchestrator.activate();

    assert_eq!(orchestrator.step().await, Some(Action::InitSucceeded));
    assert_eq!(
        orchestrator.view().to_string(),
        "Loading grant data from IPFS..."
    );

    orchestrator.run_until_idle().await;
    assert_eq!(orchestrator.form().draft(), &fetched_metadata(7).draft);
    assert!(orchestrator.form().enabled());

    orchestrator.submit().expect("submit");
    let state = orchestrator.run_until_idle().await.clone();

    let address = store
        .address_for_name("grant-7.json")
        .await
        .expect("named blob");
    assert_eq!(
        state.transaction.grants,
        vec![NewGrant {
            id: GrantId(7),
            meta_data: address,
        }]
    );
    assert_eq!(publisher.requests().await[0].grant_id, Some(GrantId(7)));
}

#[tokio::test]
async fn fetched_metadata_overwrites_edits_made_while_loading() {
    let store = Arc::new(InMemoryContentStore::new().with_grant(fetched_metadata(3)));
    let publisher = Arc::new(SimulatedPublishClient::new());
    let mut orchestrator = orchestrator(&store, &publisher);

    orchestrator
        .set_grant_id(Some(GrantId(3)))
        .expect("grant id");
    orchestrator.activate();
    assert_eq!(orchestrator.step().await, Some(Action::InitSucceeded));

    orchestrator
        .on_field_change("title", "typed while loading")
        .expect("title");
    orchestrator.run_until_idle().await;

    assert_eq!(orchestrator.form().draft().title, "Stored title");
}

#[tokio::test]
async fn fetch_failure_is_surfaced_instead_of_loading_forever() {
    let store = Arc::new(InMemoryContentStore::new().with_display_name("IPFS"));
    let publisher = Arc::new(SimulatedPublishClient::new());
    let mut orchestrator = orchestrator(&store, &publisher);

    orchestrator.activate();
    orchestrator.run_until_idle().await;
    orchestrator
        .set_grant_id(Some(GrantId(99)))
        .expect("grant id");
    orchestrator.run_until_idle().await;

    let entry = orchestrator
        .state()
        .metadata(GrantId(99))
        .expect("entry");
    assert!(!entry.loading);
    assert!(entry.error.is_some());

    let view = orchestrator.view();
    assert_eq!(view.screen, Screen::Form);
    assert!(matches!(view.lines.as_slice(), [StatusLine::FetchFailed(_)]));

    let failure = orchestrator.failure().expect("fetch failure");
    assert!(matches!(
        failure,
        SubmissionError::Fetch {
            grant_id: GrantId(99),
            ..
        }
    ));
    assert!(!failure.is_terminal());
}

#[tokio::test]
async fn save_failure_stops_before_publishing() {
    let store = Arc::new(InMemoryContentStore::new().failing_save("node offline"));
    let publisher = Arc::new(SimulatedPublishClient::new());
    let mut orchestrator = orchestrator(&store, &publisher);

    orchestrator.activate();
    orchestrator.run_until_idle().await;
    fill_form(&mut orchestrator);
    orchestrator.submit().expect("submit");
    let state = orchestrator.run_until_idle().await.clone();

    assert!(!state.content_store.saving_file);
    assert_eq!(state.content_store.last_saved_address, None);
    assert!(state
        .content_store
        .save_error
        .as_deref()
        .is_some_and(|error| error.contains("node offline")));
    assert_eq!(state.transaction.status, TxStatus::None);
    assert!(publisher.requests().await.is_empty());
    assert!(matches!(
        orchestrator.failure(),
        Some(SubmissionError::Save(reason)) if reason.contains("node offline")
    ));
}

#[tokio::test]
async fn rejected_publish_marks_transaction_failed() {
    let store = Arc::new(InMemoryContentStore::new());
    let publisher = Arc::new(SimulatedPublishClient::failing("execution reverted"));
    let mut orchestrator = orchestrator(&store, &publisher);

    orchestrator.activate();
    orchestrator.run_until_idle().await;
    fill_form(&mut orchestrator);
    orchestrator.submit().expect("submit");
    let state = orchestrator.run_until_idle().await;

    assert_eq!(state.transaction.status, TxStatus::Failed);
    assert_eq!(
        state.transaction.last_error.as_deref(),
        Some("execution reverted")
    );
    assert!(state.transaction.grants.is_empty());
    assert_eq!(
        orchestrator.failure(),
        Some(SubmissionError::Publish("execution reverted".into()))
    );
}

#[tokio::test]
async fn unavailable_publisher_is_reported_as_publish_failure() {
    let store = Arc::new(InMemoryContentStore::new());
    let mut orchestrator =
        SubmissionOrchestrator::new(store.clone(), Arc::new(MissingPublishClient));

    orchestrator.activate();
    orchestrator.run_until_idle().await;
    fill_form(&mut orchestrator);
    orchestrator.submit().expect("submit");
    let state = orchestrator.run_until_idle().await;

    assert_eq!(state.transaction.status, TxStatus::Failed);
    assert_eq!(
        state.transaction.last_error.as_deref(),
        Some("publish client is unavailable")
    );
}

#[tokio::test]
async fn second_submit_is_refused_while_saving() {
    let store = Arc::new(InMemoryContentStore::new());
    let publisher = Arc::new(SimulatedPublishClient::new());
    let mut orchestrator = orchestrator(&store, &publisher);

    orchestrator.activate();
    orchestrator.run_until_idle().await;
    fill_form(&mut orchestrator);
    orchestrator.submit().expect("first submit");

    assert_eq!(
        orchestrator.submit(),
        Err(SubmissionError::NotReady("a save is already in progress"))
    );
    orchestrator.run_until_idle().await;
    assert_eq!(publisher.requests().await.len(), 1);
}

#[test]
fn blob_names_follow_grant_identity() {
    assert_eq!(blob_name(Some(GrantId(12))), "grant-12.json");
    let draft_name = blob_name(None);
    assert!(draft_name.starts_with("grant-draft-"));
    assert!(draft_name.ends_with(".json"));
}

/// Replays one scripted event list per `publish` call, repeating the last.
struct ScriptedPublisher {
    scripts: Vec<Vec<PublishEvent>>,
    calls: AtomicUsize,
}

impl ScriptedPublisher {
    fn new(scripts: Vec<Vec<PublishEvent>>) -> Self {
        Self {
            scripts,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PublishClient for ScriptedPublisher {
    async fn publish(&self, request: PublishRequest) -> anyhow::Result<PublishWatch> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts[call.min(self.scripts.len() - 1)]
            .iter()
            .cloned()
            .map(|event| match event {
                PublishEvent::Complete(grant) => PublishEvent::Complete(NewGrant {
                    meta_data: request.metadata_address.clone(),
                    ..grant
                }),
                other => other,
            })
            .collect::<Vec<_>>();
        Ok(futures::stream::iter(script).boxed())
    }
}

struct PanickingPublisher;

#[async_trait]
impl PublishClient for PanickingPublisher {
    async fn publish(&self, _request: PublishRequest) -> anyhow::Result<PublishWatch> {
        panic!("chain client crashed");
    }
}

async fn submit_filled_form(orchestrator: &mut SubmissionOrchestrator) {
    orchestrator.activate();
    orchestrator.run_until_idle().await;
    fill_form(orchestrator);
    orchestrator.submit().expect("submit");
    orchestrator.run_until_idle().await;
}

#[tokio::test]
async fn watch_ending_without_confirmation_fails_the_transaction() {
    let store = Arc::new(InMemoryContentStore::new().with_display_name("IPFS"));
    let publisher = Arc::new(ScriptedPublisher::new(vec![vec![PublishEvent::Initiated]]));
    let mut orchestrator = SubmissionOrchestrator::new(store, publisher);

    submit_filled_form(&mut orchestrator).await;

    assert_eq!(orchestrator.in_flight(), 0);
    let state = orchestrator.state();
    assert_eq!(state.transaction.status, TxStatus::Failed);
    assert!(state.transaction.grants.is_empty());
    assert!(matches!(
        orchestrator.failure(),
        Some(SubmissionError::Publish(reason)) if reason.contains("ended before confirmation")
    ));
    assert!(matches!(
        orchestrator.view().lines.last(),
        Some(StatusLine::PublishFailed(_))
    ));
}

#[tokio::test]
async fn successful_resubmit_clears_earlier_publish_failure() {
    let store = Arc::new(InMemoryContentStore::new());
    let publisher = Arc::new(ScriptedPublisher::new(vec![
        vec![
            PublishEvent::Initiated,
            PublishEvent::Failed("reverted".into()),
        ],
        vec![
            PublishEvent::Initiated,
            PublishEvent::Complete(NewGrant {
                id: GrantId(8),
                meta_data: String::new(),
            }),
        ],
    ]));
    let mut orchestrator = SubmissionOrchestrator::new(store, publisher);

    submit_filled_form(&mut orchestrator).await;
    assert_eq!(
        orchestrator.failure(),
        Some(SubmissionError::Publish("reverted".into()))
    );

    orchestrator.submit().expect("resubmit");
    let state = orchestrator.run_until_idle().await;
    assert_eq!(state.transaction.status, TxStatus::Complete);
    assert_eq!(state.transaction.grants.len(), 1);
    assert_eq!(state.transaction.last_error, None);
    assert_eq!(orchestrator.failure(), None);
}

#[tokio::test]
async fn panicking_publisher_is_reported_and_loop_goes_idle() {
    let store = Arc::new(InMemoryContentStore::new());
    let mut orchestrator = SubmissionOrchestrator::new(store, Arc::new(PanickingPublisher));

    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        submit_filled_form(&mut orchestrator),
    )
    .await
    .expect("run_until_idle returned");

    assert_eq!(orchestrator.in_flight(), 0);
    assert_eq!(orchestrator.state().transaction.status, TxStatus::Failed);
    assert!(matches!(
        orchestrator.failure(),
        Some(SubmissionError::Publish(reason)) if reason.contains("aborted")
    ));
}

#[tokio::test]
async fn refetching_a_failed_grant_shows_loading_again() {
    let store = Arc::new(InMemoryContentStore::new().with_display_name("IPFS"));
    let publisher = Arc::new(SimulatedPublishClient::new());
    let mut orchestrator = orchestrator(&store, &publisher);

    orchestrator.activate();
    orchestrator.run_until_idle().await;
    orchestrator
        .set_grant_id(Some(GrantId(99)))
        .expect("grant id");
    orchestrator.run_until_idle().await;
    assert!(orchestrator.failure().is_some());

    orchestrator
        .set_grant_id(Some(GrantId(99)))
        .expect("grant id");
    assert_eq!(
        orchestrator.view().to_string(),
        "Loading grant data from IPFS..."
    );
    assert_eq!(orchestrator.failure(), None);
    orchestrator.run_until_idle().await;
    assert!(orchestrator.failure().is_some());
}
