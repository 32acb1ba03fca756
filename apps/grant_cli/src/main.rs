use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use clap::Parser;
use client_core::{
    ContentStoreClient, InMemoryContentStore, IpfsHttpConfig, IpfsHttpContentStore,
    PublishClient, SimulatedPublishClient, SubmissionEvent, SubmissionOrchestrator,
};
use shared::domain::{GrantId, ReceivedFunding};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, ContentStoreKind, Settings};

/// Saves grant metadata to a content store and publishes its address.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "grant_cli.toml")]
    config: PathBuf,
    /// Existing grant to load and update.
    #[arg(long)]
    grant_id: Option<GrantId>,
    #[arg(long)]
    content_store: Option<ContentStoreKind>,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    website: Option<String>,
    #[arg(long)]
    chain: Option<String>,
    #[arg(long)]
    wallet: Option<String>,
    #[arg(long)]
    received_funding: Option<ReceivedFunding>,
}

impl Args {
    fn field_changes(&self) -> Vec<(&'static str, String)> {
        let funding = self.received_funding.map(|v| v.as_str().to_string());
        [
            ("title", &self.title),
            ("description", &self.description),
            ("website", &self.website),
            ("chain", &self.chain),
            ("wallet", &self.wallet),
            ("receivedFunding", &funding),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.clone().map(|value| (name, value)))
        .collect()
    }
}

fn build_content_store(settings: &Settings) -> Result<Arc<dyn ContentStoreClient>> {
    Ok(match settings.content_store {
        ContentStoreKind::Memory => {
            let name = settings
                .store_display_name
                .clone()
                .unwrap_or_else(|| "memory store".to_string());
            Arc::new(InMemoryContentStore::new().with_display_name(name))
        }
        ContentStoreKind::Ipfs => {
            let mut config =
                IpfsHttpConfig::new(&settings.ipfs_api_url, &settings.ipfs_gateway_url)?;
            config.grants_root = settings.grants_root.clone();
            if let Some(name) = &settings.store_display_name {
                config.display_name = name.clone();
            }
            Arc::new(IpfsHttpContentStore::new(config)?)
        }
    })
}

fn build_publisher(settings: &Settings) -> Arc<dyn PublishClient> {
    warn!("no chain client configured; using the simulated publish client");
    match &settings.publish_fail {
        Some(reason) => Arc::new(SimulatedPublishClient::failing(reason.clone())),
        None => Arc::new(SimulatedPublishClient::starting_at(GrantId(
            settings.first_grant_id,
        ))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config)?;
    if let Some(kind) = args.content_store {
        settings.content_store = kind;
    }
    info!(content_store = ?settings.content_store, "loaded settings");

    let mut orchestrator =
        SubmissionOrchestrator::new(build_content_store(&settings)?, build_publisher(&settings));

    let mut events = BroadcastStream::new(orchestrator.subscribe_events());
    let printer = tokio::spawn(async move {
        let mut last_rendered = Vec::new();
        while let Some(event) = events.next().await {
            let Ok(SubmissionEvent::Applied { view, .. }) = event else {
                continue;
            };
            let rendered = view.render();
            if rendered != last_rendered {
                for line in &rendered {
                    println!("{line}");
                }
                last_rendered = rendered;
            }
        }
    });

    orchestrator.set_grant_id(args.grant_id)?;
    orchestrator.activate();
    orchestrator.run_until_idle().await;

    if let Some(err) = orchestrator.failure().filter(|err| err.is_terminal()) {
        drop(orchestrator);
        let _ = printer.await;
        bail!(err);
    }

    for (name, value) in args.field_changes() {
        orchestrator.on_field_change(name, value)?;
    }
    orchestrator.submit()?;
    let state = orchestrator.run_until_idle().await;

    let grants = serde_json::to_string_pretty(&state.transaction.grants)?;
    let failure = orchestrator.failure();
    drop(orchestrator);
    let _ = printer.await;

    println!("created grants: {grants}");
    if let Some(err) = failure {
        error!(code = err.code().as_str(), "grant submission did not complete");
        bail!(err);
    }
    Ok(())
}
