//! StructSync Demo
//!
//! Runs a playlist controller and a client proxy over an in-process bridge
//! and prints the mirrored state after each remote call.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use struct_sync::{
    ActionType, Contract, EventType, LoopbackBridge, ProxyOptions, StructSyncClient,
    StructSyncServer, StructSyncSession, SyncConfig,
};
use struct_types::{Struct, Type, Value};

/// StructSync playlist demo
#[derive(Parser, Debug)]
#[command(name = "struct_sync_demo")]
#[command(about = "Mirror a playlist controller through a StructSync proxy", long_about = None)]
struct Args {
    /// Path to a TOML sync configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of tracks in the initial playlist
    #[arg(long, default_value = "3")]
    tracks: usize,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SyncConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SyncConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting StructSync demo v{}", env!("CARGO_PKG_VERSION"));

    let track = Struct::define(
        "Track",
        [("name", Type::string()), ("artist", Type::string())],
    );
    let playlist = Struct::define(
        "Playlist",
        [
            ("name", Type::string()),
            ("tracks", Type::array(track.reference())),
        ],
    );
    let contract = Contract::define(
        playlist.clone(),
        [
            ActionType::define("removeTrack", Type::object([("index", Type::number())]), Type::empty()),
            ActionType::define("rename", Type::string(), Type::string()),
        ],
        [EventType::define("onRemove", Type::string())],
    );

    let tracks = (1..=args.tracks)
        .map(|n| track.instantiate([("name", format!("track_{n}")), ("artist", format!("artist_{n}"))]))
        .collect::<Result<Vec<_>, _>>()?;
    let initial = playlist.instantiate([
        ("name", Value::from("demo")),
        ("tracks", Value::Array(tracks)),
    ])?;

    // Server side
    let server = StructSyncServer::new();
    let controller = contract.controller(initial)?;
    controller.implement("removeTrack", |this, argument, _meta| async move {
        let index = argument.get("index").and_then(Value::as_f64).unwrap_or_default() as usize;
        let mut removed = None;
        this.mutate(|v| {
            let tracks = v.field("tracks")?;
            removed = tracks.index(index)?.get()?;
            tracks.splice(index, 1, vec![])
        })
        .await?;

        if let Some(name) = removed.as_ref().and_then(|t| t.get("name")).and_then(Value::as_str) {
            this.emit("onRemove", name).await?;
        }
        Ok(Value::Null)
    })?;
    controller.implement("rename", |this, name, meta| async move {
        let caller = meta.session().map(|s| s.name().to_string()).unwrap_or_default();
        let previous = this.snapshot().await.get("name").cloned().unwrap_or_default();
        this.mutate(|v| v.assign("name", name)).await?;
        info!(%caller, "Playlist renamed");
        Ok(previous)
    })?;
    controller.register(&server)?;

    // Client side
    let (server_end, client_end) = LoopbackBridge::pair();
    let _session = StructSyncSession::with_config(&server, server_end, &config);
    let client = StructSyncClient::with_config(client_end, config.clone());

    let proxy = contract.make_proxy(&client, ProxyOptions::default()).await?;
    let mut removals = proxy.subscribe_event("onRemove")?;
    println!("{}", serde_json::to_string_pretty(&proxy.serialize()?)?);

    proxy
        .call("removeTrack", Value::object_from_pairs([("index", 0)]))
        .await?;
    if let Ok(name) = removals.try_recv() {
        info!(track = ?name, "Track removed");
    }

    let previous = proxy.call("rename", "renamed").await?;
    info!(previous = ?previous, "Rename returned");
    println!("{}", serde_json::to_string_pretty(&proxy.serialize()?)?);

    proxy.dispose();
    controller.unregister();
    Ok(())
}
