use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use struct_sync::{
    ActionType, ClientMiddleware, Contract, Controller, ControllerMessage, EventType,
    LoopbackBridge, MetaHandle, MetaMessageType, Proxy, ProxyMessage, ProxyOptions,
    ServerMiddleware, StructSyncClient, StructSyncServer, StructSyncSession, SyncConfig,
    SyncError, SyncResult,
};
use struct_types::{Mutation, MutationKind, Struct, Type, Value};
use tokio::sync::broadcast::error::TryRecvError;

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

fn track_t() -> Struct {
    Struct::define(
        "Track",
        [
            ("name", Type::string()),
            ("artist", Type::string()),
            ("icon", Type::string()),
        ],
    )
}

fn playlist_contract() -> Contract {
    let playlist = Struct::define(
        "Playlist",
        [
            ("id", Type::optional(Type::string())),
            ("name", Type::string()),
            ("icon", Type::string()),
            ("tracks", Type::array(track_t().reference())),
        ],
    );
    Contract::define(
        playlist,
        [ActionType::define(
            "removeTrack",
            Type::object([("index", Type::number())]),
            Type::empty(),
        )],
        [EventType::define("onPlay", Type::string())],
    )
}

fn playlist(id: Option<&str>) -> Value {
    let track = |n: usize| {
        track_t()
            .instantiate([
                ("name", format!("track_{n}")),
                ("artist", format!("artist_{n}")),
                ("icon", format!("icon_{n}")),
            ])
            .unwrap()
    };
    let contract = playlist_contract();
    contract
        .base()
        .instantiate([
            ("id", Value::from(id.unwrap_or_default())),
            ("name", Value::from("playlist_name")),
            ("icon", Value::from("icon_url")),
            ("tracks", Value::Array((1..=3).map(track).collect())),
        ])
        .unwrap()
}

fn playlist_controller(contract: &Contract, id: Option<&str>) -> Controller {
    let controller = contract.controller(playlist(id)).unwrap();
    controller
        .implement("removeTrack", |this, argument, _meta| async move {
            let index = argument.get("index").and_then(Value::as_f64).unwrap_or_default() as usize;
            this.mutate(move |v| v.field("tracks")?.splice(index, 1, vec![])).await?;
            Ok(Value::Null)
        })
        .unwrap();
    controller
}

struct Connection {
    session: StructSyncSession,
    client: StructSyncClient,
    client_end: Arc<LoopbackBridge>,
}

fn connect(server: &StructSyncServer, name: &str) -> Connection {
    let (server_end, client_end) = LoopbackBridge::pair();
    let config = SyncConfig::default().with_session_name(name);
    Connection {
        session: StructSyncSession::with_config(server, server_end, &config),
        client: StructSyncClient::with_config(client_end.clone(), config),
        client_end,
    }
}

struct Participants {
    server: StructSyncServer,
    connection: Connection,
    contract: Contract,
    controller: Controller,
    proxy: Proxy,
}

async fn participants() -> Participants {
    let server = StructSyncServer::new();
    let connection = connect(&server, "main");
    let contract = playlist_contract();
    let controller = playlist_controller(&contract, None);
    controller.register(&server).unwrap();
    let proxy = contract
        .make_proxy(&connection.client, ProxyOptions::default())
        .await
        .unwrap();

    Participants {
        server,
        connection,
        contract,
        controller,
        proxy,
    }
}

fn names(state: &Value) -> Vec<String> {
    state
        .get("tracks")
        .and_then(Value::as_array)
        .map(|tracks| {
            tracks
                .iter()
                .filter_map(|t| t.get("name").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn drain<T: Clone>(rx: &mut tokio::sync::broadcast::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(item) => items.push(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break items,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_proxy_mirrors_controller() {
    let p = participants().await;
    assert_eq!(p.proxy.full_id(), "Playlist");
    assert_eq!(p.proxy.serialize().unwrap(), p.controller.serialize().await.unwrap());
    assert_eq!(p.connection.client.tracked("Playlist").len(), 1);
    assert!(p.connection.session.is_tracking("Playlist"));
}

#[tokio::test]
async fn test_remove_track_from_proxy() {
    let p = participants().await;
    let mut mutations = p.proxy.subscribe_mutations();

    let result = p
        .proxy
        .call("removeTrack", Value::object_from_pairs([("index", 1)]))
        .await
        .unwrap();
    assert_eq!(result, Value::Null);

    let controller_state = p.controller.snapshot().await;
    assert_eq!(names(&controller_state), ["track_1", "track_3"]);
    assert_eq!(names(&p.proxy.snapshot()), ["track_1", "track_3"]);

    let received = drain(&mut mutations);
    assert_eq!(received.len(), 1);
    assert!(matches!(
        received[0].kind,
        MutationKind::Splice {
            index: 1,
            delete_count: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn test_controller_mutation_reaches_proxy() {
    let p = participants().await;
    let mut mutations = p.proxy.subscribe_mutations();
    assert_eq!(p.proxy.get("name"), Some(Value::from("playlist_name")));

    p.controller.mutate(|v| v.assign("name", "new_name")).await.unwrap();
    assert_eq!(p.proxy.get("name"), Some(Value::from("new_name")));
    assert_eq!(drain(&mut mutations).len(), 1);

    p.controller
        .mutate(|v| v.field("tracks")?.index(0)?.assign("name", "new_name"))
        .await
        .unwrap();
    assert_eq!(names(&p.proxy.snapshot())[0], "new_name");
    assert_eq!(drain(&mut mutations).len(), 1);
    assert_eq!(p.proxy.serialize().unwrap(), p.controller.serialize().await.unwrap());
}

#[tokio::test]
async fn test_one_batch_per_mutate_call() {
    let p = participants().await;
    let mut mutations = p.proxy.subscribe_mutations();

    let edits = p
        .controller
        .mutate(|v| {
            v.assign("icon", "new_icon")?;
            let tracks = v.field("tracks")?;
            tracks.clear()?;
            tracks.push(track_t().instantiate([("name", "solo")])?)
        })
        .await
        .unwrap();

    assert_eq!(edits.len(), 3);
    assert_eq!(drain(&mut mutations).len(), 3);
    assert_eq!(names(&p.proxy.snapshot()), ["solo"]);
    assert_eq!(p.proxy.get("icon"), Some(Value::from("new_icon")));
}

#[tokio::test]
async fn test_find_missing_controller() {
    let p = participants().await;
    let err = p
        .contract
        .make_proxy(&p.connection.client, ProxyOptions::instance("missing"))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Server Error: No controller named \"Playlist::missing\" found"
    );
}

#[tokio::test]
async fn test_missing_action_is_reported() {
    let server = StructSyncServer::new();
    let connection = connect(&server, "main");
    let contract = playlist_contract();
    contract.controller(playlist(None)).unwrap().register(&server).unwrap();
    let proxy = contract
        .make_proxy(&connection.client, ProxyOptions::default())
        .await
        .unwrap();

    let err = proxy
        .call("removeTrack", Value::object_from_pairs([("index", 0)]))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Server Error: Action \"removeTrack\" not found on controller"
    );
    assert!(matches!(
        proxy.call("shuffle", Value::Null).await,
        Err(SyncError::ActionNotFound(_))
    ));
}

#[tokio::test]
async fn test_instance_controllers() {
    let server = StructSyncServer::new();
    let connection = connect(&server, "main");
    let contract = playlist_contract();
    let a = playlist_controller(&contract, Some("a"));
    let b = playlist_controller(&contract, Some("b"));
    a.register(&server).unwrap();
    b.register(&server).unwrap();
    assert_eq!(a.full_id(), "Playlist::a");

    let proxy = contract
        .make_proxy(&connection.client, ProxyOptions::instance("b"))
        .await
        .unwrap();
    proxy
        .call("removeTrack", Value::object_from_pairs([("index", 0)]))
        .await
        .unwrap();

    assert_eq!(names(&b.snapshot().await), ["track_2", "track_3"]);
    assert_eq!(names(&a.snapshot().await).len(), 3);
    assert_eq!(names(&proxy.snapshot()), ["track_2", "track_3"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Ordering
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ordering_with_multiple_proxies() {
    let log = Contract::define(
        Struct::define("Log", [("entries", Type::array(Type::number()))]),
        Vec::<ActionType>::new(),
        Vec::<EventType>::new(),
    );
    let server = StructSyncServer::new();
    let controller = log.default_controller();
    controller.register(&server).unwrap();

    let first = connect(&server, "first");
    let second = connect(&server, "second");
    let proxies = vec![
        log.make_proxy(&first.client, ProxyOptions::default()).await.unwrap(),
        log.make_proxy(&first.client, ProxyOptions::default()).await.unwrap(),
        log.make_proxy(&second.client, ProxyOptions::default()).await.unwrap(),
    ];
    let mut receivers: Vec<_> = proxies.iter().map(Proxy::subscribe_mutations).collect();

    for i in 0..5 {
        controller.mutate(move |v| v.field("entries")?.push(i)).await.unwrap();
    }

    let expected = Value::from((0..5).collect::<Vec<i32>>());
    for (proxy, rx) in proxies.iter().zip(receivers.iter_mut()) {
        assert_eq!(proxy.get("entries"), Some(expected.clone()));

        let indices: Vec<usize> = drain(rx)
            .iter()
            .map(|m: &Mutation| match &m.kind {
                MutationKind::Splice { index, .. } => *index,
                other => panic!("unexpected edit {other:?}"),
            })
            .collect();
        assert_eq!(indices, [0, 1, 2, 3, 4]);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events, Synchronize, Dispose
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_events_reach_tracking_proxies() {
    let p = participants().await;
    let mut plays = p.proxy.subscribe_event("onPlay").unwrap();
    assert!(p.proxy.subscribe_event("onStop").is_err());

    p.controller.emit("onPlay", "track_2").await.unwrap();
    assert_eq!(drain(&mut plays), [Value::from("track_2")]);

    let err = p.controller.emit("onPlay", 5).await.unwrap_err();
    assert_eq!(err.to_string(), "Expected string");
}

#[tokio::test]
async fn test_synchronize_untracked_proxy() {
    let server = StructSyncServer::new();
    let connection = connect(&server, "main");
    let contract = playlist_contract();
    let controller = playlist_controller(&contract, Some("x"));
    controller.register(&server).unwrap();

    let proxy = contract
        .make_proxy(&connection.client, ProxyOptions::instance("x").untracked())
        .await
        .unwrap();
    assert!(connection.client.tracked("Playlist::x").is_empty());

    controller.mutate(|v| v.assign("name", "renamed")).await.unwrap();
    assert_eq!(proxy.get("name"), Some(Value::from("playlist_name")));

    proxy.synchronize().await.unwrap();
    assert_eq!(proxy.get("name"), Some(Value::from("renamed")));
    assert!(!connection.session.is_tracking("Playlist::x"));
}

#[tokio::test]
async fn test_dispose_is_idempotent() {
    let p = participants().await;
    let second = p
        .contract
        .make_proxy(&p.connection.client, ProxyOptions::default())
        .await
        .unwrap();
    assert_eq!(p.connection.client.tracked("Playlist").len(), 2);

    p.proxy.dispose();
    p.proxy.dispose();
    assert!(p.proxy.is_disposed());
    assert_eq!(p.connection.client.tracked("Playlist").len(), 1);

    p.controller.mutate(|v| v.assign("name", "after")).await.unwrap();
    assert_eq!(p.proxy.get("name"), Some(Value::from("playlist_name")));
    assert_eq!(second.get("name"), Some(Value::from("after")));

    second.dispose();
    assert!(p.connection.client.tracked("Playlist").is_empty());
}

#[tokio::test]
async fn test_default_proxy_follows_singleton() {
    let p = participants().await;
    let local = p.contract.default_proxy(&p.connection.client);
    assert_eq!(local.get("name"), Some(Value::from("")));

    p.controller.mutate(|v| v.assign("name", "shared")).await.unwrap();
    assert_eq!(local.get("name"), Some(Value::from("shared")));
}

#[tokio::test]
async fn test_stale_proxy_does_not_starve_others() {
    let server = StructSyncServer::new();
    let connection = connect(&server, "main");
    let contract = playlist_contract();
    let controller = playlist_controller(&contract, None);
    controller.register(&server).unwrap();

    // tracked first, still holding the empty default track list
    let stale = contract.default_proxy(&connection.client);
    let fresh = contract
        .make_proxy(&connection.client, ProxyOptions::default())
        .await
        .unwrap();
    let mut errors = connection.session.subscribe_errors();

    controller
        .mutate(|v| v.field("tracks")?.index(2)?.assign("name", "renamed"))
        .await
        .unwrap();

    assert_eq!(names(&fresh.snapshot()), ["track_1", "track_2", "renamed"]);
    assert!(names(&stale.snapshot()).is_empty());

    let errors = drain(&mut errors);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("Invalid mutation target"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

const TOKEN: &str = "35d959e6";

struct RequireToken;

#[async_trait]
impl ServerMiddleware for RequireToken {
    async fn on_incoming(&self, _message: &ControllerMessage, meta: &MetaHandle) -> SyncResult<Option<JsonValue>> {
        match meta.header("token") {
            Some(token) if token == TOKEN => Ok(None),
            _ => Err(SyncError::Rejected("Not authenticated".into())),
        }
    }
}

struct AttachToken;

#[async_trait]
impl ClientMiddleware for AttachToken {
    async fn on_outgoing(&self, message: &ControllerMessage) -> SyncResult<Option<ControllerMessage>> {
        Ok(Some(message.clone().with_header("token", TOKEN)))
    }
}

#[tokio::test]
async fn test_middleware_veto() {
    let p = participants().await;
    p.server.use_middleware(Arc::new(RequireToken));

    let argument = Value::object_from_pairs([("index", 1)]);
    let err = p.proxy.call("removeTrack", argument.clone()).await.unwrap_err();
    assert_eq!(err.to_string(), "Server Error: Not authenticated");
    assert_eq!(names(&p.controller.snapshot().await).len(), 3);

    p.connection.client.use_middleware(Arc::new(AttachToken));
    p.proxy.call("removeTrack", argument).await.unwrap();
    assert_eq!(names(&p.controller.snapshot().await).len(), 2);
}

struct Ping(MetaMessageType);

#[async_trait]
impl ServerMiddleware for Ping {
    async fn on_incoming(&self, message: &ControllerMessage, meta: &MetaHandle) -> SyncResult<Option<JsonValue>> {
        if !self.0.matches(&message.request) {
            return Ok(None);
        }
        let struct_sync::ControllerRequest::Meta { data, .. } = &message.request else {
            return Ok(None);
        };
        let session = meta.session().map(|s| s.name().to_string()).unwrap_or_default();
        let response = self
            .0
            .process(data, |argument| async move {
                let text = argument.as_str().unwrap_or_default();
                Ok(Value::from(format!("pong {text} from {session}")))
            })
            .await?;
        Ok(Some(response))
    }
}

#[tokio::test]
async fn test_meta_message_handled_by_middleware() {
    let p = participants().await;
    let ping = MetaMessageType::new("ping", Type::string(), Type::string());

    let err = p.connection.client.send_meta(&ping, "x").await.unwrap_err();
    assert_eq!(err.to_string(), "Server Error: Meta message of type \"ping\" not accepted");

    p.server.use_middleware(Arc::new(Ping(ping.clone())));
    let response = p.connection.client.send_meta(&ping, "x").await.unwrap();
    assert_eq!(response, Value::from("pong x from main"));
}

#[derive(Default)]
struct CountIncoming(AtomicUsize);

#[async_trait]
impl ClientMiddleware for CountIncoming {
    async fn on_incoming(&self, _message: &ProxyMessage) -> SyncResult<Option<JsonValue>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

#[tokio::test]
async fn test_singleton_updates_are_broadcast_without_tracking() {
    let server = StructSyncServer::new();
    let connection = connect(&server, "main");
    let counter = Arc::new(CountIncoming::default());
    connection.client.use_middleware(counter.clone());

    let contract = playlist_contract();
    let singleton = playlist_controller(&contract, None);
    let instance = playlist_controller(&contract, Some("x"));
    singleton.register(&server).unwrap();
    instance.register(&server).unwrap();

    singleton.mutate(|v| v.assign("name", "a")).await.unwrap();
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);

    instance.mutate(|v| v.assign("name", "a")).await.unwrap();
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);

    contract
        .make_proxy(&connection.client, ProxyOptions::instance("x"))
        .await
        .unwrap();
    instance.mutate(|v| v.assign("name", "b")).await.unwrap();
    assert_eq!(counter.0.load(Ordering::SeqCst), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_session_does_not_block_others() {
    let server = StructSyncServer::new();
    let contract = playlist_contract();
    let controller = playlist_controller(&contract, None);
    controller.register(&server).unwrap();

    let broken = connect(&server, "broken");
    let healthy = connect(&server, "healthy");
    let _stale = contract.make_proxy(&broken.client, ProxyOptions::default()).await.unwrap();
    let proxy = contract.make_proxy(&healthy.client, ProxyOptions::default()).await.unwrap();

    let mut broken_errors = broken.session.subscribe_errors();
    let mut healthy_errors = healthy.session.subscribe_errors();
    broken.client_end.disconnect();

    controller.mutate(|v| v.assign("name", "still_delivered")).await.unwrap();

    assert_eq!(proxy.get("name"), Some(Value::from("still_delivered")));
    let errors = drain(&mut broken_errors);
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].to_string(),
        "Client of session \"broken\" failed to receive update: Bridge disconnected"
    );
    assert!(drain(&mut healthy_errors).is_empty());
}

#[tokio::test]
async fn test_session_default_services() {
    let server = StructSyncServer::new();
    let connection = connect(&server, "main");
    let contract = playlist_contract();

    let unregistered = playlist_controller(&contract, None);
    connection.session.provide_default(&unregistered);
    let proxy = contract
        .make_proxy(&connection.client, ProxyOptions::default().untracked())
        .await
        .unwrap();
    assert_eq!(proxy.get("name"), Some(Value::from("playlist_name")));

    drop(unregistered);
    let err = contract
        .make_proxy(&connection.client, ProxyOptions::default().untracked())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Server Error: No controller named \"Playlist\" found");
}

#[tokio::test]
async fn test_closed_session_stops_answering() {
    let p = participants().await;
    assert_eq!(p.server.sessions().len(), 1);

    p.connection.session.close();
    p.connection.session.close();
    assert!(p.server.sessions().is_empty());

    let err = p.proxy.synchronize().await.unwrap_err();
    assert!(matches!(err, SyncError::Bridge(_)));

    // closed sessions no longer receive updates
    p.controller.mutate(|v| v.assign("name", "unseen")).await.unwrap();
    assert_eq!(p.proxy.get("name"), Some(Value::from("playlist_name")));
}

#[tokio::test]
async fn test_invalid_message_is_rejected() {
    let server = StructSyncServer::new();
    let connection = connect(&server, "main");
    let err = connection
        .session
        .handle_message(json!({"type": "teleport"}))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidMessage(_)));
}
