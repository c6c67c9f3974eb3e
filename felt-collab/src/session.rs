//! Room session lifecycle.
//!
//! Exactly one room session is active per client. Mounting a session
//! sweeps stale documents, derives the stable per-(client, room) player
//! id, bumps the room's session version to fence off stale in-flight
//! connections, opens the transport + intent channel, registers
//! presence, and wires the document's change stream into the debounced
//! reconcile pipeline. The transport event loop tolerates transient
//! drops for a grace period before escalating to reconnect-with-backoff
//! — and reconnects regardless of what the provider's own connected
//! flag claims, because that flag can be stale relative to the intent
//! channel's actual liveness.

use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use felt_core::init::{check_join_gate, plan_local_player_init, JoinBlockReason};
use felt_core::intent::PendingIntentQueue;
use felt_core::presence::{compute_peer_counts, PeerRole};
use felt_core::snapshot::sanitize;

use crate::actions::GameActions;
use crate::doc::{DocError, DocRegistry, SharedDocument};
use crate::identity::{IdentityStore, TokenResolver};
use crate::mutations;
use crate::reconcile::{Debouncer, Reconciler, JOIN_DEBOUNCE, RECONCILE_DEBOUNCE};
use crate::state::{BlockedReason, ClientState, SessionKey};
use crate::store::GameStore;
use crate::transport::{
    is_auth_rejection, ConnectParams, ConnectionState, IntentChannel, IntentChannelFactory,
    IntentClose, IntentHandlers, PresenceChannel, TransportEvent, TransportProvider,
};

/// How long a dropped connection may stay down before we escalate to a
/// reconnect cycle. Transient blips are common and invisible.
pub const RECONNECT_GRACE: Duration = Duration::from_secs(2);
pub const BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const BACKOFF_MAX: Duration = Duration::from_secs(15);

pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors raised while mounting a session.
#[derive(Debug)]
pub enum SessionError {
    Doc(DocError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Doc(e) => write!(f, "document error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<DocError> for SessionError {
    fn from(e: DocError) -> Self {
        Self::Doc(e)
    }
}

/// Result of a join attempt against the shared document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// The plan was applied (player created or patched).
    Applied,
    /// Nothing to do — the room already reflected the join.
    Noop,
    /// The join gate refused; zero writes were performed.
    Blocked(JoinBlockReason),
}

/// Run the join gate and planner against the document and apply the
/// result. The plan lands in one transaction; host healing runs in a
/// second, separate one.
pub fn ensure_local_player_initialized(
    store: &dyn GameStore,
    player_id: &str,
    desired_name: &str,
    default_name: &str,
) -> InitOutcome {
    let (snapshot, _) = sanitize(&store.raw_snapshot());
    if let Some(reason) = check_join_gate(&snapshot, player_id) {
        return InitOutcome::Blocked(reason);
    }
    let outcome = match plan_local_player_init(&snapshot, player_id, desired_name, default_name) {
        Some(plan) => {
            store.transact(&mut |txn| mutations::apply_init_plan(txn, &plan));
            InitOutcome::Applied
        }
        None => InitOutcome::Noop,
    };
    store.transact(&mut |txn| mutations::heal_host(txn));
    outcome
}

/// What a consumer needs to drive a mounted session.
pub struct SessionHandle {
    pub room_id: String,
    pub player_id: String,
    pub actions: Arc<GameActions>,
    epoch: u64,
}

/// Configuration for one mount.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub room_id: String,
    pub desired_name: String,
    pub default_name: String,
    pub role: PeerRole,
}

struct ActiveSession {
    room_id: String,
    epoch: u64,
    intent_channel: Arc<dyn IntentChannel>,
    reconcile_debounce: Arc<Debouncer>,
    join_debounce: Arc<Debouncer>,
    _doc_sub: yrs::Subscription,
    event_task: JoinHandle<()>,
    presence_task: JoinHandle<()>,
}

/// Owns the one active room session and every resource attached to it.
pub struct SessionResourceManager {
    registry: Arc<DocRegistry>,
    identity: Arc<IdentityStore>,
    provider: Arc<dyn TransportProvider>,
    presence: Arc<dyn PresenceChannel>,
    intents: Arc<dyn IntentChannelFactory>,
    resolver: Arc<dyn TokenResolver>,
    state: Arc<ClientState>,
    active: Mutex<Option<ActiveSession>>,
    epoch: AtomicU64,
}

impl SessionResourceManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<DocRegistry>,
        identity: Arc<IdentityStore>,
        provider: Arc<dyn TransportProvider>,
        presence: Arc<dyn PresenceChannel>,
        intents: Arc<dyn IntentChannelFactory>,
        resolver: Arc<dyn TokenResolver>,
        state: Arc<ClientState>,
    ) -> Self {
        Self {
            registry,
            identity,
            provider,
            presence,
            intents,
            resolver,
            state,
            active: Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> &Arc<ClientState> {
        &self.state
    }

    pub fn registry(&self) -> &Arc<DocRegistry> {
        &self.registry
    }

    /// Mount a session for `config.room_id`. Must run inside a tokio
    /// runtime. Any previous session is torn down first.
    pub fn mount(&self, config: SessionConfig) -> Result<SessionHandle, SessionError> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.teardown_active();
        self.registry.sweep_stale(&config.room_id);

        let player_id = self.identity.player_id_for(&config.room_id);
        self.state.reset_session(SessionKey {
            room_id: config.room_id.clone(),
            player_id: player_id.clone(),
        });
        let state_epoch = self.state.epoch();

        let doc = self.registry.acquire(&config.room_id);
        let session_version = self.identity.bump_session_version(&config.room_id);

        // Share-link tokens win over stored ones and are persisted; a
        // fresh invite also clears a stale "room unavailable" verdict.
        let mut tokens = self.identity.tokens_for(&config.room_id);
        if let Some(key) = self.resolver.resolve_join_token() {
            tokens.access_key = Some(key);
            self.identity.store_tokens(&config.room_id, tokens.clone());
        }
        if let Some(invite) = self.resolver.resolve_invite_token() {
            tokens.invite = Some(invite);
            self.identity.store_tokens(&config.room_id, tokens.clone());
            self.identity.clear_room_unavailable(&config.room_id);
        }
        if self.identity.is_room_unavailable(&config.room_id)
            && !self.identity.is_host_pending(&config.room_id)
        {
            // Known-dead room; surface it immediately but still try to
            // connect. A successful sync clears the verdict.
            self.state
                .set_blocked(Some(BlockedReason::RoomUnavailable));
        }

        let pending = Arc::new(Mutex::new(PendingIntentQueue::new()));
        let actions = Arc::new(GameActions::new(
            &config.room_id,
            &player_id,
            doc.clone() as Arc<dyn GameStore>,
            pending.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(&config.room_id, pending));
        let reconcile_debounce = Arc::new(Debouncer::new(RECONCILE_DEBOUNCE));
        let join_debounce = Arc::new(Debouncer::new(JOIN_DEBOUNCE));

        // Remote intents: permission-check against the sender, then let
        // the debounced reconcile surface the optimistic echo.
        let intent_channel: Arc<dyn IntentChannel> = {
            let actions = actions.clone();
            let trigger = make_reconcile_trigger(
                reconcile_debounce.clone(),
                reconciler.clone(),
                doc.clone(),
                self.state.clone(),
                state_epoch,
            );
            let state = self.state.clone();
            let identity = self.identity.clone();
            let room_id = config.room_id.clone();
            Arc::from(self.intents.create(IntentHandlers {
                on_message: Box::new(move |envelope| {
                    if actions.accept_remote(&envelope).is_applied() {
                        trigger();
                    }
                }),
                on_close: Box::new(move |close: IntentClose| {
                    if is_auth_rejection(close.code) {
                        apply_auth_rejection(&identity, &state, &room_id, close.code);
                    } else {
                        log::debug!(
                            "intent channel closed ({}): {}",
                            close.code,
                            close.reason
                        );
                    }
                }),
            }))
        };
        {
            let channel = intent_channel.clone();
            actions.set_outbound(Some(Box::new(move |envelope| {
                if let Err(e) = channel.send_intent(envelope) {
                    log::debug!("intent broadcast failed: {e}");
                }
            })));
        }

        // Document changes → debounced reconcile → published snapshot.
        let doc_sub = {
            let trigger = make_reconcile_trigger(
                reconcile_debounce.clone(),
                reconciler.clone(),
                doc.clone(),
                self.state.clone(),
                state_epoch,
            );
            doc.on_update(move |_update| trigger())?
        };

        let params = ConnectParams {
            room_id: config.room_id.clone(),
            user_id: player_id.clone(),
            client_key: Uuid::new_v4().simple().to_string(),
            session_version,
            client_version: CLIENT_VERSION.to_string(),
            role: config.role,
            access_key: tokens.access_key.clone(),
        };
        let events = self.provider.connect(params.clone());
        self.state.set_connection(ConnectionState::Connecting);

        self.presence.set_local_field(
            "client",
            json!({
                "id": player_id,
                "role": config.role,
                "name": config.desired_name,
            }),
        );
        let presence_task = {
            let presence = self.presence.clone();
            let state = self.state.clone();
            tokio::spawn(async move {
                let mut changes = presence.subscribe();
                state.set_peer_counts(compute_peer_counts(&presence.states()));
                loop {
                    match changes.recv().await {
                        // A lagged receiver just recomputes from scratch.
                        Ok(()) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                            state.set_peer_counts(compute_peer_counts(&presence.states()));
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        let event_task = {
            let ctx = EventLoopCtx {
                provider: self.provider.clone(),
                identity: self.identity.clone(),
                state: self.state.clone(),
                doc: doc.clone(),
                reconciler: reconciler.clone(),
                join_debounce: join_debounce.clone(),
                reconcile_debounce: reconcile_debounce.clone(),
                config: config.clone(),
                player_id: player_id.clone(),
                state_epoch,
            };
            tokio::spawn(run_event_loop(ctx, events, params))
        };

        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        *active = Some(ActiveSession {
            room_id: config.room_id.clone(),
            epoch,
            intent_channel,
            reconcile_debounce,
            join_debounce,
            _doc_sub: doc_sub,
            event_task,
            presence_task,
        });

        Ok(SessionHandle {
            room_id: config.room_id,
            player_id,
            actions,
            epoch,
        })
    }

    /// Unmount the session behind `handle`.
    ///
    /// If a faster remount already produced a newer session, this is a
    /// no-op: the stale handle must not clobber the newer provider and
    /// presence registration.
    pub fn unmount(&self, handle: &SessionHandle) {
        {
            let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            match active.as_ref() {
                Some(session) if session.epoch == handle.epoch => {}
                _ => {
                    log::debug!("skipping unmount of superseded session (epoch {})", handle.epoch);
                    return;
                }
            }
        }
        self.teardown_active();
    }

    fn teardown_active(&self) {
        let session = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.take()
        };
        let Some(session) = session else { return };

        session.reconcile_debounce.cancel();
        session.join_debounce.cancel();
        session.event_task.abort();
        session.presence_task.abort();
        session.intent_channel.close();
        self.presence.clear_local();
        self.provider.disconnect();
        self.provider.destroy();
        self.registry.release(&session.room_id);
        self.state.set_connection(ConnectionState::Disconnected);
    }
}

/// Build the closure that schedules one debounced reconcile+publish.
fn make_reconcile_trigger(
    debounce: Arc<Debouncer>,
    reconciler: Arc<Reconciler>,
    doc: Arc<SharedDocument>,
    state: Arc<ClientState>,
    state_epoch: u64,
) -> impl Fn() + Send + Sync + Clone {
    move || {
        let reconciler = reconciler.clone();
        let doc = doc.clone();
        let state = state.clone();
        debounce.trigger(move || {
            let snapshot = reconciler.reconcile(&doc.raw_snapshot());
            state.publish_snapshot(state_epoch, snapshot);
        });
    }
}

fn apply_auth_rejection(
    identity: &IdentityStore,
    state: &ClientState,
    room_id: &str,
    code: u16,
) {
    if identity.tokens_for(room_id).is_empty() {
        // Never had tokens: the room may simply need a fresh invite.
        log::info!("room {room_id} rejected us ({code}); invite required");
        state.set_blocked(Some(BlockedReason::InviteRequired));
    } else {
        // We held valid tokens and got rejected anyway: the room is gone.
        log::info!("room {room_id} rejected our tokens ({code}); marking unavailable");
        identity.mark_room_unavailable(room_id);
        state.set_blocked(Some(BlockedReason::RoomUnavailable));
    }
}

struct EventLoopCtx {
    provider: Arc<dyn TransportProvider>,
    identity: Arc<IdentityStore>,
    state: Arc<ClientState>,
    doc: Arc<SharedDocument>,
    reconciler: Arc<Reconciler>,
    join_debounce: Arc<Debouncer>,
    reconcile_debounce: Arc<Debouncer>,
    config: SessionConfig,
    player_id: String,
    state_epoch: u64,
}

async fn run_event_loop(
    ctx: EventLoopCtx,
    mut events: mpsc::Receiver<TransportEvent>,
    mut params: ConnectParams,
) {
    let mut backoff = BACKOFF_BASE;
    loop {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Status(ConnectionState::Connected) => {
                    ctx.state.set_connection(ConnectionState::Connected);
                    backoff = BACKOFF_BASE;
                }
                TransportEvent::Status(ConnectionState::Connecting) => {
                    ctx.state.set_connection(ConnectionState::Connecting);
                }
                TransportEvent::Status(
                    ConnectionState::Disconnected | ConnectionState::Reconnecting,
                ) => {
                    if !wait_for_recovery(&mut events, RECONNECT_GRACE).await {
                        break;
                    }
                    ctx.state.set_connection(ConnectionState::Connected);
                }
                TransportEvent::Synced(true) => {
                    schedule_join(&ctx);
                }
                TransportEvent::Synced(false) => {}
                TransportEvent::Closed { code, reason } if is_auth_rejection(code) => {
                    log::info!(
                        "transport closed by server: {code} {reason}"
                    );
                    apply_auth_rejection(&ctx.identity, &ctx.state, &ctx.config.room_id, code);
                    ctx.state.set_connection(ConnectionState::Disconnected);
                    return;
                }
                TransportEvent::Closed { code, reason } => {
                    log::debug!("transport closed ({code}): {reason}");
                    if !wait_for_recovery(&mut events, RECONNECT_GRACE).await {
                        break;
                    }
                    ctx.state.set_connection(ConnectionState::Connected);
                }
            }
        }

        // Grace expired (or the event stream died): reconnect with
        // backoff. The provider's own connected flag is ignored here;
        // it can lag behind reality.
        ctx.state.set_connection(ConnectionState::Reconnecting);
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(BACKOFF_MAX);
        params.session_version = ctx.identity.bump_session_version(&ctx.config.room_id);
        log::info!(
            "reconnecting to room {} (session version {})",
            ctx.config.room_id,
            params.session_version
        );
        events = ctx.provider.connect(params.clone());
    }
}

/// Debounced post-`synced` join: gate, plan, apply, then force a full
/// reconcile pass so the UI reflects the join immediately.
fn schedule_join(ctx: &EventLoopCtx) {
    let doc = ctx.doc.clone();
    let state = ctx.state.clone();
    let reconciler = ctx.reconciler.clone();
    let reconcile_debounce = ctx.reconcile_debounce.clone();
    let player_id = ctx.player_id.clone();
    let desired = ctx.config.desired_name.clone();
    let default = ctx.config.default_name.clone();
    let state_epoch = ctx.state_epoch;
    let identity = ctx.identity.clone();
    let room_id = ctx.config.room_id.clone();

    ctx.join_debounce.trigger(move || {
        let outcome =
            ensure_local_player_initialized(doc.as_ref(), &player_id, &desired, &default);
        match outcome {
            InitOutcome::Blocked(reason) => {
                log::info!("join blocked: {reason}");
                state.set_blocked(Some(BlockedReason::Gate(reason)));
            }
            InitOutcome::Applied | InitOutcome::Noop => {
                // We made it in: any stale "room unavailable" verdict is wrong.
                identity.clear_room_unavailable(&room_id);
                state.set_blocked(None);
            }
        }
        let reconciler = reconciler.clone();
        let doc = doc.clone();
        let state = state.clone();
        reconcile_debounce.trigger(move || {
            let snapshot = reconciler.reconcile(&doc.raw_snapshot());
            state.publish_snapshot(state_epoch, snapshot);
        });
    });
}

async fn wait_for_recovery(
    events: &mut mpsc::Receiver<TransportEvent>,
    grace: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(TransportEvent::Status(ConnectionState::Connected))) => return true,
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NullTokenResolver;
    use crate::identity::RoomTokens;
    use crate::transport::{
        InMemoryPresence, InMemoryProvider, LoopbackIntentFactory, CLOSE_AUTH_REJECTED,
    };
    use felt_core::model::ZoneKind;
    use felt_core::presence::{PresenceClient, PresenceState};
    use tempfile::tempdir;

    struct Fixture {
        manager: SessionResourceManager,
        provider: Arc<InMemoryProvider>,
        presence: Arc<InMemoryPresence>,
        identity: Arc<IdentityStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let identity =
            Arc::new(IdentityStore::open(dir.path().join("identity.json")).unwrap());
        let provider = InMemoryProvider::new();
        let presence = InMemoryPresence::new("local-conn");
        let manager = SessionResourceManager::new(
            Arc::new(DocRegistry::new()),
            identity.clone(),
            provider.clone(),
            presence.clone(),
            LoopbackIntentFactory::new(),
            Arc::new(NullTokenResolver),
            Arc::new(ClientState::init()),
        );
        Fixture {
            manager,
            provider,
            presence,
            identity,
            _dir: dir,
        }
    }

    fn config(room: &str) -> SessionConfig {
        SessionConfig {
            room_id: room.to_string(),
            desired_name: "Hans".to_string(),
            default_name: "Guest".to_string(),
            role: PeerRole::Player,
        }
    }

    async fn settle() {
        tokio::time::sleep(JOIN_DEBOUNCE + RECONCILE_DEBOUNCE + Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_mount_connects_with_session_version() {
        let fx = fixture();
        let handle = fx.manager.mount(config("room-1")).unwrap();

        let params = fx.provider.last_params().unwrap();
        assert_eq!(params.room_id, "room-1");
        assert_eq!(params.session_version, 1);
        assert_eq!(params.user_id, handle.player_id);

        // Remount bumps the fence.
        let handle2 = fx.manager.mount(config("room-1")).unwrap();
        assert_eq!(fx.provider.last_params().unwrap().session_version, 2);
        assert_eq!(handle2.player_id, handle.player_id);
        fx.manager.unmount(&handle2);
    }

    #[tokio::test]
    async fn test_synced_initializes_local_player() {
        let fx = fixture();
        let handle = fx.manager.mount(config("room-1")).unwrap();

        fx.provider
            .emit(TransportEvent::Status(ConnectionState::Connected));
        fx.provider.emit(TransportEvent::Synced(true));
        settle().await;

        let snapshot = fx.manager.state().snapshot();
        let player = snapshot.players.get(&handle.player_id).unwrap();
        assert_eq!(player.name, "Hans");
        assert_eq!(
            snapshot
                .zones
                .values()
                .filter(|z| z.owner_id == handle.player_id)
                .count(),
            6
        );
        assert_eq!(
            snapshot.meta.host_id.as_deref(),
            Some(handle.player_id.as_str())
        );
        fx.manager.unmount(&handle);
    }

    #[tokio::test]
    async fn test_locked_room_blocks_join_with_zero_writes() {
        let fx = fixture();
        let handle = fx.manager.mount(config("room-1")).unwrap();
        // Lock the shared doc directly, as if a host's write had
        // already replicated in.
        let doc = fx.manager.registry().acquire("room-1");
        doc.transact(&mut |txn| {
            mutations::patch_room_meta(txn, Some(true), Some(Some("someone".into())));
        });

        fx.provider
            .emit(TransportEvent::Status(ConnectionState::Connected));
        fx.provider.emit(TransportEvent::Synced(true));
        settle().await;

        assert_eq!(
            fx.manager.state().blocked(),
            Some(BlockedReason::Gate(JoinBlockReason::Locked))
        );
        let snapshot = fx.manager.state().snapshot();
        assert!(!snapshot.players.contains_key(&handle.player_id));
        fx.manager.unmount(&handle);
    }

    #[tokio::test]
    async fn test_auth_close_without_tokens_means_invite_required() {
        let fx = fixture();
        let handle = fx.manager.mount(config("room-1")).unwrap();

        fx.provider.emit(TransportEvent::Closed {
            code: CLOSE_AUTH_REJECTED,
            reason: "no access".into(),
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            fx.manager.state().blocked(),
            Some(BlockedReason::InviteRequired)
        );
        assert!(!fx.identity.is_room_unavailable("room-1"));
        fx.manager.unmount(&handle);
    }

    #[tokio::test]
    async fn test_auth_close_with_tokens_marks_room_unavailable() {
        let fx = fixture();
        fx.identity.store_tokens(
            "room-1",
            RoomTokens {
                access_key: Some("had-a-key".into()),
                invite: None,
            },
        );
        let handle = fx.manager.mount(config("room-1")).unwrap();

        fx.provider.emit(TransportEvent::Closed {
            code: CLOSE_AUTH_REJECTED,
            reason: "room reset".into(),
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            fx.manager.state().blocked(),
            Some(BlockedReason::RoomUnavailable)
        );
        assert!(fx.identity.is_room_unavailable("room-1"));
        fx.manager.unmount(&handle);
    }

    #[tokio::test]
    async fn test_transient_drop_recovers_within_grace() {
        let fx = fixture();
        let handle = fx.manager.mount(config("room-1")).unwrap();
        fx.provider
            .emit(TransportEvent::Status(ConnectionState::Connected));
        tokio::time::sleep(Duration::from_millis(20)).await;

        fx.provider
            .emit(TransportEvent::Status(ConnectionState::Disconnected));
        tokio::time::sleep(Duration::from_millis(50)).await;
        fx.provider
            .emit(TransportEvent::Status(ConnectionState::Connected));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Recovered inside the grace period: no second connect.
        assert_eq!(fx.provider.connect_count(), 1);
        assert_eq!(
            fx.manager.state().connection(),
            Some(ConnectionState::Connected)
        );
        fx.manager.unmount(&handle);
    }

    #[tokio::test]
    async fn test_sustained_drop_reconnects_with_new_session_version() {
        let fx = fixture();
        let handle = fx.manager.mount(config("room-1")).unwrap();
        fx.provider
            .emit(TransportEvent::Status(ConnectionState::Connected));
        tokio::time::sleep(Duration::from_millis(20)).await;

        fx.provider
            .emit(TransportEvent::Status(ConnectionState::Disconnected));
        // Grace (2s) + backoff (500ms) with margin.
        tokio::time::sleep(RECONNECT_GRACE + BACKOFF_BASE + Duration::from_millis(300)).await;

        assert!(fx.provider.connect_count() >= 2);
        assert!(fx.provider.last_params().unwrap().session_version >= 2);
        fx.manager.unmount(&handle);
    }

    #[tokio::test]
    async fn test_stale_unmount_keeps_newer_session() {
        let fx = fixture();
        let old = fx.manager.mount(config("room-1")).unwrap();
        let new = fx.manager.mount(config("room-1")).unwrap();

        // The stale handle must not tear down the newer session.
        fx.manager.unmount(&old);
        let connects_before = fx.provider.connect_count();
        fx.provider
            .emit(TransportEvent::Status(ConnectionState::Connected));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            fx.manager.state().connection(),
            Some(ConnectionState::Connected)
        );
        assert_eq!(fx.provider.connect_count(), connects_before);

        fx.manager.unmount(&new);
        assert_eq!(
            fx.manager.state().connection(),
            Some(ConnectionState::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_presence_counts_flow_into_state() {
        let fx = fixture();
        let handle = fx.manager.mount(config("room-1")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        fx.presence.set_remote(
            "peer-conn",
            PresenceState {
                client: Some(PresenceClient {
                    id: Some("u2".into()),
                    role: Some(PeerRole::Spectator),
                    name: None,
                }),
            },
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let counts = fx.manager.state().peer_counts();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.spectators, 1);
        fx.manager.unmount(&handle);
    }

    #[tokio::test]
    async fn test_rejoin_same_room_is_idempotent() {
        let fx = fixture();
        let handle = fx.manager.mount(config("room-1")).unwrap();
        fx.provider
            .emit(TransportEvent::Status(ConnectionState::Connected));
        fx.provider.emit(TransportEvent::Synced(true));
        settle().await;

        let doc = fx.manager.registry().acquire("room-1");
        let outcome = ensure_local_player_initialized(
            doc.as_ref(),
            &handle.player_id,
            "Hans",
            "Guest",
        );
        assert_eq!(outcome, InitOutcome::Noop);

        // Zones stayed unique per kind.
        let (snapshot, _) = sanitize(&doc.raw_snapshot());
        for kind in ZoneKind::CANONICAL {
            assert_eq!(
                snapshot
                    .zones
                    .values()
                    .filter(|z| z.owner_id == handle.player_id && z.kind == kind)
                    .count(),
                1
            );
        }
        fx.manager.unmount(&handle);
    }
}
