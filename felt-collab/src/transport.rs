//! Collaborator contracts for the network edge.
//!
//! The room server, presence channel, and low-latency intent channel
//! are external services; this module defines the traits the session
//! layer drives them through, the bincode wire envelope for intents,
//! and an in-memory implementation used by tests and solo mode.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

use felt_core::intent::Intent;
use felt_core::presence::{PeerRole, PresenceState};

/// Wire protocol version for intent envelopes. Unknown versions are
/// dropped with a warning, never an error.
pub const INTENT_PROTOCOL_VERSION: u16 = 1;

/// Close code the room server sends for an authentication rejection.
pub const CLOSE_AUTH_REJECTED: u16 = 4401;
/// Close code for "authenticated but not allowed into this room".
pub const CLOSE_FORBIDDEN: u16 = 4403;

pub fn is_auth_rejection(code: u16) -> bool {
    code == CLOSE_AUTH_REJECTED || code == CLOSE_FORBIDDEN
}

/// Transport errors.
#[derive(Debug, Clone)]
pub enum TransportError {
    Closed,
    Encode(String),
    Decode(String),
    UnsupportedVersion(u16),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "channel closed"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported intent protocol version {v}"),
        }
    }
}

impl std::error::Error for TransportError {}

// ─── Provider ───────────────────────────────────────────────────────

/// Connection lifecycle state, as the session layer tracks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Parameters the provider sends with every connection attempt.
///
/// `session_version` increases monotonically per room so the server
/// (and our own event loop) can reject stale in-flight connections
/// from a previous mount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectParams {
    pub room_id: String,
    pub user_id: String,
    pub client_key: String,
    pub session_version: u64,
    pub client_version: String,
    pub role: PeerRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
}

/// Events the replicated-document transport reports.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Status(ConnectionState),
    /// Initial document sync completed (or was lost again).
    Synced(bool),
    /// The server closed the connection.
    Closed { code: u16, reason: String },
}

/// The replicated-document transport (room server connection).
///
/// `is_connected` reflects the provider's *own* notion of liveness,
/// which can be stale relative to the intent channel — reconnect logic
/// must not trust it.
pub trait TransportProvider: Send + Sync {
    fn connect(&self, params: ConnectParams) -> mpsc::Receiver<TransportEvent>;
    fn disconnect(&self);
    fn destroy(&self);
    fn is_connected(&self) -> bool;
}

// ─── Presence channel ───────────────────────────────────────────────

/// Presence/awareness channel: one raw state per connection.
pub trait PresenceChannel: Send + Sync {
    fn set_local_field(&self, key: &str, value: Value);
    fn clear_local(&self);
    fn states(&self) -> BTreeMap<String, PresenceState>;
    /// Notified (without payload) whenever any state changes.
    fn subscribe(&self) -> broadcast::Receiver<()>;
}

// ─── Intent channel ─────────────────────────────────────────────────

/// Close info handed to the intent channel's close handler; used to
/// tell transient drops from auth rejections.
#[derive(Debug, Clone)]
pub struct IntentClose {
    pub code: u16,
    pub reason: String,
}

/// A mutation intent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentEnvelope {
    pub protocol_version: u16,
    pub room_id: String,
    pub sender: String,
    /// Sender-local sequence number, for log correlation.
    pub seq: u64,
    pub intent: Intent,
}

impl IntentEnvelope {
    pub fn new(room_id: &str, sender: &str, seq: u64, intent: Intent) -> Self {
        Self {
            protocol_version: INTENT_PROTOCOL_VERSION,
            room_id: room_id.to_string(),
            sender: sender.to_string(),
            seq,
            intent,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TransportError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        let (envelope, _): (Self, _) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| TransportError::Decode(e.to_string()))?;
        if envelope.protocol_version != INTENT_PROTOCOL_VERSION {
            return Err(TransportError::UnsupportedVersion(envelope.protocol_version));
        }
        Ok(envelope)
    }
}

/// Handlers the session installs when opening the intent channel.
pub struct IntentHandlers {
    pub on_message: Box<dyn Fn(IntentEnvelope) + Send + Sync>,
    pub on_close: Box<dyn Fn(IntentClose) + Send + Sync>,
}

pub trait IntentChannel: Send + Sync {
    fn send_intent(&self, envelope: &IntentEnvelope) -> Result<(), TransportError>;
    fn close(&self);
}

pub trait IntentChannelFactory: Send + Sync {
    fn create(&self, handlers: IntentHandlers) -> Box<dyn IntentChannel>;
}

// ─── In-memory implementations ──────────────────────────────────────

/// Scriptable in-memory transport for tests and offline runs. Events
/// pushed via [`InMemoryProvider::emit`] arrive on the receiver that
/// `connect` returned.
pub struct InMemoryProvider {
    inner: Mutex<InMemoryProviderInner>,
}

struct InMemoryProviderInner {
    event_tx: Option<mpsc::Sender<TransportEvent>>,
    connected: bool,
    connects: u64,
    last_params: Option<ConnectParams>,
}

impl InMemoryProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(InMemoryProviderInner {
                event_tx: None,
                connected: false,
                connects: 0,
                last_params: None,
            }),
        })
    }

    /// Push an event to the currently-connected receiver.
    pub fn emit(&self, event: TransportEvent) {
        let tx = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if let TransportEvent::Status(state) = &event {
                inner.connected = *state == ConnectionState::Connected;
            }
            inner.event_tx.clone()
        };
        if let Some(tx) = tx {
            let _ = tx.try_send(event);
        }
    }

    /// How many times `connect` has been called.
    pub fn connect_count(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).connects
    }

    /// Parameters of the most recent connect.
    pub fn last_params(&self) -> Option<ConnectParams> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_params
            .clone()
    }
}

impl TransportProvider for InMemoryProvider {
    fn connect(&self, params: ConnectParams) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(64);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.event_tx = Some(tx);
        inner.connects += 1;
        inner.last_params = Some(params);
        rx
    }

    fn disconnect(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.connected = false;
        inner.event_tx = None;
    }

    fn destroy(&self) {
        self.disconnect();
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).connected
    }
}

/// In-memory presence channel shared by every "connection" in a test.
pub struct InMemoryPresence {
    states: Mutex<BTreeMap<String, PresenceState>>,
    local_key: String,
    changed: broadcast::Sender<()>,
}

impl InMemoryPresence {
    pub fn new(local_key: &str) -> Arc<Self> {
        let (changed, _) = broadcast::channel(16);
        Arc::new(Self {
            states: Mutex::new(BTreeMap::new()),
            local_key: local_key.to_string(),
            changed,
        })
    }

    /// Inject a remote connection's state.
    pub fn set_remote(&self, connection_key: &str, state: PresenceState) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(connection_key.to_string(), state);
        let _ = self.changed.send(());
    }
}

impl PresenceChannel for InMemoryPresence {
    fn set_local_field(&self, key: &str, value: Value) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let state = states.entry(self.local_key.clone()).or_default();
        if key == "client" {
            state.client = serde_json::from_value(value).ok();
        }
        drop(states);
        let _ = self.changed.send(());
    }

    fn clear_local(&self) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.local_key);
        let _ = self.changed.send(());
    }

    fn states(&self) -> BTreeMap<String, PresenceState> {
        self.states.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changed.subscribe()
    }
}

/// Loopback intent channel: everything sent is also delivered to every
/// other channel created from the same factory (but not the sender).
pub struct LoopbackIntentFactory {
    peers: Arc<Mutex<Vec<LoopbackPeer>>>,
}

struct LoopbackPeer {
    id: usize,
    handlers: Arc<IntentHandlers>,
}

impl LoopbackIntentFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peers: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Close every open channel with the given code, as a misbehaving
    /// or rejecting server would.
    pub fn close_all(&self, code: u16, reason: &str) {
        let peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        for peer in peers.iter() {
            (peer.handlers.on_close)(IntentClose {
                code,
                reason: reason.to_string(),
            });
        }
    }
}

impl IntentChannelFactory for LoopbackIntentFactory {
    fn create(&self, handlers: IntentHandlers) -> Box<dyn IntentChannel> {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        let id = peers.len();
        peers.push(LoopbackPeer {
            id,
            handlers: Arc::new(handlers),
        });
        Box::new(LoopbackIntentChannel {
            id,
            peers: self.peers.clone(),
        })
    }
}

struct LoopbackIntentChannel {
    id: usize,
    peers: Arc<Mutex<Vec<LoopbackPeer>>>,
}

impl IntentChannel for LoopbackIntentChannel {
    fn send_intent(&self, envelope: &IntentEnvelope) -> Result<(), TransportError> {
        // Round-trip through the wire format so tests exercise it.
        let bytes = envelope.encode()?;
        let delivered = IntentEnvelope::decode(&bytes)?;
        let peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        for peer in peers.iter().filter(|p| p.id != self.id) {
            (peer.handlers.on_message)(delivered.clone());
        }
        Ok(())
    }

    fn close(&self) {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        peers.retain(|p| p.id != self.id);
    }
}
