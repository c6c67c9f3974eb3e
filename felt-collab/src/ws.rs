//! Default WebSocket transport.
//!
//! Production rooms speak a small bincode frame protocol over a
//! WebSocket: a state-vector handshake (`Step1`/`Step2`) followed by
//! incremental document updates. The provider owns background
//! reader/writer tasks; outgoing traffic goes through an mpsc queue so
//! senders never block on the socket. Server close codes are forwarded
//! verbatim so the session layer can tell an auth rejection from a
//! transient drop.

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::doc::SharedDocument;
use crate::transport::{
    ConnectParams, ConnectionState, IntentChannel, IntentChannelFactory, IntentClose,
    IntentEnvelope, IntentHandlers, TransportError, TransportEvent, TransportProvider,
};

/// Document sync frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum SyncFrame {
    /// Our state vector; the server answers with `Step2`.
    Step1 { state_vector: Vec<u8> },
    /// Everything we were missing.
    Step2 { update: Vec<u8> },
    /// An incremental update, either direction.
    Update { update: Vec<u8> },
}

impl SyncFrame {
    fn encode(&self) -> Result<Vec<u8>, TransportError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TransportError::Encode(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(frame)
    }
}

fn connect_url(base: &str, params: &ConnectParams) -> String {
    let role = match params.role {
        felt_core::presence::PeerRole::Player => "player",
        felt_core::presence::PeerRole::Spectator => "spectator",
    };
    let mut url = format!(
        "{base}/{room}?user={user}&client={client}&session={session}&v={version}&role={role}",
        room = params.room_id,
        user = params.user_id,
        client = params.client_key,
        session = params.session_version,
        version = params.client_version,
    );
    if let Some(key) = &params.access_key {
        url.push_str("&key=");
        url.push_str(key);
    }
    url
}

/// WebSocket transport for the replicated document.
pub struct WsTransportProvider {
    server_url: String,
    doc: Arc<SharedDocument>,
    inner: Arc<Mutex<WsInner>>,
}

#[derive(Default)]
struct WsInner {
    outgoing: Option<mpsc::Sender<Vec<u8>>>,
    connected: bool,
    /// Bumped per connect; stale socket tasks check it before touching
    /// shared state.
    generation: u64,
}

impl WsTransportProvider {
    pub fn new(server_url: impl Into<String>, doc: Arc<SharedDocument>) -> Self {
        Self {
            server_url: server_url.into(),
            doc,
            inner: Arc::new(Mutex::new(WsInner::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WsInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TransportProvider for WsTransportProvider {
    fn connect(&self, params: ConnectParams) -> mpsc::Receiver<TransportEvent> {
        let (event_tx, event_rx) = mpsc::channel(64);
        let url = connect_url(&self.server_url, &params);
        let doc = self.doc.clone();
        let shared = self.inner.clone();
        let generation = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.generation
        };

        tokio::spawn(async move {
            let _ = event_tx
                .send(TransportEvent::Status(ConnectionState::Connecting))
                .await;

            let stream = match tokio_tungstenite::connect_async(&url).await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    log::debug!("websocket connect failed: {e}");
                    let _ = event_tx
                        .send(TransportEvent::Status(ConnectionState::Disconnected))
                        .await;
                    return;
                }
            };
            let (mut writer, mut reader) = stream.split();

            // Writer task: drain the outgoing queue onto the socket.
            let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
            {
                let mut inner = shared.lock().unwrap_or_else(|e| e.into_inner());
                if inner.generation != generation {
                    return; // a newer connect superseded us mid-handshake
                }
                inner.outgoing = Some(out_tx.clone());
                inner.connected = true;
            }
            tokio::spawn(async move {
                while let Some(bytes) = out_rx.recv().await {
                    if writer.send(Message::Binary(bytes.into())).await.is_err() {
                        break;
                    }
                }
            });

            // Handshake: our state vector, answered by a Step2 diff.
            let step1 = SyncFrame::Step1 {
                state_vector: doc.state_vector(),
            };
            if let Ok(bytes) = step1.encode() {
                let _ = out_tx.send(bytes).await;
            }
            let _ = event_tx
                .send(TransportEvent::Status(ConnectionState::Connected))
                .await;

            // Local edits flow out for as long as this socket lives.
            let doc_sub = {
                let out_tx = out_tx.clone();
                doc.on_update(move |update| {
                    let frame = SyncFrame::Update {
                        update: update.to_vec(),
                    };
                    if let Ok(bytes) = frame.encode() {
                        let _ = out_tx.try_send(bytes);
                    }
                })
            };

            while let Some(message) = reader.next().await {
                match message {
                    Ok(Message::Binary(bytes)) => match SyncFrame::decode(&bytes) {
                        Ok(SyncFrame::Step2 { update }) => {
                            if let Err(e) = doc.apply_update(&update) {
                                log::warn!("bad sync response: {e}");
                                continue;
                            }
                            let _ = event_tx.send(TransportEvent::Synced(true)).await;
                        }
                        Ok(SyncFrame::Update { update }) => {
                            if let Err(e) = doc.apply_update(&update) {
                                log::warn!("bad remote update: {e}");
                            }
                        }
                        Ok(SyncFrame::Step1 { state_vector }) => {
                            // Peer-initiated handshake (server restart).
                            if let Ok(update) = doc.encode_diff(&state_vector) {
                                let frame = SyncFrame::Update { update };
                                if let Ok(bytes) = frame.encode() {
                                    let _ = out_tx.send(bytes).await;
                                }
                            }
                        }
                        Err(e) => log::debug!("undecodable frame: {e}"),
                    },
                    Ok(Message::Close(close)) => {
                        let (code, reason) = close
                            .map(|c| (u16::from(c.code), c.reason.to_string()))
                            .unwrap_or((1005, String::new()));
                        let _ = event_tx.send(TransportEvent::Closed { code, reason }).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::debug!("websocket read error: {e}");
                        break;
                    }
                }
            }
            drop(doc_sub);

            {
                let mut inner = shared.lock().unwrap_or_else(|e| e.into_inner());
                if inner.generation == generation {
                    inner.connected = false;
                    inner.outgoing = None;
                }
            }
            let _ = event_tx
                .send(TransportEvent::Status(ConnectionState::Disconnected))
                .await;
        });

        event_rx
    }

    fn disconnect(&self) {
        let mut inner = self.lock();
        inner.outgoing = None;
        inner.connected = false;
        inner.generation += 1; // orphan any live socket task
    }

    fn destroy(&self) {
        self.disconnect();
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }
}

// ─── Intent channel over WebSocket ──────────────────────────────────

/// Factory for the auxiliary low-latency intent channel.
pub struct WsIntentChannelFactory {
    url: String,
}

impl WsIntentChannelFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

struct WsIntentChannel {
    outgoing: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>>,
}

impl IntentChannelFactory for WsIntentChannelFactory {
    fn create(&self, handlers: IntentHandlers) -> Box<dyn IntentChannel> {
        let outgoing: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>> = Arc::new(Mutex::new(None));
        let url = self.url.clone();
        let slot = outgoing.clone();

        tokio::spawn(async move {
            let stream = match tokio_tungstenite::connect_async(&url).await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    log::debug!("intent channel connect failed: {e}");
                    (handlers.on_close)(IntentClose {
                        code: 1006,
                        reason: e.to_string(),
                    });
                    return;
                }
            };
            let (mut writer, mut reader) = stream.split();

            let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
            *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(out_tx);
            tokio::spawn(async move {
                while let Some(bytes) = out_rx.recv().await {
                    if writer.send(Message::Binary(bytes.into())).await.is_err() {
                        break;
                    }
                }
            });

            let mut close = IntentClose {
                code: 1006,
                reason: String::new(),
            };
            while let Some(message) = reader.next().await {
                match message {
                    Ok(Message::Binary(bytes)) => match IntentEnvelope::decode(&bytes) {
                        Ok(envelope) => (handlers.on_message)(envelope),
                        Err(e) => log::debug!("dropping undecodable intent: {e}"),
                    },
                    Ok(Message::Close(frame)) => {
                        if let Some(frame) = frame {
                            close = IntentClose {
                                code: u16::from(frame.code),
                                reason: frame.reason.to_string(),
                            };
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        close.reason = e.to_string();
                        break;
                    }
                }
            }
            *slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
            (handlers.on_close)(close);
        });

        Box::new(WsIntentChannel { outgoing })
    }
}

impl IntentChannel for WsIntentChannel {
    fn send_intent(&self, envelope: &IntentEnvelope) -> Result<(), TransportError> {
        let bytes = envelope.encode()?;
        let outgoing = self.outgoing.lock().unwrap_or_else(|e| e.into_inner());
        match outgoing.as_ref() {
            Some(tx) => tx.try_send(bytes).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        *self.outgoing.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
