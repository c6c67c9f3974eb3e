//! # felt-collab — CRDT replication and session layer for felt
//!
//! Keeps a room of card-table clients converged on one shared state.
//!
//! ## Architecture
//!
//! ```text
//! UI intent
//!    │
//!    ▼
//! GameActions ── PermissionEngine check (felt-core)
//!    │                │ denied → logged, swallowed
//!    ▼                ▼
//! PendingIntentQueue  SharedDocument.transact (yrs)
//!    │                │
//!    │                ├──► WebSocket transport ──► peers
//!    │                │
//!    │                ▼ change event (debounced)
//!    └──────► FullSyncReconciler
//!               sanitize → private overlay → replay intents
//!                    │
//!                    ▼
//!               ClientState ──► render
//! ```
//!
//! ## Modules
//!
//! - [`store`] — `GameStore` abstraction + in-memory solo fallback
//! - [`doc`] — `SharedDocument` over yrs, ref-counted room registry
//! - [`mutations`] — read-fresh helpers (move/duplicate collision
//!   cascade, token lifecycle, counters, host healing)
//! - [`actions`] — permission-checked, logged mutation entry points
//! - [`reconcile`] — sanitize → overlay → intent replay, debounced
//! - [`session`] — one active room session, reconnect with grace
//! - [`transport`] — provider/presence/intent-channel contracts
//! - [`ws`] — default WebSocket transport
//! - [`identity`] — persisted player ids, session versions, tokens
//! - [`state`] — explicit UI-facing state container

pub mod actions;
pub mod doc;
pub mod identity;
pub mod mutations;
pub mod reconcile;
pub mod session;
pub mod state;
pub mod store;
pub mod transport;
pub mod ws;

pub use actions::{ActionOutcome, GameActions};
pub use doc::{DocError, DocRegistry, SharedDocument};
pub use identity::{IdentityStore, NullTokenResolver, RoomTokens, TokenResolver};
pub use reconcile::{Debouncer, Reconciler};
pub use session::{
    ensure_local_player_initialized, InitOutcome, SessionConfig, SessionHandle,
    SessionResourceManager,
};
pub use state::{BlockedReason, ClientState, SessionKey};
pub use store::{Coll, GameStore, LocalStore, StoreTxn};
pub use transport::{
    ConnectParams, ConnectionState, IntentChannel, IntentChannelFactory, IntentEnvelope,
    PresenceChannel, TransportError, TransportEvent, TransportProvider,
};
pub use ws::{WsIntentChannelFactory, WsTransportProvider};
