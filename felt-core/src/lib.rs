//! # felt-core — pure domain layer for the felt card table
//!
//! Everything in this crate is synchronous and side-effect free: the
//! shared data model, the permission engine, the join planner, snapshot
//! sanitation, the private overlay, optimistic intents, and presence
//! accounting. Replication, transport, and session lifecycle live in
//! `felt-collab`, which drives these functions against a CRDT document.
//!
//! ## Modules
//!
//! - [`model`] — replicated record types and table constants
//! - [`permission`] — "can actor X do Y to entity Z" checks
//! - [`init`] — join gate, local-player init planner, host healing
//! - [`snapshot`] — raw→typed sanitation of replicated state
//! - [`overlay`] — client-held secret card fields
//! - [`intent`] — tagged optimistic mutations + pending queue
//! - [`collision`] — battlefield bump-and-search slot resolution
//! - [`presence`] — de-duplicated peer counts

pub mod collision;
pub mod init;
pub mod intent;
pub mod model;
pub mod overlay;
pub mod permission;
pub mod presence;
pub mod snapshot;

pub use init::{check_join_gate, plan_local_player_init, resolve_host, InitPlan, JoinBlockReason};
pub use intent::{Intent, PendingIntentQueue};
pub use model::{
    Card, CardId, CardPatch, Counter, Player, PlayerId, PlayerPatch, Position, RoomMeta, Zone,
    ZoneId, ZoneKind,
};
pub use overlay::{OverlayCard, PrivateOverlay};
pub use permission::{Decision, ViewOpts};
pub use presence::{compute_peer_counts, PeerCounts, PeerRole, PresenceClient, PresenceState};
pub use snapshot::{sanitize, GameSnapshot, RawSnapshot, SanitizeReport};
