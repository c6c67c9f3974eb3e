//! UI-facing application state container.
//!
//! One explicit container with a defined lifecycle — `init`,
//! `reset_session`, `teardown` — instead of an ambient singleton. The
//! session layer and the mutation actions receive it as a parameter;
//! the render layer reads cheap clones out of it.

use std::sync::RwLock;

use felt_core::init::JoinBlockReason;
use felt_core::presence::PeerCounts;
use felt_core::snapshot::GameSnapshot;

use crate::transport::ConnectionState;

/// Why the local player cannot participate right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedReason {
    /// The join gate refused us (room full / locked / over capacity).
    Gate(JoinBlockReason),
    /// We held valid tokens but the server now rejects them — the room
    /// was most likely closed or reset.
    RoomUnavailable,
    /// We never had tokens for this room; a fresh invite is needed.
    InviteRequired,
}

/// Identity of the mounted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub room_id: String,
    pub player_id: String,
}

#[derive(Debug, Default)]
struct ClientStateInner {
    session: Option<SessionKey>,
    snapshot: GameSnapshot,
    counts: PeerCounts,
    connection: Option<ConnectionState>,
    blocked: Option<BlockedReason>,
    /// Bumped on every reset so stale async publishes can be detected.
    epoch: u64,
}

/// Process-wide client state, passed explicitly to its consumers.
#[derive(Default)]
pub struct ClientState {
    inner: RwLock<ClientStateInner>,
}

impl ClientState {
    pub fn init() -> Self {
        Self::default()
    }

    pub fn current_session(&self) -> Option<SessionKey> {
        self.read().session.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Point the container at a (room, player) pair, dropping all state
    /// of the previous session. No-op when the key is unchanged.
    pub fn reset_session(&self, key: SessionKey) {
        let mut inner = self.write();
        if inner.session.as_ref() == Some(&key) {
            return;
        }
        let epoch = inner.epoch + 1;
        *inner = ClientStateInner {
            session: Some(key),
            epoch,
            ..Default::default()
        };
    }

    /// Clear everything, including the session pointer.
    pub fn teardown(&self) {
        let mut inner = self.write();
        let epoch = inner.epoch + 1;
        *inner = ClientStateInner {
            epoch,
            ..Default::default()
        };
    }

    /// Publish a reconciled snapshot. Ignored if `epoch` is stale (a
    /// debounced publish racing a session reset).
    pub fn publish_snapshot(&self, epoch: u64, snapshot: GameSnapshot) {
        let mut inner = self.write();
        if inner.epoch != epoch {
            log::debug!("dropping stale snapshot publish (epoch {epoch} != {})", inner.epoch);
            return;
        }
        inner.snapshot = snapshot;
    }

    pub fn snapshot(&self) -> GameSnapshot {
        self.read().snapshot.clone()
    }

    pub fn set_connection(&self, state: ConnectionState) {
        self.write().connection = Some(state);
    }

    pub fn connection(&self) -> Option<ConnectionState> {
        self.read().connection
    }

    pub fn set_blocked(&self, reason: Option<BlockedReason>) {
        self.write().blocked = reason;
    }

    pub fn blocked(&self) -> Option<BlockedReason> {
        self.read().blocked
    }

    pub fn set_peer_counts(&self, counts: PeerCounts) {
        self.write().counts = counts;
    }

    pub fn peer_counts(&self) -> PeerCounts {
        self.read().counts
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ClientStateInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ClientStateInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(room: &str, player: &str) -> SessionKey {
        SessionKey {
            room_id: room.to_string(),
            player_id: player.to_string(),
        }
    }

    #[test]
    fn test_reset_session_clears_state() {
        let state = ClientState::init();
        state.reset_session(key("room-1", "p1"));
        state.set_blocked(Some(BlockedReason::InviteRequired));

        state.reset_session(key("room-2", "p1"));
        assert_eq!(state.blocked(), None);
        assert_eq!(state.current_session(), Some(key("room-2", "p1")));
    }

    #[test]
    fn test_reset_to_same_session_keeps_state() {
        let state = ClientState::init();
        state.reset_session(key("room-1", "p1"));
        state.set_blocked(Some(BlockedReason::RoomUnavailable));

        state.reset_session(key("room-1", "p1"));
        assert_eq!(state.blocked(), Some(BlockedReason::RoomUnavailable));
    }

    #[test]
    fn test_stale_epoch_publish_dropped() {
        let state = ClientState::init();
        state.reset_session(key("room-1", "p1"));
        let old_epoch = state.epoch();

        state.reset_session(key("room-2", "p1"));

        let mut snapshot = GameSnapshot::default();
        snapshot.player_order.push("stale".into());
        state.publish_snapshot(old_epoch, snapshot);
        assert!(state.snapshot().player_order.is_empty());
    }

    #[test]
    fn test_teardown_clears_session_pointer() {
        let state = ClientState::init();
        state.reset_session(key("room-1", "p1"));
        state.teardown();
        assert_eq!(state.current_session(), None);
    }
}
