//! Peer-presence accounting.
//!
//! The presence channel reports one raw state per *connection*, but a
//! user with two tabs is still one user: counts de-duplicate by the
//! application-level user id when the client has attached one, falling
//! back to the connection key until it has.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Role a peer advertises in its presence payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Player,
    Spectator,
}

/// The client-controlled slice of a raw presence state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceClient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<PeerRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One connection's raw presence state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<PresenceClient>,
}

/// De-duplicated peer counts derived from the presence channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerCounts {
    pub total: usize,
    pub players: usize,
    pub spectators: usize,
}

/// Count unique peers and bucket them by advertised role.
///
/// `total` is floored at 1: the local client counts itself even before
/// its own presence write has propagated back. A connection without a
/// declared role counts as a player.
pub fn compute_peer_counts(states: &BTreeMap<String, PresenceState>) -> PeerCounts {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut counts = PeerCounts::default();

    for (connection_key, state) in states {
        let client = state.client.as_ref();
        let user_key = client
            .and_then(|c| c.id.clone())
            .unwrap_or_else(|| format!("conn:{connection_key}"));
        if !seen.insert(user_key) {
            continue;
        }
        counts.total += 1;
        match client.and_then(|c| c.role) {
            Some(PeerRole::Spectator) => counts.spectators += 1,
            Some(PeerRole::Player) | None => counts.players += 1,
        }
    }

    if counts.total == 0 {
        counts.total = 1;
        counts.players = 1;
    }
    counts
}
