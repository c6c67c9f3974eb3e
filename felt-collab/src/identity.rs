//! Persisted local identity.
//!
//! A client keeps one stable player id per room, so rejoining after a
//! reload reuses the same seat, plus a monotonically increasing session
//! version per room (to fence off stale in-flight connections from a
//! previous mount), any room access/invite tokens it has been handed,
//! and room availability markers. Everything lives in one JSON file; a
//! corrupt file is replaced with defaults rather than treated as fatal.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum IdentityError {
    Io(String),
    Serde(String),
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "identity file I/O error: {e}"),
            Self::Serde(e) => write!(f, "identity file format error: {e}"),
        }
    }
}

impl std::error::Error for IdentityError {}

/// Tokens a client holds for one room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite: Option<String>,
}

impl RoomTokens {
    pub fn is_empty(&self) -> bool {
        self.access_key.is_none() && self.invite.is_none()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IdentityFile {
    #[serde(default)]
    players: BTreeMap<String, String>,
    #[serde(default)]
    session_versions: BTreeMap<String, u64>,
    #[serde(default)]
    tokens: BTreeMap<String, RoomTokens>,
    #[serde(default)]
    unavailable: BTreeSet<String>,
    #[serde(default)]
    host_pending: BTreeSet<String>,
}

/// File-backed identity store.
pub struct IdentityStore {
    path: PathBuf,
    inner: Mutex<IdentityFile>,
}

impl IdentityStore {
    /// Load the identity file, falling back to defaults when it is
    /// missing or unreadable.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let path = path.as_ref().to_path_buf();
        let file = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(file) => file,
                Err(e) => {
                    log::warn!("identity file {} is corrupt ({e}), starting fresh", path.display());
                    IdentityFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IdentityFile::default(),
            Err(e) => return Err(IdentityError::Io(e.to_string())),
        };
        Ok(Self {
            path,
            inner: Mutex::new(file),
        })
    }

    fn persist(&self, file: &IdentityFile) {
        let json = match serde_json::to_string_pretty(file) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("failed to serialize identity file: {e}");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&self.path, json) {
            log::warn!("failed to persist identity file {}: {e}", self.path.display());
        }
    }

    /// Stable player id for a room, created on first use.
    pub fn player_id_for(&self, room_id: &str) -> String {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = inner.players.get(room_id) {
            return existing.clone();
        }
        let id = format!("p-{}", &Uuid::new_v4().simple().to_string()[..12]);
        inner.players.insert(room_id.to_string(), id.clone());
        self.persist(&inner);
        id
    }

    /// Bump and return the room's session version. Any connection still
    /// in flight with a lower version is stale and must be ignored.
    pub fn bump_session_version(&self, room_id: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let version = inner
            .session_versions
            .entry(room_id.to_string())
            .and_modify(|v| *v += 1)
            .or_insert(1);
        let version = *version;
        self.persist(&inner);
        version
    }

    pub fn session_version(&self, room_id: &str) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .session_versions
            .get(room_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn tokens_for(&self, room_id: &str) -> RoomTokens {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .tokens
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn store_tokens(&self, room_id: &str, tokens: RoomTokens) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tokens.insert(room_id.to_string(), tokens);
        self.persist(&inner);
    }

    pub fn mark_room_unavailable(&self, room_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.unavailable.insert(room_id.to_string()) {
            self.persist(&inner);
        }
    }

    pub fn is_room_unavailable(&self, room_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unavailable
            .contains(room_id)
    }

    pub fn clear_room_unavailable(&self, room_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.unavailable.remove(room_id) {
            self.persist(&inner);
        }
    }

    pub fn set_host_pending(&self, room_id: &str, pending: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let changed = if pending {
            inner.host_pending.insert(room_id.to_string())
        } else {
            inner.host_pending.remove(room_id)
        };
        if changed {
            self.persist(&inner);
        }
    }

    pub fn is_host_pending(&self, room_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .host_pending
            .contains(room_id)
    }
}

/// Environment hooks for join/invite token discovery (URL fragments,
/// share links). The default resolver finds nothing.
pub trait TokenResolver: Send + Sync {
    fn resolve_join_token(&self) -> Option<String> {
        None
    }
    fn resolve_invite_token(&self) -> Option<String> {
        None
    }
}

/// Resolver for clients launched without any share link.
pub struct NullTokenResolver;

impl TokenResolver for NullTokenResolver {}
