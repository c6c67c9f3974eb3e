//! The shared room document over a CRDT.
//!
//! A [`SharedDocument`] wraps a `yrs::Doc` and exposes the eight named
//! replicated maps through the [`GameStore`] interface. Records are
//! stored as JSON strings under their id, so the map layer stays
//! schema-agnostic and last-writer-wins applies per record. All writes
//! go through `transact`, which maps one callback onto one CRDT
//! transaction — peers receive the whole multi-key change as a single
//! update.
//!
//! [`DocRegistry`] hands out reference-counted per-room handles so a
//! fast remount can't destroy a document another consumer still holds.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, Map, MapRef, ReadTxn, StateVector, Transact, Update};

use crate::store::{Coll, GameStore, StoreTxn};
use felt_core::snapshot::RawSnapshot;

/// Errors from the CRDT layer.
#[derive(Debug, Clone)]
pub enum DocError {
    Decode(String),
    Apply(String),
    Subscribe(String),
}

impl std::fmt::Display for DocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "update decode error: {e}"),
            Self::Apply(e) => write!(f, "update apply error: {e}"),
            Self::Subscribe(e) => write!(f, "observer error: {e}"),
        }
    }
}

impl std::error::Error for DocError {}

/// A room's replicated document.
pub struct SharedDocument {
    doc: Doc,
    maps: [MapRef; 8],
}

impl SharedDocument {
    pub fn new() -> Self {
        let doc = Doc::new();
        let maps = Coll::ALL.map(|coll| doc.get_or_insert_map(coll.name()));
        Self { doc, maps }
    }

    /// Full document state as a single update (for initial sync).
    pub fn encode_full(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Our state vector, for diff-based sync handshakes.
    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Everything the remote peer (whose state vector this is) is missing.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, DocError> {
        let sv = StateVector::decode_v1(remote_state_vector)
            .map_err(|e| DocError::Decode(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_diff_v1(&sv))
    }

    /// Apply a remote update.
    pub fn apply_update(&self, update: &[u8]) -> Result<(), DocError> {
        let update = Update::decode_v1(update).map_err(|e| DocError::Decode(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| DocError::Apply(e.to_string()))
    }

    /// Observe every local or remote change as an encoded update.
    ///
    /// The returned subscription must be held for as long as the
    /// callback should fire.
    pub fn on_update<F>(&self, f: F) -> Result<yrs::Subscription, DocError>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.doc
            .observe_update_v1(move |_txn, event| f(&event.update))
            .map_err(|e| DocError::Subscribe(e.to_string()))
    }
}

impl Default for SharedDocument {
    fn default() -> Self {
        Self::new()
    }
}

fn read_json<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<Value> {
    match map.get(txn, key) {
        Some(yrs::Out::Any(yrs::Any::String(json))) => serde_json::from_str(&json).ok(),
        _ => None,
    }
}

fn dump_map<T: ReadTxn>(map: &MapRef, txn: &T) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for key in map.keys(txn) {
        if let Some(value) = read_json(map, txn, key) {
            out.insert(key.to_string(), value);
        }
    }
    out
}

struct DocTxn<'a, 'txn> {
    maps: &'a [MapRef; 8],
    txn: &'a mut yrs::TransactionMut<'txn>,
}

impl StoreTxn for DocTxn<'_, '_> {
    fn get(&self, coll: Coll, key: &str) -> Option<Value> {
        read_json(&self.maps[coll.index()], &*self.txn, key)
    }

    fn set(&mut self, coll: Coll, key: &str, value: Value) {
        self.maps[coll.index()].insert(&mut *self.txn, key.to_string(), value.to_string());
    }

    fn delete(&mut self, coll: Coll, key: &str) {
        self.maps[coll.index()].remove(&mut *self.txn, key);
    }

    fn keys(&self, coll: Coll) -> Vec<String> {
        self.maps[coll.index()]
            .keys(&*self.txn)
            .map(|k| k.to_string())
            .collect()
    }
}

impl GameStore for SharedDocument {
    fn transact(&self, f: &mut dyn FnMut(&mut dyn StoreTxn)) {
        let mut txn = self.doc.transact_mut();
        let mut adapter = DocTxn {
            maps: &self.maps,
            txn: &mut txn,
        };
        f(&mut adapter);
    }

    fn get(&self, coll: Coll, key: &str) -> Option<Value> {
        let txn = self.doc.transact();
        read_json(&self.maps[coll.index()], &txn, key)
    }

    fn raw_snapshot(&self) -> RawSnapshot {
        let txn = self.doc.transact();
        RawSnapshot {
            players: dump_map(&self.maps[Coll::Players.index()], &txn),
            player_order: dump_map(&self.maps[Coll::PlayerOrder.index()], &txn),
            zones: dump_map(&self.maps[Coll::Zones.index()], &txn),
            cards: dump_map(&self.maps[Coll::Cards.index()], &txn),
            zone_card_orders: dump_map(&self.maps[Coll::ZoneCardOrders.index()], &txn),
            global_counters: dump_map(&self.maps[Coll::GlobalCounters.index()], &txn),
            view_scale: dump_map(&self.maps[Coll::ViewScale.index()], &txn),
            meta: dump_map(&self.maps[Coll::Meta.index()], &txn),
        }
    }
}

// ─── Registry ───────────────────────────────────────────────────────

struct RegistryEntry {
    doc: Arc<SharedDocument>,
    refs: usize,
}

/// Reference-counted per-room document handles.
pub struct DocRegistry {
    rooms: Mutex<HashMap<String, RegistryEntry>>,
}

impl DocRegistry {
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Get (or lazily create) the document for a room.
    pub fn acquire(&self, room_id: &str) -> Arc<SharedDocument> {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        let entry = rooms.entry(room_id.to_string()).or_insert_with(|| {
            log::debug!("creating shared document for room {room_id}");
            RegistryEntry {
                doc: Arc::new(SharedDocument::new()),
                refs: 0,
            }
        });
        entry.refs += 1;
        entry.doc.clone()
    }

    /// Release one handle. The document itself stays until a sweep so a
    /// fast remount reuses it.
    pub fn release(&self, room_id: &str) {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = rooms.get_mut(room_id) {
            entry.refs = entry.refs.saturating_sub(1);
        }
    }

    /// Drop every unreferenced document except `keep`. Returns how many
    /// were removed.
    pub fn sweep_stale(&self, keep: &str) -> usize {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        let before = rooms.len();
        rooms.retain(|room_id, entry| entry.refs > 0 || room_id == keep);
        let swept = before - rooms.len();
        if swept > 0 {
            log::debug!("swept {swept} stale room documents");
        }
        swept
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for DocRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get_roundtrip() {
        let doc = SharedDocument::new();
        doc.transact(&mut |txn| {
            txn.set(Coll::Players, "p1", json!({"id": "p1", "life": 40}));
        });
        let value = doc.get(Coll::Players, "p1").unwrap();
        assert_eq!(value["life"], 40);
    }

    #[test]
    fn test_transactional_reads_see_writes() {
        let doc = SharedDocument::new();
        doc.transact(&mut |txn| {
            txn.set(Coll::Cards, "c1", json!(1));
            assert_eq!(txn.get(Coll::Cards, "c1"), Some(json!(1)));
            txn.delete(Coll::Cards, "c1");
            assert_eq!(txn.get(Coll::Cards, "c1"), None);
        });
        assert_eq!(doc.get(Coll::Cards, "c1"), None);
    }

    #[test]
    fn test_update_exchange_converges() {
        let a = SharedDocument::new();
        let b = SharedDocument::new();

        a.transact(&mut |txn| {
            txn.set(Coll::Players, "p1", json!({"id": "p1"}));
        });
        b.apply_update(&a.encode_full()).unwrap();

        assert_eq!(b.get(Coll::Players, "p1"), Some(json!({"id": "p1"})));
    }

    #[test]
    fn test_diff_sync_only_sends_missing() {
        let a = SharedDocument::new();
        let b = SharedDocument::new();

        a.transact(&mut |txn| {
            txn.set(Coll::Players, "p1", json!({"id": "p1"}));
        });
        b.apply_update(&a.encode_full()).unwrap();

        a.transact(&mut |txn| {
            txn.set(Coll::Players, "p2", json!({"id": "p2"}));
        });
        let diff = a.encode_diff(&b.state_vector()).unwrap();
        b.apply_update(&diff).unwrap();

        let raw = b.raw_snapshot();
        assert_eq!(raw.players.len(), 2);
    }

    #[test]
    fn test_on_update_fires_for_local_writes() {
        let doc = SharedDocument::new();
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = fired.clone();
        let _sub = doc
            .on_update(move |_update| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })
            .unwrap();

        doc.transact(&mut |txn| {
            txn.set(Coll::Meta, "room", json!({"locked": false}));
        });
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_garbage_is_an_error_not_a_panic() {
        let doc = SharedDocument::new();
        assert!(doc.apply_update(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    }

    #[test]
    fn test_registry_refcounts_handles() {
        let registry = DocRegistry::new();
        let doc1 = registry.acquire("room-1");
        let doc2 = registry.acquire("room-1");

        doc1.transact(&mut |txn| {
            txn.set(Coll::Meta, "room", json!({"locked": true}));
        });
        // Same underlying document.
        assert_eq!(doc2.get(Coll::Meta, "room"), Some(json!({"locked": true})));

        registry.release("room-1");
        // Still referenced: the sweep must keep it.
        assert_eq!(registry.sweep_stale("other"), 0);
        registry.release("room-1");
        assert_eq!(registry.sweep_stale("other"), 1);
    }

    #[test]
    fn test_sweep_keeps_named_room() {
        let registry = DocRegistry::new();
        registry.acquire("room-1");
        registry.release("room-1");
        assert_eq!(registry.sweep_stale("room-1"), 0);
        assert_eq!(registry.room_count(), 1);
    }
}
