//! Storage abstraction over the replicated maps.
//!
//! All mutation helpers are written against [`StoreTxn`], so the same
//! read-fresh-then-write code runs over the CRDT document in
//! multiplayer and over [`LocalStore`] in solo/offline play. `transact`
//! is the serialization boundary: every write inside one callback is
//! applied as a single atomic update, so peers never observe a
//! half-applied multi-key change.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

use felt_core::snapshot::RawSnapshot;

/// The named replicated maps of a room document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coll {
    Players,
    PlayerOrder,
    Zones,
    Cards,
    ZoneCardOrders,
    GlobalCounters,
    ViewScale,
    Meta,
}

impl Coll {
    pub const ALL: [Coll; 8] = [
        Coll::Players,
        Coll::PlayerOrder,
        Coll::Zones,
        Coll::Cards,
        Coll::ZoneCardOrders,
        Coll::GlobalCounters,
        Coll::ViewScale,
        Coll::Meta,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Coll::Players => "players",
            Coll::PlayerOrder => "player_order",
            Coll::Zones => "zones",
            Coll::Cards => "cards",
            Coll::ZoneCardOrders => "zone_card_orders",
            Coll::GlobalCounters => "global_counters",
            Coll::ViewScale => "view_scale",
            Coll::Meta => "meta",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Coll::Players => 0,
            Coll::PlayerOrder => 1,
            Coll::Zones => 2,
            Coll::Cards => 3,
            Coll::ZoneCardOrders => 4,
            Coll::GlobalCounters => 5,
            Coll::ViewScale => 6,
            Coll::Meta => 7,
        }
    }
}

/// A write transaction over the replicated maps.
///
/// Reads always reflect writes made earlier in the same transaction;
/// helpers never assume a read from *before* the transaction is still
/// valid.
pub trait StoreTxn {
    fn get(&self, coll: Coll, key: &str) -> Option<Value>;
    fn set(&mut self, coll: Coll, key: &str, value: Value);
    fn delete(&mut self, coll: Coll, key: &str);
    fn keys(&self, coll: Coll) -> Vec<String>;
}

/// A game-state store: the CRDT document or the local fallback.
pub trait GameStore: Send + Sync {
    /// Run `f` as one atomic multi-key write.
    fn transact(&self, f: &mut dyn FnMut(&mut dyn StoreTxn));

    /// Read a single record outside a transaction.
    fn get(&self, coll: Coll, key: &str) -> Option<Value>;

    /// Snapshot every map for sanitation/reconciliation.
    fn raw_snapshot(&self) -> RawSnapshot;
}

// ─── Local in-memory store ──────────────────────────────────────────

/// Plain in-memory store backing solo/offline play. Runs the exact same
/// mutation helpers as the replicated document.
#[derive(Default)]
pub struct LocalStore {
    maps: Mutex<[BTreeMap<String, Value>; 8]>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct LocalTxn<'a> {
    maps: &'a mut [BTreeMap<String, Value>; 8],
}

impl StoreTxn for LocalTxn<'_> {
    fn get(&self, coll: Coll, key: &str) -> Option<Value> {
        self.maps[coll.index()].get(key).cloned()
    }

    fn set(&mut self, coll: Coll, key: &str, value: Value) {
        self.maps[coll.index()].insert(key.to_string(), value);
    }

    fn delete(&mut self, coll: Coll, key: &str) {
        self.maps[coll.index()].remove(key);
    }

    fn keys(&self, coll: Coll) -> Vec<String> {
        self.maps[coll.index()].keys().cloned().collect()
    }
}

impl GameStore for LocalStore {
    fn transact(&self, f: &mut dyn FnMut(&mut dyn StoreTxn)) {
        let mut maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        let mut txn = LocalTxn { maps: &mut maps };
        f(&mut txn);
    }

    fn get(&self, coll: Coll, key: &str) -> Option<Value> {
        let maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        maps[coll.index()].get(key).cloned()
    }

    fn raw_snapshot(&self) -> RawSnapshot {
        let maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        RawSnapshot {
            players: maps[Coll::Players.index()].clone(),
            player_order: maps[Coll::PlayerOrder.index()].clone(),
            zones: maps[Coll::Zones.index()].clone(),
            cards: maps[Coll::Cards.index()].clone(),
            zone_card_orders: maps[Coll::ZoneCardOrders.index()].clone(),
            global_counters: maps[Coll::GlobalCounters.index()].clone(),
            view_scale: maps[Coll::ViewScale.index()].clone(),
            meta: maps[Coll::Meta.index()].clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_local_store_set_get_delete() {
        let store = LocalStore::new();
        store.transact(&mut |txn| {
            txn.set(Coll::Players, "p1", json!({"id": "p1"}));
        });
        assert_eq!(store.get(Coll::Players, "p1"), Some(json!({"id": "p1"})));

        store.transact(&mut |txn| {
            txn.delete(Coll::Players, "p1");
        });
        assert_eq!(store.get(Coll::Players, "p1"), None);
    }

    #[test]
    fn test_reads_see_writes_in_same_transaction() {
        let store = LocalStore::new();
        store.transact(&mut |txn| {
            txn.set(Coll::Cards, "c1", json!(1));
            assert_eq!(txn.get(Coll::Cards, "c1"), Some(json!(1)));
            txn.set(Coll::Cards, "c1", json!(2));
            assert_eq!(txn.get(Coll::Cards, "c1"), Some(json!(2)));
        });
        assert_eq!(store.get(Coll::Cards, "c1"), Some(json!(2)));
    }

    #[test]
    fn test_raw_snapshot_reflects_all_collections() {
        let store = LocalStore::new();
        store.transact(&mut |txn| {
            txn.set(Coll::Players, "p1", json!({"id": "p1"}));
            txn.set(Coll::ZoneCardOrders, "z1", json!(["c1"]));
            txn.set(Coll::Meta, "room", json!({"locked": false}));
        });

        let raw = store.raw_snapshot();
        assert_eq!(raw.players.len(), 1);
        assert_eq!(raw.zone_card_orders["z1"], json!(["c1"]));
        assert!(raw.meta.contains_key("room"));
    }

    #[test]
    fn test_collection_names_are_distinct() {
        let mut names: Vec<&str> = Coll::ALL.iter().map(|c| c.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Coll::ALL.len());
    }
}
