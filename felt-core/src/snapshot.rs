//! Typed snapshots of the replicated document.
//!
//! The replicated maps hold JSON records keyed by id. [`RawSnapshot`]
//! is that shape verbatim; [`sanitize`] turns it into a [`GameSnapshot`]
//! by parsing every record, repairing what it can (an id that disagrees
//! with its map key, a card listed in the wrong zone order) and dropping
//! what it can't. Reconciliation never throws on malformed upstream
//! data — invalid entries are counted in the [`SanitizeReport`] instead.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::{Card, CardId, Counter, Player, PlayerId, RoomMeta, Zone, ZoneId};

/// Key under which [`RoomMeta`] lives in the meta map.
pub const META_ROOM_KEY: &str = "room";

/// Untyped view of every replicated map, exactly as stored.
#[derive(Debug, Clone, Default)]
pub struct RawSnapshot {
    pub players: BTreeMap<String, Value>,
    /// Player id → seat index. Canonical order sorts by (index, id).
    pub player_order: BTreeMap<String, Value>,
    pub zones: BTreeMap<String, Value>,
    pub cards: BTreeMap<String, Value>,
    /// Zone id → JSON array of card ids.
    pub zone_card_orders: BTreeMap<String, Value>,
    pub global_counters: BTreeMap<String, Value>,
    pub view_scale: BTreeMap<String, Value>,
    pub meta: BTreeMap<String, Value>,
}

/// Sanitized, typed view of the shared state — what the UI renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameSnapshot {
    pub players: BTreeMap<PlayerId, Player>,
    /// Seat order; only live players appear here.
    pub player_order: Vec<PlayerId>,
    /// Zones with their ordered `card_ids` already resolved.
    pub zones: BTreeMap<ZoneId, Zone>,
    pub cards: BTreeMap<CardId, Card>,
    pub global_counters: BTreeMap<String, Counter>,
    pub view_scale: BTreeMap<PlayerId, f64>,
    pub meta: RoomMeta,
}

impl GameSnapshot {
    pub fn zone_of_card(&self, card_id: &str) -> Option<&Zone> {
        let card = self.cards.get(card_id)?;
        self.zones.get(&card.zone_id)
    }
}

/// What sanitation had to drop or repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    pub dropped_players: usize,
    pub dropped_zones: usize,
    pub dropped_cards: usize,
    pub dropped_order_entries: usize,
    pub dropped_counters: usize,
    pub repaired: usize,
}

impl SanitizeReport {
    pub fn is_clean(&self) -> bool {
        *self == SanitizeReport::default()
    }

    pub fn summary(&self) -> String {
        format!(
            "dropped {} players, {} zones, {} cards, {} order entries, {} counters; repaired {}",
            self.dropped_players,
            self.dropped_zones,
            self.dropped_cards,
            self.dropped_order_entries,
            self.dropped_counters,
            self.repaired
        )
    }
}

fn parse_record<T: serde::de::DeserializeOwned>(value: &Value) -> Option<T> {
    serde_json::from_value(value.clone()).ok()
}

/// Build a [`GameSnapshot`] from raw replicated data.
pub fn sanitize(raw: &RawSnapshot) -> (GameSnapshot, SanitizeReport) {
    let mut report = SanitizeReport::default();
    let mut snap = GameSnapshot::default();

    for (key, value) in &raw.players {
        match parse_record::<Player>(value) {
            Some(mut player) => {
                if player.id != *key {
                    player.id = key.clone();
                    report.repaired += 1;
                }
                snap.players.insert(key.clone(), player);
            }
            None => report.dropped_players += 1,
        }
    }

    // Seat order: (index, id) over live players only.
    let mut order: Vec<(i64, String)> = Vec::new();
    for (id, value) in &raw.player_order {
        if !snap.players.contains_key(id) {
            report.dropped_order_entries += 1;
            continue;
        }
        match value.as_i64() {
            Some(index) => order.push((index, id.clone())),
            None => report.dropped_order_entries += 1,
        }
    }
    order.sort();
    snap.player_order = order.into_iter().map(|(_, id)| id).collect();

    for (key, value) in &raw.cards {
        match parse_record::<Card>(value) {
            Some(mut card) => {
                if card.id != *key {
                    card.id = key.clone();
                    report.repaired += 1;
                }
                // Legacy pixel positions are migrated on read.
                let normalized = card.position.normalized();
                if normalized != card.position {
                    card.position = normalized;
                    report.repaired += 1;
                }
                snap.cards.insert(key.clone(), card);
            }
            None => report.dropped_cards += 1,
        }
    }

    for (key, value) in &raw.zones {
        match parse_record::<Zone>(value) {
            Some(mut zone) => {
                if zone.id != *key {
                    zone.id = key.clone();
                    report.repaired += 1;
                }
                zone.card_ids = resolve_zone_order(
                    key,
                    raw.zone_card_orders.get(key),
                    &snap.cards,
                    &mut report,
                );
                snap.zones.insert(key.clone(), zone);
            }
            None => report.dropped_zones += 1,
        }
    }

    for (key, value) in &raw.global_counters {
        match parse_record::<Counter>(value) {
            Some(counter) if counter.count > 0 => {
                snap.global_counters.insert(key.clone(), counter);
            }
            _ => report.dropped_counters += 1,
        }
    }

    for (key, value) in &raw.view_scale {
        if let Some(scale) = value.as_f64() {
            if scale.is_finite() && scale > 0.0 {
                snap.view_scale.insert(key.clone(), scale);
            }
        }
    }

    snap.meta = raw
        .meta
        .get(META_ROOM_KEY)
        .and_then(parse_record::<RoomMeta>)
        .unwrap_or_default();

    (snap, report)
}

/// Resolve a zone's ordered card list against the card records.
///
/// Deduplicates, drops ids whose card record is missing or claims a
/// different zone (the card record wins a cross-zone disagreement), and
/// appends cards that claim this zone but were missing from the order.
fn resolve_zone_order(
    zone_id: &str,
    order: Option<&Value>,
    cards: &BTreeMap<CardId, Card>,
    report: &mut SanitizeReport,
) -> Vec<CardId> {
    let mut resolved: Vec<CardId> = Vec::new();

    if let Some(Value::Array(entries)) = order {
        for entry in entries {
            let Some(id) = entry.as_str() else {
                report.dropped_order_entries += 1;
                continue;
            };
            if resolved.iter().any(|existing| existing == id) {
                report.dropped_order_entries += 1;
                continue;
            }
            match cards.get(id) {
                Some(card) if card.zone_id == zone_id => resolved.push(id.to_string()),
                _ => report.dropped_order_entries += 1,
            }
        }
    }

    // Cards that claim this zone but fell out of the order list.
    let mut strays: Vec<&CardId> = cards
        .values()
        .filter(|c| c.zone_id == zone_id && !resolved.contains(&c.id))
        .map(|c| &c.id)
        .collect();
    strays.sort();
    for id in strays {
        report.repaired += 1;
        resolved.push(id.clone());
    }

    resolved
}
