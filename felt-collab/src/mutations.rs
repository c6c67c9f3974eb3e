//! Mutation helpers over the replicated maps.
//!
//! Every helper reads current values *inside* the transaction it writes
//! in, computes the next value, and writes back — a read taken before
//! the transaction is never trusted, because another peer may have won
//! a race on that key in between. Helpers silently no-op when their
//! target no longer exists: concurrent deletion is a valid outcome, not
//! an error, and callers must treat "no visible effect" accordingly.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::store::{Coll, StoreTxn};
use felt_core::collision;
use felt_core::init::{resolve_host, InitPlan};
use felt_core::intent::sanitize_reorder;
use felt_core::model::{
    merge_counter, Card, CardPatch, Counter, Player, PlayerPatch, Position, RoomMeta, Zone,
    ZoneKind,
};
use felt_core::snapshot::META_ROOM_KEY;

pub use felt_core::model::{VIEW_SCALE_MAX, VIEW_SCALE_MIN};

// ─── Typed record access ────────────────────────────────────────────

fn read_as<T: DeserializeOwned>(txn: &dyn StoreTxn, coll: Coll, key: &str) -> Option<T> {
    txn.get(coll, key)
        .and_then(|value| serde_json::from_value(value).ok())
}

fn write_as<T: Serialize>(txn: &mut dyn StoreTxn, coll: Coll, key: &str, record: &T) {
    match serde_json::to_value(record) {
        Ok(value) => txn.set(coll, key, value),
        Err(e) => log::warn!("failed to serialize {} record {key}: {e}", coll.name()),
    }
}

pub fn read_player(txn: &dyn StoreTxn, id: &str) -> Option<Player> {
    read_as(txn, Coll::Players, id)
}

pub fn read_zone(txn: &dyn StoreTxn, id: &str) -> Option<Zone> {
    read_as(txn, Coll::Zones, id)
}

/// Cards are position-migrated on every read: legacy documents stored
/// raw pixels.
pub fn read_card(txn: &dyn StoreTxn, id: &str) -> Option<Card> {
    let mut card: Card = read_as(txn, Coll::Cards, id)?;
    card.position = card.position.normalized();
    Some(card)
}

pub fn zone_order(txn: &dyn StoreTxn, zone_id: &str) -> Vec<String> {
    match txn.get(Coll::ZoneCardOrders, zone_id) {
        Some(Value::Array(entries)) => entries
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn write_zone_order(txn: &mut dyn StoreTxn, zone_id: &str, order: &[String]) {
    txn.set(Coll::ZoneCardOrders, zone_id, Value::from(order.to_vec()));
}

pub fn read_room_meta(txn: &dyn StoreTxn) -> RoomMeta {
    read_as(txn, Coll::Meta, META_ROOM_KEY).unwrap_or_default()
}

// ─── Players ────────────────────────────────────────────────────────

/// Write a full player record and make sure it has a seat in the order.
pub fn upsert_player(txn: &mut dyn StoreTxn, player: &Player) {
    write_as(txn, Coll::Players, &player.id, player);
    if txn.get(Coll::PlayerOrder, &player.id).is_none() {
        let next_seat = txn
            .keys(Coll::PlayerOrder)
            .iter()
            .filter_map(|key| txn.get(Coll::PlayerOrder, key))
            .filter_map(|value| value.as_i64())
            .max()
            .map(|seat| seat + 1)
            .unwrap_or(0);
        txn.set(Coll::PlayerOrder, &player.id, Value::from(next_seat));
    }
}

pub fn patch_player(txn: &mut dyn StoreTxn, id: &str, patch: &PlayerPatch) {
    let Some(mut player) = read_player(&*txn, id) else {
        return;
    };
    patch.apply_to(&mut player);
    write_as(txn, Coll::Players, id, &player);
}

/// Remove a player and cascade to everything they own: zones, the cards
/// inside them, cards owned elsewhere, their seat, their view scale.
/// Heals the host assignment afterwards.
pub fn remove_player(txn: &mut dyn StoreTxn, player_id: &str) {
    if read_player(&*txn, player_id).is_none() {
        return;
    }
    txn.delete(Coll::Players, player_id);
    txn.delete(Coll::PlayerOrder, player_id);
    txn.delete(Coll::ViewScale, player_id);

    let mut owned_zones: Vec<String> = Vec::new();
    for zone_id in txn.keys(Coll::Zones) {
        if let Some(zone) = read_zone(&*txn, &zone_id) {
            if zone.owner_id == player_id {
                owned_zones.push(zone_id);
            }
        }
    }
    for zone_id in &owned_zones {
        txn.delete(Coll::Zones, zone_id);
        txn.delete(Coll::ZoneCardOrders, zone_id);
    }

    for card_id in txn.keys(Coll::Cards) {
        let Some(card) = read_card(&*txn, &card_id) else {
            continue;
        };
        if card.owner_id == player_id || owned_zones.contains(&card.zone_id) {
            remove_card(txn, &card_id);
        }
    }

    heal_host(txn);
}

/// Reassign `host_id` if the recorded host no longer exists.
pub fn heal_host(txn: &mut dyn StoreTxn) {
    let mut players = std::collections::BTreeMap::new();
    for id in txn.keys(Coll::Players) {
        if let Some(player) = read_player(&*txn, &id) {
            players.insert(id, player);
        }
    }
    let mut seats: Vec<(i64, String)> = txn
        .keys(Coll::PlayerOrder)
        .into_iter()
        .filter_map(|id| {
            txn.get(Coll::PlayerOrder, &id)
                .and_then(|v| v.as_i64())
                .map(|seat| (seat, id))
        })
        .collect();
    seats.sort();
    let order: Vec<String> = seats.into_iter().map(|(_, id)| id).collect();

    let meta = read_room_meta(&*txn);
    let healed = resolve_host(&players, &order, meta.host_id.as_deref());
    if healed != meta.host_id {
        log::info!(
            "room host healed: {:?} -> {:?}",
            meta.host_id,
            healed
        );
        let next = RoomMeta {
            host_id: healed,
            ..meta
        };
        write_as(txn, Coll::Meta, META_ROOM_KEY, &next);
    }
}

// ─── Zones ──────────────────────────────────────────────────────────

pub fn upsert_zone(txn: &mut dyn StoreTxn, zone: &Zone) {
    write_as(txn, Coll::Zones, &zone.id, zone);
    if txn.get(Coll::ZoneCardOrders, &zone.id).is_none() {
        write_zone_order(txn, &zone.id, &zone.card_ids);
    }
}

/// Remove a zone together with every card inside it.
pub fn remove_zone(txn: &mut dyn StoreTxn, zone_id: &str) {
    for card_id in zone_order(&*txn, zone_id) {
        txn.delete(Coll::Cards, &card_id);
    }
    txn.delete(Coll::Zones, zone_id);
    txn.delete(Coll::ZoneCardOrders, zone_id);
}

pub fn reorder_zone_cards(txn: &mut dyn StoreTxn, zone_id: &str, requested: &[String]) {
    if read_zone(&*txn, zone_id).is_none() {
        return;
    }
    let current = zone_order(&*txn, zone_id);
    write_zone_order(txn, zone_id, &sanitize_reorder(&current, requested));
}

// ─── Cards ──────────────────────────────────────────────────────────

pub fn upsert_card(txn: &mut dyn StoreTxn, card: &Card) {
    let mut card = card.clone();
    card.position = card.position.normalized();
    write_as(txn, Coll::Cards, &card.id, &card);

    if read_zone(&*txn, &card.zone_id).is_some() {
        let mut order = zone_order(&*txn, &card.zone_id);
        if !order.contains(&card.id) {
            order.push(card.id.clone());
            write_zone_order(txn, &card.zone_id, &order);
        }
    }
}

pub fn patch_card(txn: &mut dyn StoreTxn, id: &str, patch: &CardPatch) {
    let Some(mut card) = read_card(&*txn, id) else {
        return;
    };
    patch.apply_to(&mut card);
    write_as(txn, Coll::Cards, id, &card);
}

pub fn remove_card(txn: &mut dyn StoreTxn, card_id: &str) {
    let Some(card) = read_card(&*txn, card_id) else {
        return;
    };
    let mut order = zone_order(&*txn, &card.zone_id);
    if order.iter().any(|id| id == card_id) {
        order.retain(|id| id != card_id);
        write_zone_order(txn, &card.zone_id, &order);
    }
    txn.delete(Coll::Cards, card_id);
}

/// Positions of every card currently ordered into `zone_id`, except
/// `skip`.
fn occupied_positions(txn: &dyn StoreTxn, zone_id: &str, skip: &str) -> Vec<(String, Position)> {
    zone_order(txn, zone_id)
        .into_iter()
        .filter(|id| id != skip)
        .filter_map(|id| read_card(txn, &id).map(|c| (id, c.position)))
        .collect()
}

/// Cascade occupants of `slot` downward until everything is collision
/// free. The card claiming the slot is `incoming` and keeps it.
fn displace_occupants(txn: &mut dyn StoreTxn, zone_id: &str, slot: Position, incoming: &str) {
    let residents = occupied_positions(&*txn, zone_id, incoming);
    for (occupant_id, current) in &residents {
        if !current.roughly_equals(slot) {
            continue;
        }
        let mut occupied: Vec<Position> = vec![slot];
        occupied.extend(
            residents
                .iter()
                .filter(|(id, _)| id != occupant_id)
                .map(|(_, pos)| *pos),
        );
        let next = collision::find_free_slot(collision::bump(*current), &occupied);
        if let Some(mut occupant) = read_card(&*txn, occupant_id) {
            occupant.position = next;
            write_as(txn, Coll::Cards, occupant_id, &occupant);
        }
    }
}

/// Move a card between zones (or within one).
///
/// Battlefield destinations resolve slot collisions by cascading the
/// occupant. Leaving a battlefield resets the card to its front face;
/// arriving anywhere that isn't a battlefield untaps it and strips its
/// counters. A token moved off a battlefield is deleted outright.
pub fn move_card(
    txn: &mut dyn StoreTxn,
    card_id: &str,
    to_zone_id: &str,
    position: Option<Position>,
    index: Option<usize>,
) {
    let Some(card) = read_card(&*txn, card_id) else {
        return;
    };
    let Some(to_zone) = read_zone(&*txn, to_zone_id) else {
        return;
    };
    let from_kind = read_zone(&*txn, &card.zone_id).map(|z| z.kind);

    if card.is_token && to_zone.kind != ZoneKind::Battlefield {
        remove_card(txn, card_id);
        return;
    }

    let mut from_order = zone_order(&*txn, &card.zone_id);
    if from_order.iter().any(|id| id == card_id) {
        from_order.retain(|id| id != card_id);
        write_zone_order(txn, &card.zone_id, &from_order);
    }

    let desired = position.map(Position::normalized).unwrap_or(card.position);
    if to_zone.kind == ZoneKind::Battlefield {
        displace_occupants(txn, to_zone_id, desired, card_id);
    }

    let mut card = card;
    card.zone_id = to_zone_id.to_string();
    card.position = desired;
    if from_kind == Some(ZoneKind::Battlefield) && to_zone.kind != ZoneKind::Battlefield {
        card.face_down = false;
        card.face_down_mode = None;
        card.current_face_index = 0;
    }
    if to_zone.kind != ZoneKind::Battlefield {
        card.tapped = false;
        card.rotation = 0.0;
        card.counters.clear();
    }
    write_as(txn, Coll::Cards, card_id, &card);

    let mut to_order = zone_order(&*txn, to_zone_id);
    to_order.retain(|id| id != card_id);
    let at = index.unwrap_or(to_order.len()).min(to_order.len());
    to_order.insert(at, card_id.to_string());
    write_zone_order(txn, to_zone_id, &to_order);
}

/// Clone a battlefield card as a fresh token, one grid step away from
/// its source and guaranteed not to overlap anything.
pub fn duplicate_card(txn: &mut dyn StoreTxn, source_id: &str, new_id: &str) {
    let Some(source) = read_card(&*txn, source_id) else {
        return;
    };
    let Some(zone) = read_zone(&*txn, &source.zone_id) else {
        return;
    };
    if zone.kind != ZoneKind::Battlefield || read_card(&*txn, new_id).is_some() {
        return;
    }

    let occupied: Vec<Position> = occupied_positions(&*txn, &source.zone_id, "")
        .into_iter()
        .map(|(_, pos)| pos)
        .collect();

    let mut token = source.clone();
    token.id = new_id.to_string();
    token.is_token = true;
    token.is_commander = false;
    token.commander_tax = None;
    token.position = collision::find_free_slot(collision::bump(source.position), &occupied);

    write_as(txn, Coll::Cards, new_id, &token);
    let mut order = zone_order(&*txn, &source.zone_id);
    order.push(new_id.to_string());
    write_zone_order(txn, &source.zone_id, &order);
}

pub fn tap_card(txn: &mut dyn StoreTxn, card_id: &str, tapped: bool) {
    let Some(mut card) = read_card(&*txn, card_id) else {
        return;
    };
    card.tapped = tapped;
    write_as(txn, Coll::Cards, card_id, &card);
}

/// Untap every battlefield card the player controls.
pub fn untap_all(txn: &mut dyn StoreTxn, player_id: &str) {
    for card_id in txn.keys(Coll::Cards) {
        let Some(mut card) = read_card(&*txn, &card_id) else {
            continue;
        };
        if !card.tapped || card.controller_id != player_id {
            continue;
        }
        let on_battlefield = read_zone(&*txn, &card.zone_id)
            .map(|z| z.kind == ZoneKind::Battlefield)
            .unwrap_or(false);
        if on_battlefield {
            card.tapped = false;
            write_as(txn, Coll::Cards, &card_id, &card);
        }
    }
}

pub fn transform_card(txn: &mut dyn StoreTxn, card_id: &str, face_index: usize) {
    let Some(mut card) = read_card(&*txn, card_id) else {
        return;
    };
    card.current_face_index = face_index;
    write_as(txn, Coll::Cards, card_id, &card);
}

pub fn set_card_reveal(
    txn: &mut dyn StoreTxn,
    card_id: &str,
    revealed_to_all: bool,
    revealed_to: &[String],
) {
    let Some(mut card) = read_card(&*txn, card_id) else {
        return;
    };
    card.revealed_to_all = revealed_to_all;
    card.revealed_to = revealed_to.to_vec();
    write_as(txn, Coll::Cards, card_id, &card);
}

/// Counters only live on battlefield cards; elsewhere this no-ops.
pub fn add_counter_to_card(txn: &mut dyn StoreTxn, card_id: &str, counter: Counter) {
    let Some(mut card) = read_card(&*txn, card_id) else {
        return;
    };
    let on_battlefield = read_zone(&*txn, &card.zone_id)
        .map(|z| z.kind == ZoneKind::Battlefield)
        .unwrap_or(false);
    if !on_battlefield {
        return;
    }
    merge_counter(&mut card.counters, counter);
    write_as(txn, Coll::Cards, card_id, &card);
}

pub fn remove_counter_from_card(txn: &mut dyn StoreTxn, card_id: &str, kind: &str) {
    let Some(mut card) = read_card(&*txn, card_id) else {
        return;
    };
    card.counters.retain(|c| c.kind != kind);
    write_as(txn, Coll::Cards, card_id, &card);
}

// ─── Room-wide state ────────────────────────────────────────────────

pub fn set_view_scale(txn: &mut dyn StoreTxn, player_id: &str, scale: f64) {
    if !scale.is_finite() {
        return;
    }
    let clamped = scale.clamp(VIEW_SCALE_MIN, VIEW_SCALE_MAX);
    txn.set(Coll::ViewScale, player_id, Value::from(clamped));
}

pub fn set_global_counter(txn: &mut dyn StoreTxn, name: &str, counter: &Counter) {
    if counter.count > 0 {
        write_as(txn, Coll::GlobalCounters, name, counter);
    } else {
        txn.delete(Coll::GlobalCounters, name);
    }
}

pub fn remove_global_counter(txn: &mut dyn StoreTxn, name: &str) {
    txn.delete(Coll::GlobalCounters, name);
}

pub fn patch_room_meta(
    txn: &mut dyn StoreTxn,
    locked: Option<bool>,
    host_id: Option<Option<String>>,
) {
    let mut meta = read_room_meta(&*txn);
    if let Some(locked) = locked {
        meta.locked = locked;
    }
    if let Some(host_id) = host_id {
        meta.host_id = host_id;
    }
    write_as(txn, Coll::Meta, META_ROOM_KEY, &meta);
}

// ─── Join plan ──────────────────────────────────────────────────────

/// Apply a join plan computed by the pure planner. Runs inside one
/// transaction so a peer never sees a half-joined player.
pub fn apply_init_plan(txn: &mut dyn StoreTxn, plan: &InitPlan) {
    if let Some(player) = &plan.upsert_player {
        upsert_player(txn, player);
    }
    if let Some(name) = &plan.patch_local_name {
        patch_player(
            txn,
            &plan.local_player_id,
            &PlayerPatch {
                name: Some(name.clone()),
                ..Default::default()
            },
        );
    }
    for patch in &plan.color_patches {
        patch_player(
            txn,
            &patch.player_id,
            &PlayerPatch {
                color: Some(patch.color.clone()),
                ..Default::default()
            },
        );
    }
    for zone in &plan.zones_to_create {
        upsert_zone(txn, zone);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GameStore, LocalStore};
    use felt_core::init::plan_local_player_init;
    use felt_core::model::{zone_id, GRID_STEP};
    use felt_core::snapshot::{sanitize, GameSnapshot};

    fn seeded_store(players: &[&str]) -> LocalStore {
        let store = LocalStore::new();
        for player in players {
            let snap = current(&store);
            let plan = plan_local_player_init(&snap, player, player, "Guest").unwrap();
            store.transact(&mut |txn| {
                apply_init_plan(txn, &plan);
                heal_host(txn);
            });
        }
        store
    }

    fn current(store: &LocalStore) -> GameSnapshot {
        sanitize(&store.raw_snapshot()).0
    }

    fn place(store: &LocalStore, id: &str, owner: &str, kind: ZoneKind, pos: Position) {
        store.transact(&mut |txn| {
            let mut card = Card::new(id, owner, &zone_id(owner, kind), "Test");
            card.position = pos;
            upsert_card(txn, &card);
        });
    }

    #[test]
    fn test_apply_init_plan_seats_player_with_zones() {
        let store = seeded_store(&["p1"]);
        let snap = current(&store);
        assert!(snap.players.contains_key("p1"));
        assert_eq!(snap.player_order, vec!["p1".to_string()]);
        assert_eq!(
            snap.zones.values().filter(|z| z.owner_id == "p1").count(),
            6
        );
        assert_eq!(snap.meta.host_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_second_player_gets_next_seat() {
        let store = seeded_store(&["p1", "p2"]);
        let snap = current(&store);
        assert_eq!(snap.player_order, vec!["p1".to_string(), "p2".to_string()]);
        // Host stays with the first player.
        assert_eq!(snap.meta.host_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_move_to_exile_untaps_unconditionally() {
        let store = seeded_store(&["me"]);
        place(&store, "c1", "me", ZoneKind::Battlefield, Position::new(0.1, 0.1));
        store.transact(&mut |txn| tap_card(txn, "c1", true));

        store.transact(&mut |txn| {
            move_card(txn, "c1", &zone_id("me", ZoneKind::Exile), None, None);
        });

        let snap = current(&store);
        let card = &snap.cards["c1"];
        assert!(!card.tapped);
        assert_eq!(card.zone_id, zone_id("me", ZoneKind::Exile));
        assert!(snap.zones[&zone_id("me", ZoneKind::Battlefield)]
            .card_ids
            .is_empty());
    }

    #[test]
    fn test_move_collision_cascades_occupant() {
        let store = seeded_store(&["p1"]);
        let bf = zone_id("p1", ZoneKind::Battlefield);
        place(&store, "sitting", "p1", ZoneKind::Battlefield, Position::new(0.5, 0.5));
        place(&store, "moving", "p1", ZoneKind::Hand, Position::ORIGIN);

        store.transact(&mut |txn| {
            move_card(txn, "moving", &bf, Some(Position::new(0.5, 0.5)), None);
        });

        let snap = current(&store);
        // The incoming card takes the slot; the occupant cascades down.
        assert!(snap.cards["moving"]
            .position
            .roughly_equals(Position::new(0.5, 0.5)));
        assert!(!snap.cards["sitting"]
            .position
            .roughly_equals(Position::new(0.5, 0.5)));
    }

    #[test]
    fn test_collision_free_after_many_moves_to_same_slot() {
        let store = seeded_store(&["p1"]);
        let bf = zone_id("p1", ZoneKind::Battlefield);
        for i in 0..6 {
            let id = format!("c{i}");
            place(&store, &id, "p1", ZoneKind::Hand, Position::ORIGIN);
            store.transact(&mut |txn| {
                move_card(txn, &id, &bf, Some(Position::new(0.3, 0.3)), None);
            });
        }

        let snap = current(&store);
        let positions: Vec<Position> = snap
            .zones[&bf]
            .card_ids
            .iter()
            .map(|id| snap.cards[id].position)
            .collect();
        for (i, a) in positions.iter().enumerate() {
            for b in positions.iter().skip(i + 1) {
                assert!(!a.roughly_equals(*b), "{a:?} collides with {b:?}");
            }
        }
    }

    #[test]
    fn test_token_deleted_on_leaving_battlefield() {
        let store = seeded_store(&["p1"]);
        place(&store, "t1", "p1", ZoneKind::Battlefield, Position::new(0.2, 0.2));
        store.transact(&mut |txn| {
            if let Some(mut card) = read_card(&*txn, "t1") {
                card.is_token = true;
                write_as(txn, Coll::Cards, "t1", &card);
            }
        });

        store.transact(&mut |txn| {
            move_card(txn, "t1", &zone_id("p1", ZoneKind::Graveyard), None, None);
        });

        let snap = current(&store);
        assert!(!snap.cards.contains_key("t1"));
        assert!(snap.zones[&zone_id("p1", ZoneKind::Graveyard)]
            .card_ids
            .is_empty());
    }

    #[test]
    fn test_non_token_survives_the_same_move() {
        let store = seeded_store(&["p1"]);
        place(&store, "c1", "p1", ZoneKind::Battlefield, Position::new(0.2, 0.2));
        store.transact(&mut |txn| {
            move_card(txn, "c1", &zone_id("p1", ZoneKind::Graveyard), None, None);
        });
        assert!(current(&store).cards.contains_key("c1"));
    }

    #[test]
    fn test_duplicate_is_bumped_token() {
        let store = seeded_store(&["p1"]);
        place(&store, "c1", "p1", ZoneKind::Battlefield, Position::new(0.1, 0.1));

        store.transact(&mut |txn| duplicate_card(txn, "c1", "c1-token"));

        let snap = current(&store);
        let token = &snap.cards["c1-token"];
        assert!(token.is_token);
        assert!((token.position.y - (0.1 + GRID_STEP)).abs() < 1e-9);
        assert!(!token.position.roughly_equals(snap.cards["c1"].position));
    }

    #[test]
    fn test_duplicate_off_battlefield_noops() {
        let store = seeded_store(&["p1"]);
        place(&store, "c1", "p1", ZoneKind::Hand, Position::ORIGIN);
        store.transact(&mut |txn| duplicate_card(txn, "c1", "c1-token"));
        assert!(!current(&store).cards.contains_key("c1-token"));
    }

    #[test]
    fn test_stale_targets_noop_silently() {
        let store = seeded_store(&["p1"]);
        store.transact(&mut |txn| {
            move_card(txn, "ghost", &zone_id("p1", ZoneKind::Exile), None, None);
            tap_card(txn, "ghost", true);
            patch_card(txn, "ghost", &CardPatch::default());
            remove_card(txn, "ghost");
            duplicate_card(txn, "ghost", "ghost-2");
        });
        let snap = current(&store);
        assert!(snap.cards.is_empty());
    }

    #[test]
    fn test_counters_stripped_outside_battlefield() {
        let store = seeded_store(&["p1"]);
        place(&store, "c1", "p1", ZoneKind::Battlefield, Position::new(0.4, 0.4));
        store.transact(&mut |txn| {
            add_counter_to_card(txn, "c1", Counter::new("+1/+1", 2));
        });
        assert_eq!(current(&store).cards["c1"].counters.len(), 1);

        store.transact(&mut |txn| {
            move_card(txn, "c1", &zone_id("p1", ZoneKind::Graveyard), None, None);
        });
        assert!(current(&store).cards["c1"].counters.is_empty());

        // And adding in a non-battlefield zone is refused.
        store.transact(&mut |txn| {
            add_counter_to_card(txn, "c1", Counter::new("+1/+1", 2));
        });
        assert!(current(&store).cards["c1"].counters.is_empty());
    }

    #[test]
    fn test_untap_all_only_touches_controllers_battlefield_cards() {
        let store = seeded_store(&["p1", "p2"]);
        place(&store, "mine", "p1", ZoneKind::Battlefield, Position::new(0.1, 0.1));
        place(&store, "theirs", "p2", ZoneKind::Battlefield, Position::new(0.2, 0.2));
        store.transact(&mut |txn| {
            tap_card(txn, "mine", true);
            tap_card(txn, "theirs", true);
        });

        store.transact(&mut |txn| untap_all(txn, "p1"));

        let snap = current(&store);
        assert!(!snap.cards["mine"].tapped);
        assert!(snap.cards["theirs"].tapped);
    }

    #[test]
    fn test_reorder_keeps_membership() {
        let store = seeded_store(&["p1"]);
        let lib = zone_id("p1", ZoneKind::Library);
        for id in ["a", "b", "c"] {
            place(&store, id, "p1", ZoneKind::Library, Position::ORIGIN);
        }

        store.transact(&mut |txn| {
            reorder_zone_cards(
                txn,
                &lib,
                &["c".to_string(), "nope".to_string(), "a".to_string()],
            );
        });

        assert_eq!(
            current(&store).zones[&lib].card_ids,
            vec!["c".to_string(), "a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_remove_player_cascades_and_heals_host() {
        let store = seeded_store(&["p1", "p2"]);
        place(&store, "c1", "p1", ZoneKind::Battlefield, Position::new(0.1, 0.1));
        // p1's card sitting on p2's battlefield still dies with p1.
        place(&store, "c2", "p1", ZoneKind::Battlefield, Position::new(0.3, 0.3));
        store.transact(&mut |txn| {
            move_card(
                txn,
                "c2",
                &zone_id("p2", ZoneKind::Battlefield),
                Some(Position::new(0.3, 0.3)),
                None,
            );
        });

        store.transact(&mut |txn| remove_player(txn, "p1"));

        let snap = current(&store);
        assert!(!snap.players.contains_key("p1"));
        assert!(snap.zones.values().all(|z| z.owner_id != "p1"));
        assert!(!snap.cards.contains_key("c1"));
        assert!(!snap.cards.contains_key("c2"));
        assert_eq!(snap.meta.host_id.as_deref(), Some("p2"));
    }

    #[test]
    fn test_view_scale_clamped() {
        let store = seeded_store(&["p1"]);
        store.transact(&mut |txn| set_view_scale(txn, "p1", 99.0));
        assert_eq!(current(&store).view_scale["p1"], VIEW_SCALE_MAX);
        store.transact(&mut |txn| set_view_scale(txn, "p1", f64::NAN));
        assert_eq!(current(&store).view_scale["p1"], VIEW_SCALE_MAX);
    }

    #[test]
    fn test_global_counter_lifecycle() {
        let store = seeded_store(&["p1"]);
        store.transact(&mut |txn| {
            set_global_counter(txn, "turn", &Counter::new("turn", 3));
        });
        assert_eq!(current(&store).global_counters["turn"].count, 3);

        store.transact(&mut |txn| {
            set_global_counter(txn, "turn", &Counter::new("turn", 0));
        });
        assert!(current(&store).global_counters.is_empty());
    }

    #[test]
    fn test_legacy_pixel_position_migrates_through_move() {
        let store = seeded_store(&["p1"]);
        let bf = zone_id("p1", ZoneKind::Battlefield);
        place(&store, "c1", "p1", ZoneKind::Hand, Position::ORIGIN);

        store.transact(&mut |txn| {
            move_card(txn, "c1", &bf, Some(Position::new(960.0, 540.0)), None);
        });

        let pos = current(&store).cards["c1"].position;
        assert!(pos.x <= 1.0 && pos.y <= 1.0);
    }
}
