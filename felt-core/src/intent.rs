//! Optimistic local intents.
//!
//! Every mutation the local player performs is recorded as a tagged
//! [`Intent`] — a closed set of mutation kinds, so broadcast handling
//! and replay are exhaustively matched rather than dispatched by name.
//! Intents queue in a [`PendingIntentQueue`] until the authoritative
//! snapshot reflects their effect; reconciliation replays the still
//! pending ones on top of each fresh snapshot, in submission order.
//! Replay must be idempotent: applying an intent whose effect is
//! already present leaves the snapshot unchanged.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collision;
use crate::init::resolve_host;
use crate::model::{
    merge_counter, Card, CardId, CardPatch, Counter, PlayerId, PlayerPatch, Position, ZoneId,
    ZoneKind,
};
use crate::snapshot::GameSnapshot;

/// Replay passes after which an unconfirmed intent is discarded — the
/// authoritative state has contradicted it for too long.
pub const MAX_REPLAY_PASSES: u64 = 64;

/// Every mutation kind the client can perform, as a closed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Intent {
    AddCard {
        card: Card,
    },
    MoveCard {
        card_id: CardId,
        to_zone: ZoneId,
        position: Option<Position>,
        index: Option<usize>,
    },
    TapCard {
        card_id: CardId,
        tapped: bool,
    },
    UntapAll {
        player_id: PlayerId,
    },
    TransformCard {
        card_id: CardId,
        face_index: usize,
    },
    UpdateCard {
        card_id: CardId,
        patch: CardPatch,
    },
    RemoveCard {
        card_id: CardId,
    },
    DuplicateCard {
        source_id: CardId,
        new_id: CardId,
    },
    SetCardReveal {
        card_id: CardId,
        revealed_to_all: bool,
        revealed_to: Vec<PlayerId>,
    },
    AddCounter {
        card_id: CardId,
        counter: Counter,
    },
    RemoveCounter {
        card_id: CardId,
        kind: String,
    },
    ReorderZone {
        zone_id: ZoneId,
        card_ids: Vec<CardId>,
    },
    UpdatePlayer {
        player_id: PlayerId,
        patch: PlayerPatch,
    },
    RemovePlayer {
        player_id: PlayerId,
    },
    SetViewScale {
        player_id: PlayerId,
        scale: f64,
    },
    SetGlobalCounter {
        name: String,
        counter: Counter,
    },
    RemoveGlobalCounter {
        name: String,
    },
    PatchRoomMeta {
        locked: Option<bool>,
        host_id: Option<Option<PlayerId>>,
    },
}

impl Intent {
    /// Stable tag for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Intent::AddCard { .. } => "add_card",
            Intent::MoveCard { .. } => "move_card",
            Intent::TapCard { .. } => "tap_card",
            Intent::UntapAll { .. } => "untap_all",
            Intent::TransformCard { .. } => "transform_card",
            Intent::UpdateCard { .. } => "update_card",
            Intent::RemoveCard { .. } => "remove_card",
            Intent::DuplicateCard { .. } => "duplicate_card",
            Intent::SetCardReveal { .. } => "set_card_reveal",
            Intent::AddCounter { .. } => "add_counter",
            Intent::RemoveCounter { .. } => "remove_counter",
            Intent::ReorderZone { .. } => "reorder_zone",
            Intent::UpdatePlayer { .. } => "update_player",
            Intent::RemovePlayer { .. } => "remove_player",
            Intent::SetViewScale { .. } => "set_view_scale",
            Intent::SetGlobalCounter { .. } => "set_global_counter",
            Intent::RemoveGlobalCounter { .. } => "remove_global_counter",
            Intent::PatchRoomMeta { .. } => "patch_room_meta",
        }
    }

    /// Apply this intent to a snapshot, as the optimistic local reducer.
    ///
    /// Missing targets are a silent no-op: a peer may have deleted the
    /// entity concurrently, and "no visible effect" is a valid outcome.
    pub fn apply_local(&self, snap: &mut GameSnapshot) {
        match self {
            Intent::AddCard { card } => {
                let mut card = card.clone();
                card.position = card.position.normalized();
                if let Some(zone) = snap.zones.get_mut(&card.zone_id) {
                    if !zone.card_ids.contains(&card.id) {
                        zone.card_ids.push(card.id.clone());
                    }
                }
                snap.cards.insert(card.id.clone(), card);
            }
            Intent::MoveCard {
                card_id,
                to_zone,
                position,
                index,
            } => {
                apply_move(snap, card_id, to_zone, *position, *index);
            }
            Intent::TapCard { card_id, tapped } => {
                if let Some(card) = snap.cards.get_mut(card_id) {
                    card.tapped = *tapped;
                }
            }
            Intent::UntapAll { player_id } => {
                let battlefield_zones: Vec<ZoneId> = snap
                    .zones
                    .values()
                    .filter(|z| z.kind == ZoneKind::Battlefield)
                    .map(|z| z.id.clone())
                    .collect();
                for card in snap.cards.values_mut() {
                    if card.controller_id == *player_id
                        && battlefield_zones.contains(&card.zone_id)
                    {
                        card.tapped = false;
                    }
                }
            }
            Intent::TransformCard {
                card_id,
                face_index,
            } => {
                if let Some(card) = snap.cards.get_mut(card_id) {
                    card.current_face_index = *face_index;
                }
            }
            Intent::UpdateCard { card_id, patch } => {
                if let Some(card) = snap.cards.get_mut(card_id) {
                    patch.apply_to(card);
                }
            }
            Intent::RemoveCard { card_id } => {
                remove_card_from_snapshot(snap, card_id);
            }
            Intent::DuplicateCard { source_id, new_id } => {
                let Some(source) = snap.cards.get(source_id) else {
                    return;
                };
                let Some(zone) = snap.zones.get(&source.zone_id) else {
                    return;
                };
                if zone.kind != ZoneKind::Battlefield || snap.cards.contains_key(new_id) {
                    return;
                }
                let occupied: Vec<Position> = zone
                    .card_ids
                    .iter()
                    .filter_map(|id| snap.cards.get(id))
                    .map(|c| c.position)
                    .collect();
                let mut token = source.clone();
                token.id = new_id.clone();
                token.is_token = true;
                token.is_commander = false;
                token.commander_tax = None;
                token.position =
                    collision::find_free_slot(collision::bump(source.position), &occupied);
                let zone_id = token.zone_id.clone();
                snap.cards.insert(new_id.clone(), token);
                if let Some(zone) = snap.zones.get_mut(&zone_id) {
                    zone.card_ids.push(new_id.clone());
                }
            }
            Intent::SetCardReveal {
                card_id,
                revealed_to_all,
                revealed_to,
            } => {
                if let Some(card) = snap.cards.get_mut(card_id) {
                    card.revealed_to_all = *revealed_to_all;
                    card.revealed_to = revealed_to.clone();
                }
            }
            Intent::AddCounter { card_id, counter } => {
                let on_battlefield = snap
                    .zone_of_card(card_id)
                    .map(|z| z.kind == ZoneKind::Battlefield)
                    .unwrap_or(false);
                if !on_battlefield {
                    return;
                }
                if let Some(card) = snap.cards.get_mut(card_id) {
                    merge_counter(&mut card.counters, counter.clone());
                }
            }
            Intent::RemoveCounter { card_id, kind } => {
                if let Some(card) = snap.cards.get_mut(card_id) {
                    card.counters.retain(|c| c.kind != *kind);
                }
            }
            Intent::ReorderZone { zone_id, card_ids } => {
                if let Some(zone) = snap.zones.get_mut(zone_id) {
                    zone.card_ids = sanitize_reorder(&zone.card_ids, card_ids);
                }
            }
            Intent::UpdatePlayer { player_id, patch } => {
                if let Some(player) = snap.players.get_mut(player_id) {
                    patch.apply_to(player);
                }
            }
            Intent::RemovePlayer { player_id } => {
                apply_remove_player(snap, player_id);
            }
            Intent::SetViewScale { player_id, scale } => {
                if scale.is_finite() {
                    let clamped = scale.clamp(crate::model::VIEW_SCALE_MIN, crate::model::VIEW_SCALE_MAX);
                    snap.view_scale.insert(player_id.clone(), clamped);
                }
            }
            Intent::SetGlobalCounter { name, counter } => {
                if counter.count > 0 {
                    snap.global_counters.insert(name.clone(), counter.clone());
                } else {
                    snap.global_counters.remove(name);
                }
            }
            Intent::RemoveGlobalCounter { name } => {
                snap.global_counters.remove(name);
            }
            Intent::PatchRoomMeta { locked, host_id } => {
                if let Some(locked) = locked {
                    snap.meta.locked = *locked;
                }
                if let Some(host_id) = host_id {
                    snap.meta.host_id = host_id.clone();
                }
            }
        }
    }

    /// Has the authoritative snapshot already absorbed this intent?
    ///
    /// Content equality on the mutated fields — not elapsed time. A
    /// missing target counts as confirmed: either the effect was a
    /// deletion, or a peer deleted the entity and the intent can never
    /// apply again.
    pub fn confirmed_by(&self, snap: &GameSnapshot) -> bool {
        match self {
            Intent::AddCard { card } => snap.cards.contains_key(&card.id),
            Intent::MoveCard {
                card_id, to_zone, ..
            } => match snap.cards.get(card_id) {
                None => true, // deleted, or a token that left the battlefield
                Some(card) => {
                    card.zone_id == *to_zone
                        && snap
                            .zones
                            .get(to_zone)
                            .map(|z| z.card_ids.contains(card_id))
                            .unwrap_or(true)
                }
            },
            Intent::TapCard { card_id, tapped } => snap
                .cards
                .get(card_id)
                .map(|c| c.tapped == *tapped)
                .unwrap_or(true),
            Intent::UntapAll { player_id } => !snap.cards.values().any(|c| {
                c.tapped
                    && c.controller_id == *player_id
                    && snap
                        .zones
                        .get(&c.zone_id)
                        .map(|z| z.kind == ZoneKind::Battlefield)
                        .unwrap_or(false)
            }),
            Intent::TransformCard {
                card_id,
                face_index,
            } => snap
                .cards
                .get(card_id)
                .map(|c| c.current_face_index == *face_index)
                .unwrap_or(true),
            Intent::UpdateCard { card_id, patch } => match snap.cards.get(card_id) {
                None => true,
                Some(card) => {
                    let mut patched = card.clone();
                    patch.apply_to(&mut patched);
                    patched == *card
                }
            },
            Intent::RemoveCard { card_id } => !snap.cards.contains_key(card_id),
            Intent::DuplicateCard { new_id, .. } => snap.cards.contains_key(new_id),
            Intent::SetCardReveal {
                card_id,
                revealed_to_all,
                revealed_to,
            } => snap
                .cards
                .get(card_id)
                .map(|c| c.revealed_to_all == *revealed_to_all && c.revealed_to == *revealed_to)
                .unwrap_or(true),
            Intent::AddCounter { card_id, counter } => snap
                .cards
                .get(card_id)
                .map(|c| c.counters.iter().any(|entry| entry.kind == counter.kind))
                .unwrap_or(true),
            Intent::RemoveCounter { card_id, kind } => snap
                .cards
                .get(card_id)
                .map(|c| !c.counters.iter().any(|entry| entry.kind == *kind))
                .unwrap_or(true),
            Intent::ReorderZone { zone_id, card_ids } => match snap.zones.get(zone_id) {
                None => true,
                Some(zone) => zone.card_ids == sanitize_reorder(&zone.card_ids, card_ids),
            },
            Intent::UpdatePlayer { player_id, patch } => match snap.players.get(player_id) {
                None => true,
                Some(player) => {
                    let mut patched = player.clone();
                    patch.apply_to(&mut patched);
                    patched == *player
                }
            },
            Intent::RemovePlayer { player_id } => !snap.players.contains_key(player_id),
            Intent::SetViewScale { player_id, scale } => {
                let clamped =
                    scale.clamp(crate::model::VIEW_SCALE_MIN, crate::model::VIEW_SCALE_MAX);
                snap.view_scale
                    .get(player_id)
                    .map(|s| (s - clamped).abs() < 1e-9)
                    .unwrap_or(false)
            }
            Intent::SetGlobalCounter { name, counter } => {
                if counter.count > 0 {
                    snap.global_counters.get(name) == Some(counter)
                } else {
                    !snap.global_counters.contains_key(name)
                }
            }
            Intent::RemoveGlobalCounter { name } => !snap.global_counters.contains_key(name),
            Intent::PatchRoomMeta { locked, host_id } => {
                locked.map(|l| snap.meta.locked == l).unwrap_or(true)
                    && host_id
                        .as_ref()
                        .map(|h| snap.meta.host_id == *h)
                        .unwrap_or(true)
            }
        }
    }
}

/// Reorder sanitation: keep only current members, in the requested
/// order, with anything unmentioned appended in its old order. Never
/// drops or duplicates a card.
pub fn sanitize_reorder(current: &[CardId], requested: &[CardId]) -> Vec<CardId> {
    let mut next: Vec<CardId> = Vec::with_capacity(current.len());
    for id in requested {
        if current.contains(id) && !next.contains(id) {
            next.push(id.clone());
        }
    }
    for id in current {
        if !next.contains(id) {
            next.push(id.clone());
        }
    }
    next
}

fn remove_card_from_snapshot(snap: &mut GameSnapshot, card_id: &str) {
    if let Some(card) = snap.cards.remove(card_id) {
        if let Some(zone) = snap.zones.get_mut(&card.zone_id) {
            zone.card_ids.retain(|id| id != card_id);
        }
    }
}

fn apply_move(
    snap: &mut GameSnapshot,
    card_id: &str,
    to_zone_id: &str,
    position: Option<Position>,
    index: Option<usize>,
) {
    let Some(card) = snap.cards.get(card_id) else {
        return;
    };
    let Some(to_kind) = snap.zones.get(to_zone_id).map(|z| z.kind) else {
        return;
    };
    let from_kind = snap.zones.get(&card.zone_id).map(|z| z.kind);
    let from_zone_id = card.zone_id.clone();

    // A token only exists while on a battlefield.
    if card.is_token && to_kind != ZoneKind::Battlefield {
        remove_card_from_snapshot(snap, card_id);
        return;
    }

    if let Some(zone) = snap.zones.get_mut(&from_zone_id) {
        zone.card_ids.retain(|id| id != card_id);
    }

    let desired = position
        .map(Position::normalized)
        .unwrap_or_else(|| snap.cards[card_id].position.normalized());
    if to_kind == ZoneKind::Battlefield {
        // The incoming card takes the slot; occupants already there
        // cascade downward until they find a free one.
        displace_occupants(snap, to_zone_id, desired, card_id);
    }

    if let Some(card) = snap.cards.get_mut(card_id) {
        card.zone_id = to_zone_id.to_string();
        card.position = desired;
        if from_kind == Some(ZoneKind::Battlefield) && to_kind != ZoneKind::Battlefield {
            card.face_down = false;
            card.face_down_mode = None;
            card.current_face_index = 0;
        }
        if to_kind != ZoneKind::Battlefield {
            card.tapped = false;
            card.rotation = 0.0;
            card.counters.clear();
        }
    }

    if let Some(zone) = snap.zones.get_mut(to_zone_id) {
        let at = index.unwrap_or(zone.card_ids.len()).min(zone.card_ids.len());
        zone.card_ids.insert(at, card_id.to_string());
    }
}

/// Cascade every occupant of `slot` on a battlefield downward until it
/// no longer collides with anything (including the slot being claimed).
fn displace_occupants(snap: &mut GameSnapshot, zone_id: &str, slot: Position, incoming: &str) {
    let Some(zone) = snap.zones.get(zone_id) else {
        return;
    };
    let residents: Vec<CardId> = zone
        .card_ids
        .iter()
        .filter(|id| id.as_str() != incoming)
        .cloned()
        .collect();

    for occupant_id in &residents {
        let Some(current) = snap.cards.get(occupant_id).map(|c| c.position) else {
            continue;
        };
        if !current.roughly_equals(slot) {
            continue;
        }
        let mut occupied: Vec<Position> = vec![slot];
        occupied.extend(
            residents
                .iter()
                .filter(|id| *id != occupant_id)
                .filter_map(|id| snap.cards.get(id))
                .map(|c| c.position),
        );
        let next = collision::find_free_slot(collision::bump(current), &occupied);
        if let Some(occupant) = snap.cards.get_mut(occupant_id) {
            occupant.position = next;
        }
    }
}

fn apply_remove_player(snap: &mut GameSnapshot, player_id: &str) {
    if snap.players.remove(player_id).is_none() {
        return;
    }
    snap.player_order.retain(|id| id != player_id);
    snap.view_scale.remove(player_id);

    let owned_zones: Vec<ZoneId> = snap
        .zones
        .values()
        .filter(|z| z.owner_id == player_id)
        .map(|z| z.id.clone())
        .collect();
    for zone_id in &owned_zones {
        snap.zones.remove(zone_id);
    }
    let doomed: Vec<CardId> = snap
        .cards
        .values()
        .filter(|c| c.owner_id == player_id || owned_zones.contains(&c.zone_id))
        .map(|c| c.id.clone())
        .collect();
    for card_id in doomed {
        remove_card_from_snapshot(snap, &card_id);
    }

    snap.meta.host_id = resolve_host(
        &snap.players,
        &snap.player_order,
        snap.meta.host_id.as_deref(),
    );
}

// ─── Pending queue ──────────────────────────────────────────────────

/// A locally-submitted mutation awaiting authoritative confirmation.
#[derive(Debug, Clone)]
pub struct PendingIntent {
    pub id: Uuid,
    pub seq: u64,
    pub intent: Intent,
    /// Came in over the intent channel rather than from local input.
    pub is_remote: bool,
    passes: u64,
}

/// Ordered queue of optimistic intents, replayed onto every fresh
/// authoritative snapshot until confirmed or contradicted.
#[derive(Debug, Default)]
pub struct PendingIntentQueue {
    entries: Vec<PendingIntent>,
    next_seq: u64,
}

impl PendingIntentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an intent; returns its stable id.
    pub fn push(&mut self, intent: Intent, is_remote: bool) -> Uuid {
        let id = Uuid::new_v4();
        self.next_seq += 1;
        self.entries.push(PendingIntent {
            id,
            seq: self.next_seq,
            intent,
            is_remote,
            passes: 0,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Retire confirmed/expired intents against `snap`, then replay the
    /// survivors onto it in submission order. Returns how many were
    /// retired this pass.
    pub fn reconcile_onto(&mut self, snap: &mut GameSnapshot) -> usize {
        let mut retired = 0;
        let mut kept: Vec<PendingIntent> = Vec::with_capacity(self.entries.len());
        for mut pending in self.entries.drain(..) {
            if pending.intent.confirmed_by(snap) {
                retired += 1;
                continue;
            }
            if pending.passes >= MAX_REPLAY_PASSES {
                log::debug!(
                    "discarding unconfirmed intent {} ({}) after {} passes",
                    pending.id,
                    pending.intent.kind(),
                    pending.passes
                );
                retired += 1;
                continue;
            }
            pending.intent.apply_local(snap);
            pending.passes += 1;
            kept.push(pending);
        }
        self.entries = kept;
        retired
    }
}
