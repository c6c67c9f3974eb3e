//! Permission-checked mutation entry points.
//!
//! Every UI intent funnels through [`GameActions`]: permission check
//! first, then an optimistic pending-intent record, then the store
//! write (CRDT document in multiplayer, [`crate::store::LocalStore`] in
//! solo), then a broadcast over the intent channel when one is
//! attached. A denial is logged and silently swallowed — no state
//! change, no broadcast, no error. The permission table and the apply
//! table are both exhaustive matches over [`Intent`], so adding a
//! mutation kind without wiring it up fails to compile.

use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use felt_core::intent::{Intent, PendingIntentQueue};
use felt_core::model::{
    Card, CardPatch, Counter, Player, PlayerPatch, Position, RoomMeta, Zone, ZoneKind,
};
use felt_core::permission::{
    can_create_token, can_modify_card_state, can_move_card, can_tap_card, can_update_player,
    Decision,
};
use felt_core::snapshot::META_ROOM_KEY;

use crate::mutations;
use crate::store::{Coll, GameStore, StoreTxn};
use crate::transport::IntentEnvelope;

/// Outcome of an action attempt. Denials carry the reason that was
/// logged; they are expected states, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Applied,
    Denied(String),
}

impl ActionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ActionOutcome::Applied)
    }
}

type OutboundHook = Box<dyn Fn(&IntentEnvelope) + Send + Sync>;

/// The mutation surface for one actor against one store.
pub struct GameActions {
    room_id: String,
    actor: String,
    store: Arc<dyn GameStore>,
    pending: Arc<Mutex<PendingIntentQueue>>,
    outbound: Mutex<Option<OutboundHook>>,
    seq: AtomicU64,
}

impl GameActions {
    pub fn new(
        room_id: &str,
        actor: &str,
        store: Arc<dyn GameStore>,
        pending: Arc<Mutex<PendingIntentQueue>>,
    ) -> Self {
        Self {
            room_id: room_id.to_string(),
            actor: actor.to_string(),
            store,
            pending,
            outbound: Mutex::new(None),
            seq: AtomicU64::new(0),
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Attach the intent-channel broadcast hook (multiplayer only).
    pub fn set_outbound(&self, hook: Option<OutboundHook>) {
        *self.outbound.lock().unwrap_or_else(|e| e.into_inner()) = hook;
    }

    /// Submit a local mutation: check, queue, write, broadcast.
    pub fn submit(&self, intent: Intent) -> ActionOutcome {
        let decision = self.decide(&self.actor, &intent);
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_default();
            log::info!(
                "action {} denied for {}: {reason}",
                intent.kind(),
                self.actor
            );
            return ActionOutcome::Denied(reason);
        }

        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(intent.clone(), false);

        self.store.transact(&mut |txn| apply_intent(txn, &intent));

        let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hook) = outbound.as_ref() {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
            hook(&IntentEnvelope::new(
                &self.room_id,
                &self.actor,
                seq,
                intent,
            ));
        }
        ActionOutcome::Applied
    }

    /// Accept a peer's intent from the low-latency channel.
    ///
    /// The intent is permission-checked against the *sender* and, when
    /// allowed, queued as an optimistic remote echo — the authoritative
    /// effect arrives through the document sync, which retires it.
    pub fn accept_remote(&self, envelope: &IntentEnvelope) -> ActionOutcome {
        if envelope.room_id != self.room_id {
            return ActionOutcome::Denied("wrong room".into());
        }
        let decision = self.decide(&envelope.sender, &envelope.intent);
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_default();
            log::info!(
                "remote intent {} from {} rejected: {reason}",
                envelope.intent.kind(),
                envelope.sender
            );
            return ActionOutcome::Denied(reason);
        }
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(envelope.intent.clone(), true);
        ActionOutcome::Applied
    }

    // ─── Convenience entry points ───────────────────────────────────

    pub fn add_card(&self, card: Card) -> ActionOutcome {
        self.submit(Intent::AddCard { card })
    }

    pub fn move_card(
        &self,
        card_id: &str,
        to_zone: &str,
        position: Option<Position>,
        index: Option<usize>,
    ) -> ActionOutcome {
        self.submit(Intent::MoveCard {
            card_id: card_id.to_string(),
            to_zone: to_zone.to_string(),
            position,
            index,
        })
    }

    pub fn tap_card(&self, card_id: &str, tapped: bool) -> ActionOutcome {
        self.submit(Intent::TapCard {
            card_id: card_id.to_string(),
            tapped,
        })
    }

    pub fn untap_all(&self) -> ActionOutcome {
        self.submit(Intent::UntapAll {
            player_id: self.actor.clone(),
        })
    }

    pub fn transform_card(&self, card_id: &str, face_index: usize) -> ActionOutcome {
        self.submit(Intent::TransformCard {
            card_id: card_id.to_string(),
            face_index,
        })
    }

    pub fn update_card(&self, card_id: &str, patch: CardPatch) -> ActionOutcome {
        self.submit(Intent::UpdateCard {
            card_id: card_id.to_string(),
            patch,
        })
    }

    pub fn remove_card(&self, card_id: &str) -> ActionOutcome {
        self.submit(Intent::RemoveCard {
            card_id: card_id.to_string(),
        })
    }

    /// Clone a battlefield card as a token. Returns the new card id on
    /// success.
    pub fn duplicate_card(&self, source_id: &str) -> Result<String, ActionOutcome> {
        let new_id = format!("{source_id}-{}", &Uuid::new_v4().simple().to_string()[..8]);
        match self.submit(Intent::DuplicateCard {
            source_id: source_id.to_string(),
            new_id: new_id.clone(),
        }) {
            ActionOutcome::Applied => Ok(new_id),
            denied => Err(denied),
        }
    }

    pub fn set_card_reveal(
        &self,
        card_id: &str,
        revealed_to_all: bool,
        revealed_to: Vec<String>,
    ) -> ActionOutcome {
        self.submit(Intent::SetCardReveal {
            card_id: card_id.to_string(),
            revealed_to_all,
            revealed_to,
        })
    }

    pub fn add_counter(&self, card_id: &str, counter: Counter) -> ActionOutcome {
        self.submit(Intent::AddCounter {
            card_id: card_id.to_string(),
            counter,
        })
    }

    pub fn remove_counter(&self, card_id: &str, kind: &str) -> ActionOutcome {
        self.submit(Intent::RemoveCounter {
            card_id: card_id.to_string(),
            kind: kind.to_string(),
        })
    }

    pub fn reorder_zone(&self, zone_id: &str, card_ids: Vec<String>) -> ActionOutcome {
        self.submit(Intent::ReorderZone {
            zone_id: zone_id.to_string(),
            card_ids,
        })
    }

    pub fn update_player(&self, player_id: &str, patch: PlayerPatch) -> ActionOutcome {
        self.submit(Intent::UpdatePlayer {
            player_id: player_id.to_string(),
            patch,
        })
    }

    pub fn remove_player(&self, player_id: &str) -> ActionOutcome {
        self.submit(Intent::RemovePlayer {
            player_id: player_id.to_string(),
        })
    }

    pub fn set_view_scale(&self, scale: f64) -> ActionOutcome {
        self.submit(Intent::SetViewScale {
            player_id: self.actor.clone(),
            scale,
        })
    }

    pub fn set_global_counter(&self, name: &str, counter: Counter) -> ActionOutcome {
        self.submit(Intent::SetGlobalCounter {
            name: name.to_string(),
            counter,
        })
    }

    pub fn remove_global_counter(&self, name: &str) -> ActionOutcome {
        self.submit(Intent::RemoveGlobalCounter {
            name: name.to_string(),
        })
    }

    pub fn set_room_locked(&self, locked: bool) -> ActionOutcome {
        self.submit(Intent::PatchRoomMeta {
            locked: Some(locked),
            host_id: None,
        })
    }

    // ─── Permission table ───────────────────────────────────────────

    fn record<T: DeserializeOwned>(&self, coll: Coll, key: &str) -> Option<T> {
        self.store
            .get(coll, key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    fn card(&self, id: &str) -> Option<Card> {
        self.record(Coll::Cards, id)
    }

    fn zone(&self, id: &str) -> Option<Zone> {
        self.record(Coll::Zones, id)
    }

    fn player(&self, id: &str) -> Option<Player> {
        self.record(Coll::Players, id)
    }

    fn room_meta(&self) -> RoomMeta {
        self.record(Coll::Meta, META_ROOM_KEY).unwrap_or_default()
    }

    /// Can `actor` perform `intent` right now?
    ///
    /// A mutation whose target has concurrently vanished is allowed
    /// through: the helper no-ops, and "no visible effect" is the
    /// correct outcome for a stale entity.
    fn decide(&self, actor: &str, intent: &Intent) -> Decision {
        match intent {
            Intent::AddCard { card } => {
                let Some(zone) = self.zone(&card.zone_id) else {
                    return Decision::allow(); // stale zone: write no-ops
                };
                if card.is_token {
                    return can_create_token(actor, &zone);
                }
                if card.owner_id != actor {
                    return Decision::deny("cannot add a card owned by another player");
                }
                if zone.owner_id != actor {
                    return Decision::deny("cards can only be added to your own zones");
                }
                Decision::allow()
            }
            Intent::MoveCard {
                card_id, to_zone, ..
            } => {
                let (Some(card), Some(to)) = (self.card(card_id), self.zone(to_zone)) else {
                    return Decision::allow();
                };
                match self.zone(&card.zone_id) {
                    Some(from) => can_move_card(actor, &card, &from, &to),
                    // Source zone record lost: fall back to ownership.
                    None if card.owner_id == actor => Decision::allow(),
                    None => Decision::deny("not the card owner"),
                }
            }
            Intent::TapCard { card_id, .. } => {
                match self.card(card_id).and_then(|c| {
                    self.zone(&c.zone_id).map(|z| (c, z))
                }) {
                    Some((card, zone)) => can_tap_card(actor, &card, &zone),
                    None => Decision::allow(),
                }
            }
            Intent::UntapAll { player_id } => {
                if player_id == actor {
                    Decision::allow()
                } else {
                    Decision::deny("cannot untap another player's cards")
                }
            }
            Intent::TransformCard { card_id, .. }
            | Intent::UpdateCard { card_id, .. }
            | Intent::AddCounter { card_id, .. }
            | Intent::RemoveCounter { card_id, .. } => {
                match self.card(card_id).and_then(|c| {
                    self.zone(&c.zone_id).map(|z| (c, z))
                }) {
                    Some((card, zone)) => can_modify_card_state(actor, &card, &zone),
                    None => Decision::allow(),
                }
            }
            Intent::RemoveCard { card_id } => match self.card(card_id) {
                None => Decision::allow(),
                Some(card) => match self.zone(&card.zone_id) {
                    Some(zone) if zone.kind == ZoneKind::Battlefield => {
                        can_modify_card_state(actor, &card, &zone)
                    }
                    _ if card.owner_id == actor => Decision::allow(),
                    _ => Decision::deny("only the owner may remove this card"),
                },
            },
            Intent::DuplicateCard { source_id, .. } => {
                match self.card(source_id).and_then(|c| {
                    self.zone(&c.zone_id).map(|z| (c, z))
                }) {
                    Some((_, zone)) => can_create_token(actor, &zone),
                    None => Decision::allow(),
                }
            }
            Intent::SetCardReveal { card_id, .. } => match self.card(card_id) {
                None => Decision::allow(),
                Some(card) if card.owner_id == actor || card.controller_id == actor => {
                    Decision::allow()
                }
                Some(_) => Decision::deny("only the owner or controller may change reveal"),
            },
            Intent::ReorderZone { zone_id, .. } => match self.zone(zone_id) {
                None => Decision::allow(),
                Some(zone) if zone.owner_id == actor => Decision::allow(),
                Some(zone) => Decision::deny(format!(
                    "only the owner may reorder their {}",
                    zone.kind
                )),
            },
            Intent::UpdatePlayer { player_id, patch } => match self.player(player_id) {
                None => Decision::allow(),
                Some(player) => can_update_player(actor, &player, patch),
            },
            Intent::RemovePlayer { player_id } => {
                if player_id == actor || self.room_meta().host_id.as_deref() == Some(actor) {
                    Decision::allow()
                } else {
                    Decision::deny("only the player themselves or the host may remove a seat")
                }
            }
            Intent::SetViewScale { player_id, .. } => {
                if player_id == actor {
                    Decision::allow()
                } else {
                    Decision::deny("cannot change another player's view scale")
                }
            }
            Intent::SetGlobalCounter { .. } | Intent::RemoveGlobalCounter { .. } => {
                Decision::allow()
            }
            Intent::PatchRoomMeta { .. } => match self.room_meta().host_id.as_deref() {
                None => Decision::allow(),
                Some(host) if host == actor => Decision::allow(),
                Some(_) => Decision::deny("only the host may change room settings"),
            },
        }
    }
}

/// The apply table: one store helper per intent kind.
pub fn apply_intent(txn: &mut dyn StoreTxn, intent: &Intent) {
    match intent {
        Intent::AddCard { card } => mutations::upsert_card(txn, card),
        Intent::MoveCard {
            card_id,
            to_zone,
            position,
            index,
        } => mutations::move_card(txn, card_id, to_zone, *position, *index),
        Intent::TapCard { card_id, tapped } => mutations::tap_card(txn, card_id, *tapped),
        Intent::UntapAll { player_id } => mutations::untap_all(txn, player_id),
        Intent::TransformCard {
            card_id,
            face_index,
        } => mutations::transform_card(txn, card_id, *face_index),
        Intent::UpdateCard { card_id, patch } => mutations::patch_card(txn, card_id, patch),
        Intent::RemoveCard { card_id } => mutations::remove_card(txn, card_id),
        Intent::DuplicateCard { source_id, new_id } => {
            mutations::duplicate_card(txn, source_id, new_id)
        }
        Intent::SetCardReveal {
            card_id,
            revealed_to_all,
            revealed_to,
        } => mutations::set_card_reveal(txn, card_id, *revealed_to_all, revealed_to),
        Intent::AddCounter { card_id, counter } => {
            mutations::add_counter_to_card(txn, card_id, counter.clone())
        }
        Intent::RemoveCounter { card_id, kind } => {
            mutations::remove_counter_from_card(txn, card_id, kind)
        }
        Intent::ReorderZone { zone_id, card_ids } => {
            mutations::reorder_zone_cards(txn, zone_id, card_ids)
        }
        Intent::UpdatePlayer { player_id, patch } => {
            mutations::patch_player(txn, player_id, patch)
        }
        Intent::RemovePlayer { player_id } => mutations::remove_player(txn, player_id),
        Intent::SetViewScale { player_id, scale } => {
            mutations::set_view_scale(txn, player_id, *scale)
        }
        Intent::SetGlobalCounter { name, counter } => {
            mutations::set_global_counter(txn, name, counter)
        }
        Intent::RemoveGlobalCounter { name } => mutations::remove_global_counter(txn, name),
        Intent::PatchRoomMeta { locked, host_id } => {
            mutations::patch_room_meta(txn, *locked, host_id.clone())
        }
    }
}
