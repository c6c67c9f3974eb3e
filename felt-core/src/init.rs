//! Local-player join planning.
//!
//! [`plan_local_player_init`] is a pure function over a sanitized
//! snapshot: it computes exactly what must be created or patched to
//! bring a newly-joining local player up to date, and returns `None`
//! when re-entering an already-initialized room (the common case, which
//! must do zero writes). The join gate runs first and blocks the whole
//! plan when the room is locked or full.

use std::collections::BTreeMap;

use crate::model::{seat_color, Player, PlayerId, Zone, ZoneKind, ROOM_CAPACITY};
use crate::snapshot::GameSnapshot;

/// Why a join was refused. Expected states, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinBlockReason {
    Full,
    Locked,
    OverCapacity,
}

impl JoinBlockReason {
    pub fn as_str(self) -> &'static str {
        match self {
            JoinBlockReason::Full => "full",
            JoinBlockReason::Locked => "locked",
            JoinBlockReason::OverCapacity => "overCapacity",
        }
    }
}

impl std::fmt::Display for JoinBlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gate a join attempt before any shared-document write.
///
/// Existing players are never blocked; capacity and locks only keep new
/// players out.
pub fn check_join_gate(snapshot: &GameSnapshot, player_id: &str) -> Option<JoinBlockReason> {
    if snapshot.players.contains_key(player_id) {
        return None;
    }
    if snapshot.meta.locked {
        return Some(JoinBlockReason::Locked);
    }
    if snapshot.players.len() > ROOM_CAPACITY {
        return Some(JoinBlockReason::OverCapacity);
    }
    if snapshot.players.len() == ROOM_CAPACITY {
        return Some(JoinBlockReason::Full);
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorPatch {
    pub player_id: PlayerId,
    pub color: String,
}

/// Everything `apply` has to write to finish a join. Field order is
/// also application order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitPlan {
    /// Whose join this plan completes.
    pub local_player_id: PlayerId,
    /// Full record for a player that doesn't exist yet.
    pub upsert_player: Option<Player>,
    /// Rename of the existing local player (only away from the
    /// synthesized default — personalized names are never clobbered).
    pub patch_local_name: Option<String>,
    /// Canonical seat-color corrections.
    pub color_patches: Vec<ColorPatch>,
    /// Missing canonical zones for the local player.
    pub zones_to_create: Vec<Zone>,
}

/// Seat order used for palette assignment: the existing order with the
/// local player appended when absent.
fn palette_order(snapshot: &GameSnapshot, local: &str) -> Vec<PlayerId> {
    let mut order = snapshot.player_order.clone();
    if !order.iter().any(|id| id == local) {
        order.push(local.to_string());
    }
    order
}

/// Compute the init plan for the local player, or `None` if the room
/// already reflects everything a join would write.
pub fn plan_local_player_init(
    snapshot: &GameSnapshot,
    player_id: &str,
    desired_name: &str,
    default_name: &str,
) -> Option<InitPlan> {
    let mut plan = InitPlan {
        local_player_id: player_id.to_string(),
        ..InitPlan::default()
    };
    let order = palette_order(snapshot, player_id);

    let local_seat = order
        .iter()
        .position(|id| id == player_id)
        .unwrap_or(order.len());
    let local_canonical = seat_color(local_seat).to_string();

    match snapshot.players.get(player_id) {
        None => {
            plan.upsert_player = Some(Player::seated(player_id, desired_name, &local_canonical));
        }
        Some(existing) => {
            if existing.name == default_name && desired_name != existing.name {
                plan.patch_local_name = Some(desired_name.to_string());
            }
        }
    }

    for (seat, id) in order.iter().enumerate() {
        let Some(player) = snapshot.players.get(id) else {
            continue; // the local player being created; color set above
        };
        let canonical = seat_color(seat);
        let patch_needed = match &player.color {
            None => true,
            Some(current) => id == player_id && current != canonical,
        };
        if patch_needed {
            plan.color_patches.push(ColorPatch {
                player_id: id.clone(),
                color: canonical.to_string(),
            });
        }
    }

    for kind in ZoneKind::CANONICAL {
        let exists = snapshot
            .zones
            .values()
            .any(|z| z.owner_id == player_id && z.kind == kind);
        if !exists {
            plan.zones_to_create.push(Zone::new(player_id, kind));
        }
    }

    if plan.upsert_player.is_none()
        && plan.patch_local_name.is_none()
        && plan.color_patches.is_empty()
        && plan.zones_to_create.is_empty()
    {
        return None;
    }
    Some(plan)
}

/// Self-healing host assignment.
///
/// Keeps `prior` when that player still exists; otherwise picks the
/// first player in canonical order (seat order, then any stragglers by
/// id). `None` only when the room is empty.
pub fn resolve_host(
    players: &BTreeMap<PlayerId, Player>,
    player_order: &[PlayerId],
    prior: Option<&str>,
) -> Option<PlayerId> {
    if let Some(prior) = prior {
        if players.contains_key(prior) {
            return Some(prior.to_string());
        }
    }
    for id in player_order {
        if players.contains_key(id) {
            return Some(id.clone());
        }
    }
    players.keys().next().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RoomMeta, SEAT_PALETTE, STARTING_LIFE};
    use crate::snapshot::GameSnapshot;

    fn seated_snapshot(ids: &[&str]) -> GameSnapshot {
        let mut snap = GameSnapshot::default();
        for (seat, id) in ids.iter().enumerate() {
            let player = Player::seated(id, &format!("Player {seat}"), seat_color(seat));
            snap.players.insert(id.to_string(), player);
            snap.player_order.push(id.to_string());
            for kind in ZoneKind::CANONICAL {
                let zone = Zone::new(id, kind);
                snap.zones.insert(zone.id.clone(), zone);
            }
        }
        snap
    }

    #[test]
    fn test_gate_open_for_existing_player_even_when_locked() {
        let mut snap = seated_snapshot(&["p1"]);
        snap.meta = RoomMeta {
            host_id: Some("p1".into()),
            locked: true,
        };
        assert_eq!(check_join_gate(&snap, "p1"), None);
    }

    #[test]
    fn test_gate_locked() {
        let mut snap = seated_snapshot(&["p1"]);
        snap.meta.locked = true;
        assert_eq!(check_join_gate(&snap, "p9"), Some(JoinBlockReason::Locked));
    }

    #[test]
    fn test_gate_full_and_over_capacity() {
        let snap = seated_snapshot(&["p1", "p2", "p3", "p4"]);
        assert_eq!(check_join_gate(&snap, "p9"), Some(JoinBlockReason::Full));

        let snap = seated_snapshot(&["p1", "p2", "p3", "p4", "p5"]);
        assert_eq!(
            check_join_gate(&snap, "p9"),
            Some(JoinBlockReason::OverCapacity)
        );
    }

    #[test]
    fn test_fresh_join_plans_player_and_six_zones() {
        let snap = GameSnapshot::default();
        let plan = plan_local_player_init(&snap, "p1", "Hans", "Guest").unwrap();

        let player = plan.upsert_player.unwrap();
        assert_eq!(player.name, "Hans");
        assert_eq!(player.life, STARTING_LIFE);
        assert_eq!(player.color.as_deref(), Some(SEAT_PALETTE[0]));
        assert!(!player.deck_loaded);

        assert_eq!(plan.zones_to_create.len(), 6);
        let kinds: Vec<ZoneKind> = plan.zones_to_create.iter().map(|z| z.kind).collect();
        assert_eq!(kinds, ZoneKind::CANONICAL.to_vec());
    }

    #[test]
    fn test_rejoin_initialized_room_is_noop() {
        let snap = seated_snapshot(&["p1", "p2"]);
        assert_eq!(
            plan_local_player_init(&snap, "p1", "Player 0", "Guest"),
            None
        );
    }

    #[test]
    fn test_name_patch_only_from_default() {
        let mut snap = seated_snapshot(&["p1"]);
        snap.players.get_mut("p1").unwrap().name = "Guest".into();

        let plan = plan_local_player_init(&snap, "p1", "Hans", "Guest").unwrap();
        assert_eq!(plan.patch_local_name.as_deref(), Some("Hans"));

        // A personalized name is never clobbered.
        snap.players.get_mut("p1").unwrap().name = "Hans".into();
        assert_eq!(plan_local_player_init(&snap, "p1", "Dora", "Guest"), None);
    }

    #[test]
    fn test_missing_color_patched_for_any_player() {
        let mut snap = seated_snapshot(&["p1", "p2"]);
        snap.players.get_mut("p2").unwrap().color = None;

        let plan = plan_local_player_init(&snap, "p1", "Player 0", "Guest").unwrap();
        assert_eq!(
            plan.color_patches,
            vec![ColorPatch {
                player_id: "p2".into(),
                color: seat_color(1).to_string(),
            }]
        );
    }

    #[test]
    fn test_local_color_drift_self_corrects_others_kept() {
        let mut snap = seated_snapshot(&["p1", "p2"]);
        // Both drifted from canonical; only the local one self-corrects.
        snap.players.get_mut("p1").unwrap().color = Some("#123456".into());
        snap.players.get_mut("p2").unwrap().color = Some("#abcdef".into());

        let plan = plan_local_player_init(&snap, "p1", "Player 0", "Guest").unwrap();
        assert_eq!(plan.color_patches.len(), 1);
        assert_eq!(plan.color_patches[0].player_id, "p1");
        assert_eq!(plan.color_patches[0].color, seat_color(0));
    }

    #[test]
    fn test_missing_zone_recreated() {
        let mut snap = seated_snapshot(&["p1"]);
        snap.zones.remove(&crate::model::zone_id("p1", ZoneKind::Exile));

        let plan = plan_local_player_init(&snap, "p1", "Player 0", "Guest").unwrap();
        assert_eq!(plan.zones_to_create.len(), 1);
        assert_eq!(plan.zones_to_create[0].kind, ZoneKind::Exile);
        assert!(plan.upsert_player.is_none());
    }

    #[test]
    fn test_idempotent_rejoin_after_apply() {
        // Apply a fresh plan onto the snapshot, then re-plan: must be None.
        let mut snap = GameSnapshot::default();
        let plan = plan_local_player_init(&snap, "p1", "Hans", "Guest").unwrap();

        if let Some(player) = &plan.upsert_player {
            snap.players.insert(player.id.clone(), player.clone());
            snap.player_order.push(player.id.clone());
        }
        for zone in &plan.zones_to_create {
            snap.zones.insert(zone.id.clone(), zone.clone());
        }
        for patch in &plan.color_patches {
            snap.players.get_mut(&patch.player_id).unwrap().color = Some(patch.color.clone());
        }

        assert_eq!(plan_local_player_init(&snap, "p1", "Hans", "Guest"), None);
    }

    #[test]
    fn test_resolve_host_keeps_live_prior() {
        let snap = seated_snapshot(&["p1", "p2"]);
        assert_eq!(
            resolve_host(&snap.players, &snap.player_order, Some("p2")),
            Some("p2".to_string())
        );
    }

    #[test]
    fn test_resolve_host_reassigns_dead_prior() {
        let snap = seated_snapshot(&["p1", "p2"]);
        assert_eq!(
            resolve_host(&snap.players, &snap.player_order, Some("gone")),
            Some("p1".to_string())
        );
    }

    #[test]
    fn test_resolve_host_empty_room() {
        let snap = GameSnapshot::default();
        assert_eq!(resolve_host(&snap.players, &snap.player_order, None), None);
    }
}
