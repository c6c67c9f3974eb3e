//! Per-client private overlay.
//!
//! Some card fields must never be replicated to all peers — above all
//! the true identity of a face-down card, which only its controller may
//! know. Those fields live here, client-side, and are layered onto the
//! sanitized public snapshot during reconciliation. An overlay entry
//! only ever overrides owner-visible-only fields; it can never move a
//! card or change its id.

use serde::{Deserialize, Serialize};

use crate::model::{CardId, PrintedCard};
use crate::snapshot::GameSnapshot;

pub const OVERLAY_SCHEMA_VERSION: u32 = 1;

/// Secret fields for a single card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayCard {
    pub card_id: CardId,
    /// True name of a face-down card.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// True printing (faces, images) of a face-down card.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printing: Option<PrintedCard>,
    /// Which face is actually showing under the face-down sleeve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_face_index: Option<usize>,
}

/// The client-held secret state for one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateOverlay {
    pub schema_version: u32,
    /// Bumped on every overlay mutation; lets the UI cheaply detect
    /// overlay-only changes.
    pub overlay_version: u64,
    pub room_id: String,
    pub cards: Vec<OverlayCard>,
}

impl PrivateOverlay {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            schema_version: OVERLAY_SCHEMA_VERSION,
            overlay_version: 0,
            room_id: room_id.into(),
            cards: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Record (or replace) the secret fields for a card.
    pub fn upsert(&mut self, entry: OverlayCard) {
        self.overlay_version += 1;
        if let Some(existing) = self.cards.iter_mut().find(|c| c.card_id == entry.card_id) {
            *existing = entry;
        } else {
            self.cards.push(entry);
        }
    }

    /// Drop the secret fields for a card (e.g. it turned face up).
    pub fn remove(&mut self, card_id: &str) {
        let before = self.cards.len();
        self.cards.retain(|c| c.card_id != card_id);
        if self.cards.len() != before {
            self.overlay_version += 1;
        }
    }

    pub fn get(&self, card_id: &str) -> Option<&OverlayCard> {
        self.cards.iter().find(|c| c.card_id == card_id)
    }

    /// Layer the overlay onto a sanitized public snapshot.
    ///
    /// Entries for cards that no longer exist are ignored (the card was
    /// deleted by a peer; the stale secret is harmless and will be
    /// garbage-collected by [`PrivateOverlay::retain_existing`]).
    pub fn merge_onto(&self, snapshot: &mut GameSnapshot) {
        for entry in &self.cards {
            let Some(card) = snapshot.cards.get_mut(&entry.card_id) else {
                continue;
            };
            if let Some(name) = &entry.name {
                card.name = name.clone();
            }
            if let Some(printing) = &entry.printing {
                card.printing = printing.clone();
            }
            if let Some(index) = entry.current_face_index {
                card.current_face_index = index;
            }
        }
    }

    /// Drop entries whose card has disappeared from the shared state.
    pub fn retain_existing(&mut self, snapshot: &GameSnapshot) {
        let before = self.cards.len();
        self.cards.retain(|c| snapshot.cards.contains_key(&c.card_id));
        if self.cards.len() != before {
            self.overlay_version += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Card, PrintedFace};

    fn snapshot_with_card(id: &str) -> GameSnapshot {
        let mut snap = GameSnapshot::default();
        let mut card = Card::new(id, "p1", "p1-battlefield", "Face-down card");
        card.face_down = true;
        snap.cards.insert(id.to_string(), card);
        snap
    }

    fn secret(id: &str, name: &str) -> OverlayCard {
        OverlayCard {
            card_id: id.to_string(),
            name: Some(name.to_string()),
            printing: Some(PrintedCard {
                source_id: None,
                faces: vec![PrintedFace {
                    name: name.to_string(),
                    ..Default::default()
                }],
            }),
            current_face_index: None,
        }
    }

    #[test]
    fn test_merge_overrides_secret_fields_only() {
        let mut snap = snapshot_with_card("c1");
        let zone_before = snap.cards["c1"].zone_id.clone();

        let mut overlay = PrivateOverlay::new("room");
        overlay.upsert(secret("c1", "Hidden Dragon"));
        overlay.merge_onto(&mut snap);

        let card = &snap.cards["c1"];
        assert_eq!(card.name, "Hidden Dragon");
        assert_eq!(card.zone_id, zone_before);
        assert_eq!(card.id, "c1");
        assert!(card.face_down);
    }

    #[test]
    fn test_merge_ignores_missing_cards() {
        let mut snap = snapshot_with_card("c1");
        let mut overlay = PrivateOverlay::new("room");
        overlay.upsert(secret("ghost", "Nothing"));
        overlay.merge_onto(&mut snap);
        assert_eq!(snap.cards.len(), 1);
    }

    #[test]
    fn test_upsert_replaces_and_bumps_version() {
        let mut overlay = PrivateOverlay::new("room");
        overlay.upsert(secret("c1", "First"));
        overlay.upsert(secret("c1", "Second"));

        assert_eq!(overlay.cards.len(), 1);
        assert_eq!(overlay.get("c1").unwrap().name.as_deref(), Some("Second"));
        assert_eq!(overlay.overlay_version, 2);
    }

    #[test]
    fn test_remove_is_noop_for_unknown_card() {
        let mut overlay = PrivateOverlay::new("room");
        overlay.upsert(secret("c1", "First"));
        let version = overlay.overlay_version;
        overlay.remove("unknown");
        assert_eq!(overlay.overlay_version, version);
        overlay.remove("c1");
        assert!(overlay.is_empty());
        assert_eq!(overlay.overlay_version, version + 1);
    }

    #[test]
    fn test_retain_existing_garbage_collects() {
        let snap = snapshot_with_card("c1");
        let mut overlay = PrivateOverlay::new("room");
        overlay.upsert(secret("c1", "Kept"));
        overlay.upsert(secret("c2", "Stale"));

        overlay.retain_existing(&snap);
        assert!(overlay.get("c1").is_some());
        assert!(overlay.get("c2").is_none());
    }

    #[test]
    fn test_overlay_roundtrip() {
        let mut overlay = PrivateOverlay::new("room-7");
        overlay.upsert(secret("c1", "Hidden"));
        let json = serde_json::to_string(&overlay).unwrap();
        let back: PrivateOverlay = serde_json::from_str(&json).unwrap();
        assert_eq!(back, overlay);
        assert_eq!(back.schema_version, OVERLAY_SCHEMA_VERSION);
    }
}
