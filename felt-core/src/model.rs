//! Shared data model for the card table.
//!
//! These types are what actually lives inside the replicated maps: each
//! record is serialized to JSON and stored under its id, so every field
//! here is part of the wire contract between peers. Secret information
//! (the true identity of a face-down card) is *not* part of these
//! records — it travels in the per-client [`crate::overlay`] instead.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type PlayerId = String;
pub type ZoneId = String;
pub type CardId = String;

/// Maximum number of seated players in a room.
pub const ROOM_CAPACITY: usize = 4;

/// Life total a freshly seated player starts with.
pub const STARTING_LIFE: i64 = 40;

/// Two battlefield positions closer than this (normalized space) are
/// considered the same slot.
pub const POSITION_TOLERANCE: f64 = 0.01;

/// One collision-cascade step in normalized battlefield space.
pub const GRID_STEP: f64 = 0.04;

/// Reference surface for migrating legacy pixel positions.
pub const LEGACY_SURFACE_W: f64 = 1920.0;
pub const LEGACY_SURFACE_H: f64 = 1080.0;

/// Bounds for the per-player battlefield view scale.
pub const VIEW_SCALE_MIN: f64 = 0.2;
pub const VIEW_SCALE_MAX: f64 = 3.0;

/// Canonical seat colors, assigned by position in the player order.
pub const SEAT_PALETTE: [&str; 8] = [
    "#e53935", "#1e88e5", "#43a047", "#fdd835", "#8e24aa", "#fb8c00",
    "#00acc1", "#d81b60",
];

/// Canonical color for the given seat index.
pub fn seat_color(index: usize) -> &'static str {
    SEAT_PALETTE[index % SEAT_PALETTE.len()]
}

// ─── Zones ──────────────────────────────────────────────────────────

/// The six canonical zone types every player owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKind {
    Library,
    Hand,
    Battlefield,
    Graveyard,
    Exile,
    /// Older documents wrote this zone as `command`.
    #[serde(alias = "command")]
    Commander,
}

impl ZoneKind {
    pub const CANONICAL: [ZoneKind; 6] = [
        ZoneKind::Library,
        ZoneKind::Hand,
        ZoneKind::Battlefield,
        ZoneKind::Graveyard,
        ZoneKind::Exile,
        ZoneKind::Commander,
    ];

    /// Hidden zones are visible to their owner only, regardless of any
    /// view-all override.
    pub fn is_hidden(self) -> bool {
        matches!(self, ZoneKind::Library | ZoneKind::Hand)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ZoneKind::Library => "library",
            ZoneKind::Hand => "hand",
            ZoneKind::Battlefield => "battlefield",
            ZoneKind::Graveyard => "graveyard",
            ZoneKind::Exile => "exile",
            ZoneKind::Commander => "commander",
        }
    }
}

impl std::fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic zone id: one zone per (owner, kind).
pub fn zone_id(owner: &str, kind: ZoneKind) -> ZoneId {
    format!("{owner}-{kind}")
}

/// A player-owned card container.
///
/// `card_ids` is ordered (library bottom→top, hand display order) and
/// contains each card at most once. The ordering itself is replicated
/// in a separate map so record edits and reorders don't collide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub kind: ZoneKind,
    pub owner_id: PlayerId,
    #[serde(default)]
    pub card_ids: Vec<CardId>,
}

impl Zone {
    pub fn new(owner: &str, kind: ZoneKind) -> Self {
        Self {
            id: zone_id(owner, kind),
            kind,
            owner_id: owner.to_string(),
            card_ids: Vec::new(),
        }
    }
}

// ─── Positions ──────────────────────────────────────────────────────

/// Card position inside its zone, normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Migrate a legacy raw-pixel position to normalized space.
    ///
    /// Old documents stored battlefield positions in screen pixels;
    /// anything outside `[0, 1]` is treated as such and rescaled.
    pub fn normalized(self) -> Position {
        if self.x.abs() <= 1.0 && self.y.abs() <= 1.0 {
            return self;
        }
        Position {
            x: (self.x / LEGACY_SURFACE_W).clamp(0.0, 1.0),
            y: (self.y / LEGACY_SURFACE_H).clamp(0.0, 1.0),
        }
    }

    /// Tolerance-based slot equality used by the collision cascade.
    pub fn roughly_equals(self, other: Position) -> bool {
        (self.x - other.x).abs() < POSITION_TOLERANCE
            && (self.y - other.y).abs() < POSITION_TOLERANCE
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::ORIGIN
    }
}

// ─── Counters ───────────────────────────────────────────────────────

/// A named counter on a card (or a room-wide global counter).
///
/// Invariant: `count > 0`; zero-count counters are pruned, and a card
/// holds at most one entry per `kind` (adds merge into it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub kind: String,
    pub count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Counter {
    pub fn new(kind: impl Into<String>, count: i64) -> Self {
        Self {
            kind: kind.into(),
            count,
            color: None,
        }
    }
}

/// Merge `add` into `counters`, combining same-kind entries and pruning
/// anything that drops to zero or below.
pub fn merge_counter(counters: &mut Vec<Counter>, add: Counter) {
    if let Some(existing) = counters.iter_mut().find(|c| c.kind == add.kind) {
        existing.count += add.count;
        if add.color.is_some() {
            existing.color = add.color;
        }
    } else {
        counters.push(add);
    }
    counters.retain(|c| c.count > 0);
}

// ─── Players ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub life: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub counters: Vec<Counter>,
    /// Commander damage taken, keyed by the attacking player.
    #[serde(default)]
    pub commander_damage: BTreeMap<PlayerId, i64>,
    #[serde(default)]
    pub commander_tax: i64,
    #[serde(default)]
    pub deck_loaded: bool,
}

impl Player {
    /// A freshly seated player with no deck and a canonical color.
    pub fn seated(id: &str, name: &str, color: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            life: STARTING_LIFE,
            color: Some(color.to_string()),
            counters: Vec::new(),
            commander_damage: BTreeMap::new(),
            commander_tax: 0,
            deck_loaded: false,
        }
    }
}

/// Partial update to a player record. Only the `Some` fields apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub life: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counters: Option<Vec<Counter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commander_damage: Option<BTreeMap<PlayerId, i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commander_tax: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deck_loaded: Option<bool>,
}

impl PlayerPatch {
    /// Names of the fields this patch would touch, for denial logging.
    pub fn touched_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push("name");
        }
        if self.life.is_some() {
            fields.push("life");
        }
        if self.color.is_some() {
            fields.push("color");
        }
        if self.counters.is_some() {
            fields.push("counters");
        }
        if self.commander_damage.is_some() {
            fields.push("commander_damage");
        }
        if self.commander_tax.is_some() {
            fields.push("commander_tax");
        }
        if self.deck_loaded.is_some() {
            fields.push("deck_loaded");
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.touched_fields().is_empty()
    }

    pub fn apply_to(&self, player: &mut Player) {
        if let Some(name) = &self.name {
            player.name = name.clone();
        }
        if let Some(life) = self.life {
            player.life = life;
        }
        if let Some(color) = &self.color {
            player.color = Some(color.clone());
        }
        if let Some(counters) = &self.counters {
            player.counters = counters.clone();
        }
        if let Some(damage) = &self.commander_damage {
            for (from, amount) in damage {
                player.commander_damage.insert(from.clone(), *amount);
            }
        }
        if let Some(tax) = self.commander_tax {
            player.commander_tax = tax;
        }
        if let Some(loaded) = self.deck_loaded {
            player.deck_loaded = loaded;
        }
    }
}

// ─── Cards ──────────────────────────────────────────────────────────

/// Why a card is lying face down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceDownMode {
    /// Plain face-down (e.g. dealt from the library).
    Plain,
    Morph,
    Manifest,
}

/// Minimal printed-card snapshot carried with each card so peers can
/// render it without a card-database lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrintedFace {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toughness: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrintedCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default)]
    pub faces: Vec<PrintedFace>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub owner_id: PlayerId,
    pub controller_id: PlayerId,
    pub zone_id: ZoneId,
    pub name: String,
    #[serde(default)]
    pub tapped: bool,
    #[serde(default)]
    pub face_down: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_down_mode: Option<FaceDownMode>,
    #[serde(default)]
    pub current_face_index: usize,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub counters: Vec<Counter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toughness: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_power: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_toughness: Option<String>,
    /// Tokens only exist while on a battlefield.
    #[serde(default)]
    pub is_token: bool,
    #[serde(default)]
    pub is_commander: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commander_tax: Option<i64>,
    #[serde(default)]
    pub revealed_to_all: bool,
    #[serde(default)]
    pub revealed_to: Vec<PlayerId>,
    #[serde(default)]
    pub printing: PrintedCard,
}

impl Card {
    pub fn new(id: &str, owner: &str, zone: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            owner_id: owner.to_string(),
            controller_id: owner.to_string(),
            zone_id: zone.to_string(),
            name: name.to_string(),
            tapped: false,
            face_down: false,
            face_down_mode: None,
            current_face_index: 0,
            position: Position::ORIGIN,
            rotation: 0.0,
            counters: Vec::new(),
            power: None,
            toughness: None,
            base_power: None,
            base_toughness: None,
            is_token: false,
            is_commander: false,
            commander_tax: None,
            revealed_to_all: false,
            revealed_to: Vec::new(),
            printing: PrintedCard::default(),
        }
    }
}

/// Partial update to a card record, used by the update-card action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_down: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_down_mode: Option<Option<FaceDownMode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_face_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toughness: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_id: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commander_tax: Option<Option<i64>>,
}

impl CardPatch {
    pub fn apply_to(&self, card: &mut Card) {
        if let Some(name) = &self.name {
            card.name = name.clone();
        }
        if let Some(face_down) = self.face_down {
            card.face_down = face_down;
        }
        if let Some(mode) = &self.face_down_mode {
            card.face_down_mode = *mode;
        }
        if let Some(index) = self.current_face_index {
            card.current_face_index = index;
        }
        if let Some(rotation) = self.rotation {
            card.rotation = rotation;
        }
        if let Some(power) = &self.power {
            card.power = power.clone();
        }
        if let Some(toughness) = &self.toughness {
            card.toughness = toughness.clone();
        }
        if let Some(controller) = &self.controller_id {
            card.controller_id = controller.clone();
        }
        if let Some(tax) = &self.commander_tax {
            card.commander_tax = *tax;
        }
    }
}

// ─── Room metadata ──────────────────────────────────────────────────

/// Room-wide metadata, stored under a single replicated map entry.
///
/// `host_id` is self-healing: when the recorded host no longer exists
/// among the players it is reassigned (see [`crate::init::resolve_host`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<PlayerId>,
    #[serde(default)]
    pub locked: bool,
}
