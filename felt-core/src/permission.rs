//! Pure permission checks: "can actor X do Y to entity Z".
//!
//! Every check is synchronous and side-effect free so the same code
//! answers identically on the optimistic local path and on any future
//! authoritative server. A denial is a value, never an error.

use crate::model::{Card, Player, PlayerPatch, Zone, ZoneKind};

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// Options for zone visibility checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewOpts {
    /// A table-wide "view everything" override. Hidden zones ignore it.
    pub view_all: bool,
}

/// Hidden zone types (library, hand) are owner-only regardless of
/// `view_all`; every other zone type is universally viewable.
pub fn can_view_zone(actor: &str, zone: &Zone, opts: ViewOpts) -> Decision {
    if zone.kind.is_hidden() {
        if zone.owner_id == actor {
            return Decision::allow();
        }
        return Decision::deny(format!("{} is hidden from non-owners", zone.kind));
    }
    let _ = opts.view_all;
    Decision::allow()
}

/// Movement rules, checked in this exact order:
///
/// 1. a hidden destination admits only its owner (this is deliberately
///    checked first so hidden-to-hidden across different owners fails
///    on the destination),
/// 2. a hidden source releases cards only to its owner,
/// 3. battlefield-to-battlefield moves are open to the card owner and
///    to the host of either battlefield,
/// 4. otherwise the card owner may always move, and a zone host may
///    move cards within their own non-hidden zones.
pub fn can_move_card(actor: &str, card: &Card, from: &Zone, to: &Zone) -> Decision {
    if to.kind.is_hidden() && to.owner_id != actor {
        return Decision::deny(format!(
            "cannot move into another player's {}",
            to.kind
        ));
    }
    if from.kind.is_hidden() && from.owner_id != actor {
        return Decision::deny(format!(
            "cannot move out of another player's {}",
            from.kind
        ));
    }
    if from.kind == ZoneKind::Battlefield && to.kind == ZoneKind::Battlefield {
        if card.owner_id == actor || from.owner_id == actor || to.owner_id == actor {
            return Decision::allow();
        }
        return Decision::deny("only the card owner or a battlefield host may move this card");
    }
    if card.owner_id == actor {
        return Decision::allow();
    }
    if !from.kind.is_hidden()
        && !to.kind.is_hidden()
        && from.owner_id == actor
        && to.owner_id == actor
    {
        return Decision::allow();
    }
    Decision::deny("not the card owner")
}

/// Only the controller may tap or untap, and only on a battlefield.
pub fn can_tap_card(actor: &str, card: &Card, zone: &Zone) -> Decision {
    if zone.kind != ZoneKind::Battlefield {
        return Decision::deny("cards can only be tapped on a battlefield");
    }
    if card.controller_id != actor {
        return Decision::deny("only the controller may tap this card");
    }
    Decision::allow()
}

/// Face-down / power-toughness / custom-text / current-face mutations.
///
/// Battlefield cards only; the actor must be the owner, the controller,
/// or the host of the battlefield the card sits on.
pub fn can_modify_card_state(actor: &str, card: &Card, zone: &Zone) -> Decision {
    if zone.kind != ZoneKind::Battlefield {
        return Decision::deny("card state can only be changed on a battlefield");
    }
    if card.owner_id == actor || card.controller_id == actor || zone.owner_id == actor {
        return Decision::allow();
    }
    Decision::deny("not the owner, controller, or battlefield host")
}

/// Tokens spawn only on a battlefield, and only its host may do so.
pub fn can_create_token(actor: &str, zone: &Zone) -> Decision {
    if zone.kind != ZoneKind::Battlefield {
        return Decision::deny("tokens can only be created on a battlefield");
    }
    if zone.owner_id != actor {
        return Decision::deny("only the battlefield owner may create tokens here");
    }
    Decision::allow()
}

/// A player may only update their own record. Denials name the first
/// blocked field so the log line says what was attempted.
pub fn can_update_player(actor: &str, player: &Player, updates: &PlayerPatch) -> Decision {
    if player.id == actor {
        return Decision::allow();
    }
    let field = updates.touched_fields().first().copied().unwrap_or("record");
    Decision::deny(format!(
        "cannot update {field} of another player ({})",
        player.id
    ))
}
