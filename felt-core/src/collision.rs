//! Battlefield slot collision resolution.
//!
//! Two cards must never render exactly on top of each other. Instead of
//! a spatial index, placement uses a tolerance-based "bump and search":
//! a candidate slot that roughly equals an occupied one is stepped down
//! one grid step, re-checked against all occupants, and so on until a
//! free slot is found. Walking off the bottom edge wraps to the top of
//! a fresh column.

use crate::model::{Position, GRID_STEP};

/// Hard ceiling on cascade length; past this the battlefield is saturated
/// at tolerance granularity and the candidate is accepted as-is.
const MAX_CASCADE_STEPS: usize = 1024;

/// One cascade step: down a grid step, wrapping to a new column at the
/// bottom edge and back to the left edge past the right one.
pub fn bump(position: Position) -> Position {
    let mut next = position;
    next.y += GRID_STEP;
    if next.y > 1.0 {
        next.y -= 1.0;
        next.x += GRID_STEP;
        if next.x > 1.0 {
            next.x -= 1.0;
        }
    }
    next
}

/// Walk from `desired` until no occupant is within tolerance.
pub fn find_free_slot(desired: Position, occupied: &[Position]) -> Position {
    let mut candidate = desired.normalized();
    for _ in 0..MAX_CASCADE_STEPS {
        if !occupied.iter().any(|p| p.roughly_equals(candidate)) {
            return candidate;
        }
        candidate = bump(candidate);
    }
    candidate
}

/// Does any occupant collide with `slot`?
pub fn is_occupied(slot: Position, occupied: &[Position]) -> bool {
    occupied.iter().any(|p| p.roughly_equals(slot))
}
