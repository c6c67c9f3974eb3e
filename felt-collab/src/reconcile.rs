//! Full-sync reconciliation.
//!
//! Every remote document change funnels through here:
//!
//! ```text
//! raw replicated maps
//!       │  sanitize (drop/repair, log once per session)
//!       ▼
//! public GameSnapshot
//!       │  merge private overlay (secret card fields)
//!       ▼
//! merged snapshot
//!       │  replay pending local intents (in submission order)
//!       ▼
//! UI-facing snapshot
//! ```
//!
//! Bursts of remote updates are coalesced by a [`Debouncer`] so the
//! store publishes once per burst, not once per key write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use felt_core::intent::PendingIntentQueue;
use felt_core::overlay::PrivateOverlay;
use felt_core::snapshot::{sanitize, GameSnapshot, RawSnapshot};

/// Debounce for document-change reconciliation.
pub const RECONCILE_DEBOUNCE: Duration = Duration::from_millis(40);
/// Debounce for the post-`synced` join attempt, separate from the
/// reconcile timer.
pub const JOIN_DEBOUNCE: Duration = Duration::from_millis(150);

/// The three-layer reconciliation pipeline.
pub struct Reconciler {
    overlay: Mutex<PrivateOverlay>,
    pending: Arc<Mutex<PendingIntentQueue>>,
    sanitize_logged: AtomicBool,
}

impl Reconciler {
    pub fn new(room_id: &str, pending: Arc<Mutex<PendingIntentQueue>>) -> Self {
        Self {
            overlay: Mutex::new(PrivateOverlay::new(room_id)),
            pending,
            sanitize_logged: AtomicBool::new(false),
        }
    }

    /// Access the private overlay (e.g. to record a face-down card's
    /// true identity).
    pub fn with_overlay<R>(&self, f: impl FnOnce(&mut PrivateOverlay) -> R) -> R {
        let mut overlay = self.overlay.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut overlay)
    }

    /// Run the full pipeline over a raw snapshot.
    ///
    /// Never fails: malformed upstream entries are dropped and counted,
    /// and the sanitize report is logged once per session (not per
    /// event — a malformed record would otherwise storm the log on
    /// every keystroke of every peer).
    pub fn reconcile(&self, raw: &RawSnapshot) -> GameSnapshot {
        let (mut snapshot, report) = sanitize(raw);
        if !report.is_clean() && !self.sanitize_logged.swap(true, Ordering::Relaxed) {
            if !cfg!(test) {
                log::warn!("replicated state needed sanitation: {}", report.summary());
            }
        }

        {
            let mut overlay = self.overlay.lock().unwrap_or_else(|e| e.into_inner());
            overlay.retain_existing(&snapshot);
            overlay.merge_onto(&mut snapshot);
        }

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.reconcile_onto(&mut snapshot);

        snapshot
    }

    pub fn pending_intents(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

// ─── Debouncer ──────────────────────────────────────────────────────

/// Single-in-flight-timer debouncer: each trigger restarts the delay,
/// so a burst of events runs the callback once, after the burst.
pub struct Debouncer {
    delay: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            task: Mutex::new(None),
        }
    }

    /// Schedule `f` after the delay, cancelling any pending run.
    pub fn trigger<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        });
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel any pending run; must be called on unmount so the timer
    /// can't fire against torn-down resources.
    pub fn cancel(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use felt_core::intent::Intent;
    use felt_core::model::{Card, Player, Zone, ZoneKind};
    use felt_core::overlay::OverlayCard;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn raw_room() -> RawSnapshot {
        let mut raw = RawSnapshot::default();
        let player = Player::seated("p1", "Alice", "#e53935");
        raw.players
            .insert("p1".into(), serde_json::to_value(&player).unwrap());
        raw.player_order.insert("p1".into(), json!(0));
        let zone = Zone::new("p1", ZoneKind::Battlefield);
        raw.zones
            .insert(zone.id.clone(), serde_json::to_value(&zone).unwrap());
        let mut card = Card::new("c1", "p1", &zone.id, "????");
        card.face_down = true;
        raw.cards
            .insert("c1".into(), serde_json::to_value(&card).unwrap());
        raw.zone_card_orders.insert(zone.id, json!(["c1"]));
        raw
    }

    fn reconciler() -> Reconciler {
        Reconciler::new("room", Arc::new(Mutex::new(PendingIntentQueue::new())))
    }

    #[test]
    fn test_pipeline_layers_overlay_over_public_state() {
        let rec = reconciler();
        rec.with_overlay(|overlay| {
            overlay.upsert(OverlayCard {
                card_id: "c1".into(),
                name: Some("Hidden Dragon".into()),
                printing: None,
                current_face_index: None,
            });
        });

        let snapshot = rec.reconcile(&raw_room());
        assert_eq!(snapshot.cards["c1"].name, "Hidden Dragon");
        // Public fields stay public.
        assert!(snapshot.cards["c1"].face_down);
    }

    #[test]
    fn test_pipeline_replays_pending_intents() {
        let pending = Arc::new(Mutex::new(PendingIntentQueue::new()));
        pending.lock().unwrap().push(
            Intent::TapCard {
                card_id: "c1".into(),
                tapped: true,
            },
            false,
        );
        let rec = Reconciler::new("room", pending);

        let snapshot = rec.reconcile(&raw_room());
        assert!(snapshot.cards["c1"].tapped);
        assert_eq!(rec.pending_intents(), 1);

        // Once the authoritative state shows the tap, the intent retires.
        let mut raw = raw_room();
        let mut card = Card::new("c1", "p1", "p1-battlefield", "????");
        card.face_down = true;
        card.tapped = true;
        raw.cards
            .insert("c1".into(), serde_json::to_value(&card).unwrap());
        let snapshot = rec.reconcile(&raw);
        assert!(snapshot.cards["c1"].tapped);
        assert_eq!(rec.pending_intents(), 0);
    }

    #[test]
    fn test_malformed_entries_dropped_not_fatal() {
        let rec = reconciler();
        let mut raw = raw_room();
        raw.cards.insert("bad".into(), json!("not a card"));
        raw.players.insert("worse".into(), json!(42));

        let snapshot = rec.reconcile(&raw);
        assert_eq!(snapshot.cards.len(), 1);
        assert_eq!(snapshot.players.len(), 1);
    }

    #[test]
    fn test_overlay_entries_for_deleted_cards_gc() {
        let rec = reconciler();
        rec.with_overlay(|overlay| {
            overlay.upsert(OverlayCard {
                card_id: "long-gone".into(),
                name: Some("??".into()),
                printing: None,
                current_face_index: None,
            });
        });
        rec.reconcile(&raw_room());
        assert!(rec.with_overlay(|o| o.get("long-gone").is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_bursts() {
        let debouncer = Debouncer::new(Duration::from_millis(40));
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let runs = runs.clone();
            debouncer.trigger(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::advance(Duration::from_millis(5)).await;
        }
        tokio::time::advance(Duration::from_millis(100)).await;
        // Let the spawned task run.
        tokio::task::yield_now().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_cancel_prevents_fire() {
        let debouncer = Debouncer::new(Duration::from_millis(40));
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        debouncer.trigger(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();

        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
