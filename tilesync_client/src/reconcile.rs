//! Server reconciliation for the locally controlled entity.
//!
//! The reconciler tracks two positions:
//! - `predicted`: where the entity logically is (snapshot + replayed inputs)
//! - `rendered`: what is drawn, which chases `predicted` after a correction
//!   instead of snapping to it
//!
//! Snapshots are applied strictly in `seq` order. A snapshot that is not
//! newer than the last applied one is ignored, which makes duplicate and
//! reordered datagrams harmless. Snapshots that repeat a `seq` with a longer
//! held time count as newer, since the server kept applying that input.

use tilesync_shared::{
    config::ReconcileConfig, math::Vec2, movement::MovementInput, net::PositionSnapshot,
};
use tracing::{debug, warn};

use crate::predict::{Predicted, PredictionEngine};

/// Reconciliation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    /// Rendered position equals the predicted one.
    Predicting,
    /// Rendered position is blending toward the predicted one.
    Correcting,
}

/// Why a snapshot was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// `seq` not greater than the last applied snapshot.
    Stale,
    /// Coordinates or held time are not finite, or held time is negative.
    Malformed,
}

/// Result of feeding a snapshot to the reconciler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    Ignored(IgnoreReason),
    Applied {
        /// Inputs replayed on top of the snapshot.
        replayed: usize,
        /// Distance between the rendered and the corrected position.
        error: f32,
        state: ReconcileState,
    },
}

/// Published on the event bus whenever a snapshot is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciled {
    pub seq: u64,
    pub error: f32,
    pub state: ReconcileState,
}

#[derive(Debug)]
pub struct Reconciler {
    cfg: ReconcileConfig,
    state: ReconcileState,
    predicted: Vec2,
    rendered: Vec2,
    /// `(seq, held seconds)` of the last applied snapshot.
    last_applied: Option<(u64, f32)>,
}

impl Reconciler {
    pub fn new(spawn: Vec2, cfg: ReconcileConfig) -> Self {
        Self {
            cfg,
            state: ReconcileState::Predicting,
            predicted: spawn,
            rendered: spawn,
            last_applied: None,
        }
    }

    pub fn state(&self) -> ReconcileState {
        self.state
    }

    pub fn predicted(&self) -> Vec2 {
        self.predicted
    }

    pub fn rendered(&self) -> Vec2 {
        self.rendered
    }

    pub fn last_applied_seq(&self) -> Option<u64> {
        self.last_applied.map(|(seq, _)| seq)
    }

    /// Predicts one local frame. The rendered position moves by the same
    /// delta so an ongoing correction does not fight player movement.
    pub fn apply_local(
        &mut self,
        engine: &mut PredictionEngine,
        input: MovementInput,
        speed: f32,
        dt: f32,
        timestamp_ms: u64,
    ) -> Predicted {
        let next = engine.predict(self.predicted, input, speed, dt, timestamp_ms);
        let delta = next.position - self.predicted;
        self.predicted = next.position;
        self.rendered += delta;
        next
    }

    pub fn on_snapshot(
        &mut self,
        snapshot: &PositionSnapshot,
        engine: &mut PredictionEngine,
        speed: f32,
    ) -> ReconcileOutcome {
        let base = snapshot.position();
        let held_ok = snapshot
            .held_secs
            .map_or(true, |h| h.is_finite() && h >= 0.0);
        if !base.is_finite() || !held_ok {
            warn!(
                seq = snapshot.seq,
                x = snapshot.x,
                y = snapshot.y,
                held = ?snapshot.held_secs,
                "Ignoring malformed snapshot"
            );
            return ReconcileOutcome::Ignored(IgnoreReason::Malformed);
        }
        let held = snapshot.held_secs.unwrap_or(0.0);
        if let Some((last_seq, last_held)) = self.last_applied {
            if snapshot.seq < last_seq || (snapshot.seq == last_seq && held <= last_held) {
                debug!(seq = snapshot.seq, last_seq, "Ignoring stale snapshot");
                return ReconcileOutcome::Ignored(IgnoreReason::Stale);
            }
        }

        let corrected = match snapshot.held_secs {
            Some(held) => engine.rebase_held(base, snapshot.seq, held, speed),
            None => {
                engine.acknowledge(snapshot.seq);
                engine.replay(base, snapshot.seq, speed)
            }
        };
        let replayed = engine.buffer().len();

        self.last_applied = Some((snapshot.seq, held));
        self.predicted = corrected;

        let error = self.rendered.distance(corrected);
        if error > self.cfg.correction_epsilon {
            self.state = ReconcileState::Correcting;
            debug!(seq = snapshot.seq, error, replayed, "Prediction diverged, correcting");
        } else {
            self.rendered = corrected;
            self.state = ReconcileState::Predicting;
        }

        ReconcileOutcome::Applied {
            replayed,
            error,
            state: self.state,
        }
    }

    /// Advances correction smoothing by `dt` seconds and returns the
    /// rendered position.
    pub fn update(&mut self, dt: f32) -> Vec2 {
        if self.state == ReconcileState::Correcting {
            let t = (self.cfg.lerp_factor * dt * 60.0).min(1.0);
            self.rendered = self.rendered.lerp(self.predicted, t);
            if self.rendered.distance(self.predicted) <= self.cfg.correction_epsilon {
                self.rendered = self.predicted;
                self.state = ReconcileState::Predicting;
            }
        }
        self.rendered
    }
}
