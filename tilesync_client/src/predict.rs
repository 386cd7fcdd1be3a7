//! Client-side prediction.
//!
//! The client applies its own input immediately instead of waiting a round
//! trip. Every predicted frame is tagged with a `seq` and kept in a bounded
//! [`InputBuffer`] so the [`Reconciler`](crate::reconcile::Reconciler) can
//! replay whatever the server has not acknowledged yet.
//!
//! Consecutive frames with the same input form a run. Only the first frame
//! of a run is sent, so the server echoes that `seq` for as long as it keeps
//! applying the input; each entry records its run and offset into it so a
//! snapshot reporting held time can be matched frame by frame.

use std::collections::VecDeque;

use tilesync_shared::{
    math::Vec2,
    movement::{self, MovementInput},
};

/// Default ring capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 30;

/// Slack when matching server held time against frame boundaries.
const HELD_EPSILON: f32 = 1e-4;

/// One predicted frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedInput {
    pub seq: u64,
    pub input: MovementInput,
    /// Client clock, milliseconds since session start.
    pub timestamp_ms: u64,
    /// Frame delta the prediction used, replayed verbatim.
    pub dt: f32,
    /// `seq` of the first frame of the run this frame belongs to.
    pub run_start: u64,
    /// Seconds of the run predicted before this frame.
    pub run_offset: f32,
}

/// Bounded ring of [`BufferedInput`] in receipt order.
#[derive(Debug)]
pub struct InputBuffer {
    entries: VecDeque<BufferedInput>,
    capacity: usize,
}

impl InputBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an entry, evicting the oldest when full.
    pub fn push(&mut self, entry: BufferedInput) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Drops every entry with `seq <= seq`.
    pub fn discard_through(&mut self, seq: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.seq > seq);
        before - self.entries.len()
    }

    /// Drops every entry matching `covered`.
    pub fn discard_if(&mut self, mut covered: impl FnMut(&BufferedInput) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !covered(e));
        before - self.entries.len()
    }

    /// Entries with `seq > seq`, sorted by `seq`.
    pub fn pending_after(&self, seq: u64) -> Vec<BufferedInput> {
        let mut pending: Vec<BufferedInput> =
            self.entries.iter().filter(|e| e.seq > seq).copied().collect();
        pending.sort_by_key(|e| e.seq);
        pending
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest entry still buffered.
    pub fn front(&self) -> Option<&BufferedInput> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedInput> {
        self.entries.iter()
    }
}

/// Output of a single prediction step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predicted {
    pub position: Vec2,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct Run {
    start: u64,
    input: MovementInput,
    elapsed: f32,
}

/// Local movement predictor.
#[derive(Debug)]
pub struct PredictionEngine {
    buffer: InputBuffer,
    last_seq: u64,
    run: Option<Run>,
}

impl Default for PredictionEngine {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl PredictionEngine {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            buffer: InputBuffer::new(buffer_capacity),
            last_seq: 0,
            run: None,
        }
    }

    /// Predicts one frame and buffers the input under a fresh `seq`.
    pub fn predict(
        &mut self,
        current: Vec2,
        input: MovementInput,
        speed: f32,
        dt: f32,
        timestamp_ms: u64,
    ) -> Predicted {
        self.last_seq += 1;
        let seq = self.last_seq;
        let input = input.normalized();
        let run = match self.run {
            Some(run) if run.input == input => run,
            _ => Run {
                start: seq,
                input,
                elapsed: 0.0,
            },
        };
        self.buffer.push(BufferedInput {
            seq,
            input,
            timestamp_ms,
            dt,
            run_start: run.start,
            run_offset: run.elapsed,
        });
        self.run = Some(Run {
            elapsed: run.elapsed + dt,
            ..run
        });
        Predicted {
            position: movement::step(current, input, speed, dt),
            seq,
        }
    }

    /// Re-applies every buffered input after `after_seq` on top of `base`.
    pub fn replay(&self, base: Vec2, after_seq: u64, speed: f32) -> Vec2 {
        self.buffer
            .pending_after(after_seq)
            .iter()
            .fold(base, |pos, e| movement::step(pos, e.input, speed, e.dt))
    }

    /// Rebuilds the position from a snapshot whose server has applied every
    /// input before `seq` and then held the input of `seq` for `held`
    /// seconds.
    ///
    /// Frames of that run fully inside `held` are dropped, a frame that
    /// straddles the boundary is replayed for its uncovered part only, and
    /// everything else is replayed in `seq` order on top of `base`. When
    /// `seq` cannot be located in the buffer this falls back to
    /// [`acknowledge`](Self::acknowledge) and [`replay`](Self::replay).
    pub fn rebase_held(&mut self, base: Vec2, seq: u64, held: f32, speed: f32) -> Vec2 {
        let anchor = self
            .buffer
            .iter()
            .find(|e| e.seq == seq)
            .map(|e| (e.run_start, e.run_offset))
            .or_else(|| {
                self.buffer
                    .iter()
                    .any(|e| e.run_start == seq)
                    .then_some((seq, 0.0))
            });
        let Some((run, origin)) = anchor else {
            self.acknowledge(seq);
            return self.replay(base, seq, speed);
        };

        // Seconds of the run the server had already applied when `e` began.
        let applied_before = |e: &BufferedInput| -> Option<f32> {
            (e.run_start == run && e.seq >= seq).then(|| held - (e.run_offset - origin))
        };

        self.buffer.discard_if(|e| {
            e.seq < seq || applied_before(e).is_some_and(|a| e.dt <= a + HELD_EPSILON)
        });
        self.buffer.pending_after(0).iter().fold(base, |pos, e| {
            let dt = match applied_before(e) {
                Some(a) if a > 0.0 => e.dt - a,
                _ => e.dt,
            };
            movement::step(pos, e.input, speed, dt)
        })
    }

    /// Forgets inputs the server has applied.
    pub fn acknowledge(&mut self, seq: u64) -> usize {
        self.buffer.discard_through(seq)
    }

    /// Buffers an externally produced entry, e.g. inputs restored out of
    /// order. Keeps `last_seq` ahead of every buffered `seq`.
    pub fn buffer_input(&mut self, entry: BufferedInput) {
        self.last_seq = self.last_seq.max(entry.seq);
        self.buffer.push(entry);
    }

    /// Most recently assigned `seq`, 0 before the first prediction.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn buffer(&self) -> &InputBuffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn right() -> MovementInput {
        MovementInput {
            right: true,
            ..Default::default()
        }
    }

    #[test]
    fn predict_moves_and_assigns_increasing_seq() {
        let mut engine = PredictionEngine::default();
        let a = engine.predict(Vec2::ZERO, right(), 100.0, 0.5, 0);
        let b = engine.predict(a.position, right(), 100.0, 0.5, 16);
        assert_eq!(a.position, Vec2::new(50.0, 0.0));
        assert_eq!(b.position, Vec2::new(100.0, 0.0));
        assert_eq!((a.seq, b.seq), (1, 2));
        assert_eq!(engine.buffer().len(), 2);
    }

    #[test]
    fn buffer_evicts_oldest_after_capacity() {
        let mut engine = PredictionEngine::new(30);
        let mut pos = Vec2::ZERO;
        for i in 0..31 {
            pos = engine.predict(pos, right(), 60.0, 1.0 / 60.0, i).position;
        }
        assert_eq!(engine.buffer().len(), 30);
        assert_eq!(engine.buffer().front().map(|e| e.seq), Some(2));
    }

    #[test]
    fn acknowledge_drops_applied_inputs() {
        let mut engine = PredictionEngine::default();
        for i in 0..5 {
            engine.predict(Vec2::ZERO, right(), 60.0, 0.1, i);
        }
        assert_eq!(engine.acknowledge(3), 3);
        let left: Vec<u64> = engine.buffer().iter().map(|e| e.seq).collect();
        assert_eq!(left, vec![4, 5]);
    }

    #[test]
    fn frames_with_the_same_input_share_a_run() {
        let mut engine = PredictionEngine::default();
        for i in 0..3 {
            engine.predict(Vec2::ZERO, right(), 60.0, 0.1, i);
        }
        engine.predict(Vec2::ZERO, MovementInput::IDLE, 60.0, 0.1, 3);
        let runs: Vec<u64> = engine.buffer().iter().map(|e| e.run_start).collect();
        assert_eq!(runs, vec![1, 1, 1, 4]);
        let offsets: Vec<f32> = engine.buffer().iter().map(|e| e.run_offset).collect();
        assert!((offsets[2] - 0.2).abs() < 1e-6);
        assert_eq!(offsets[3], 0.0);
    }

    #[test]
    fn held_time_covers_whole_frames() {
        let mut engine = PredictionEngine::default();
        for i in 0..30 {
            engine.predict(Vec2::ZERO, right(), 60.0, 1.0 / 60.0, i);
        }
        // Server held seq 1 for 15 frames' worth and stands at x = 15.
        let pos = engine.rebase_held(Vec2::new(15.0, 0.0), 1, 0.25, 60.0);
        assert!((pos.x - 30.0).abs() < 1e-3, "x = {}", pos.x);
        assert_eq!(engine.buffer().len(), 15);
        assert_eq!(engine.buffer().front().map(|e| e.seq), Some(16));
    }

    #[test]
    fn held_time_splits_a_straddling_frame() {
        let mut engine = PredictionEngine::default();
        for i in 0..30 {
            engine.predict(Vec2::ZERO, right(), 60.0, 1.0 / 60.0, i);
        }
        let pos = engine.rebase_held(Vec2::new(1.5, 0.0), 1, 0.025, 60.0);
        assert!((pos.x - 30.0).abs() < 1e-3, "x = {}", pos.x);
        assert_eq!(engine.buffer().front().map(|e| e.seq), Some(2));
    }

    #[test]
    fn held_time_past_the_run_only_drops_that_run() {
        let mut engine = PredictionEngine::default();
        for i in 0..4 {
            engine.predict(Vec2::ZERO, right(), 60.0, 0.5, i);
        }
        let up = MovementInput {
            up: true,
            ..Default::default()
        };
        engine.predict(Vec2::ZERO, up, 60.0, 0.5, 4);

        // The server has not seen seq 5 yet and kept moving right.
        let pos = engine.rebase_held(Vec2::new(150.0, 0.0), 1, 2.5, 60.0);
        assert_eq!(pos, Vec2::new(150.0, -30.0));
        let left: Vec<u64> = engine.buffer().iter().map(|e| e.seq).collect();
        assert_eq!(left, vec![5]);
    }

    #[test]
    fn buffered_input_is_stored_normalized() {
        let mut engine = PredictionEngine::default();
        let jammed = MovementInput {
            left: true,
            right: true,
            up: true,
            down: false,
        };
        engine.predict(Vec2::ZERO, jammed, 60.0, 0.1, 0);
        let stored = engine.buffer().front().map(|e| e.input);
        assert_eq!(
            stored,
            Some(MovementInput {
                up: true,
                ..Default::default()
            })
        );
    }
}
