//! Client session core.
//!
//! Everything the client does between sockets: sampling input, predicting
//! and reconciling the controlled entity, tracking remote entities and
//! scheduling LOD. The host event loop calls [`ClientSession::frame`] once
//! per rendered frame, [`ClientSession::handle_message`] for every inbound
//! message and [`ClientSession::update_lod`] on whatever cadence it likes;
//! the scheduler enforces its own interval.

use std::time::{Duration, Instant};

use tilesync_shared::{
    config::EngineConfig,
    entity::{EntityId, EntityKind},
    event::EventBus,
    math::Vec2,
    movement::MovementInput,
    net::{ClientId, EntityPositionUpdate, InputCommand, NetMsg},
    render::{DetailProfile, HandleFactory, NullHandle},
};
use tracing::{debug, warn};

use crate::{
    input::{build_command, Direction, InputSampler, RawInput},
    interp::RemoteInterpolator,
    lod::{Camera, EntityRegistry, LodPass, LodScheduler, LodStats, TierChanged},
    predict::PredictionEngine,
    reconcile::{ReconcileOutcome, Reconciled, Reconciler},
};

/// Longest frame delta a single frame may simulate, in seconds. Longer
/// stalls are treated as one slow frame.
pub const MAX_FRAME_DT: f32 = 0.25;

/// What one frame produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOutput {
    pub input: MovementInput,
    pub facing: Option<Direction>,
    pub seq: u64,
    pub predicted: Vec2,
    pub rendered: Vec2,
    /// Present only when the input changed this frame.
    pub outbound: Option<InputCommand>,
}

pub struct ClientSession {
    client_id: ClientId,
    entity: EntityId,
    speed: f32,
    clock: Duration,

    sampler: InputSampler,
    engine: PredictionEngine,
    reconciler: Reconciler,

    registry: EntityRegistry,
    scheduler: LodScheduler,
    interp: RemoteInterpolator,
    handles: Box<dyn HandleFactory>,
    events: EventBus,
}

impl ClientSession {
    pub fn new(client_id: ClientId, entity: EntityId, spawn: Vec2, cfg: &EngineConfig) -> Self {
        Self {
            client_id,
            entity,
            speed: cfg.movement.speed,
            clock: Duration::ZERO,
            sampler: InputSampler::new(),
            engine: PredictionEngine::new(cfg.movement.input_buffer_capacity),
            reconciler: Reconciler::new(spawn, cfg.reconcile.clone()),
            registry: EntityRegistry::new(),
            scheduler: LodScheduler::new(cfg.lod.clone()),
            interp: RemoteInterpolator::new(cfg.interp.clone()),
            handles: Box::new(NullHandle),
            events: EventBus::new(),
        }
    }

    /// Uses `factory` to create render objects for new remote entities.
    pub fn with_handle_factory(mut self, factory: Box<dyn HandleFactory>) -> Self {
        self.handles = factory;
        self
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Milliseconds of frame time since the session started.
    pub fn clock_ms(&self) -> u64 {
        self.clock.as_millis() as u64
    }

    /// Samples input, predicts one frame and advances smoothing.
    pub fn frame(&mut self, raw: RawInput, dt: f32) -> FrameOutput {
        let dt = if dt.is_finite() {
            dt.clamp(0.0, MAX_FRAME_DT)
        } else {
            0.0
        };
        self.clock += Duration::from_secs_f32(dt);
        let timestamp_ms = self.clock_ms();

        let sample = self.sampler.sample(raw);
        let predicted =
            self.reconciler
                .apply_local(&mut self.engine, sample.input, self.speed, dt, timestamp_ms);
        let outbound = sample
            .changed
            .then(|| build_command(self.client_id, predicted.seq, timestamp_ms, sample.input));

        let rendered = self.reconciler.update(dt);
        self.interp.update(dt);

        FrameOutput {
            input: sample.input,
            facing: sample.facing,
            seq: predicted.seq,
            predicted: predicted.position,
            rendered,
            outbound,
        }
    }

    /// Applies one inbound message. Never fails; bad input is logged and
    /// dropped.
    pub fn handle_message(&mut self, msg: NetMsg) {
        match msg {
            NetMsg::PositionSnapshot(snap) if snap.entity == self.entity => {
                let outcome = self.reconciler.on_snapshot(&snap, &mut self.engine, self.speed);
                if let ReconcileOutcome::Applied { error, state, .. } = outcome {
                    self.events.push(Reconciled {
                        seq: snap.seq,
                        error,
                        state,
                    });
                }
            }
            NetMsg::PositionSnapshot(snap) => {
                debug!(entity = %snap.entity, "Snapshot for entity we do not control");
            }
            NetMsg::EntityPositionUpdate(update) => self.on_entity_update(update),
            NetMsg::EntityRemoved { id } => {
                if self.registry.remove(id).is_some() {
                    debug!(entity = %id, "Entity left");
                }
                self.interp.remove(id);
            }
            other => {
                debug!(?other, "Unhandled session message");
            }
        }
    }

    fn on_entity_update(&mut self, update: EntityPositionUpdate) {
        if update.id == self.entity {
            return;
        }
        let position = update.position();
        if !position.is_finite() {
            warn!(
                entity = %update.id,
                x = update.x,
                y = update.y,
                "Ignoring malformed position update"
            );
            return;
        }
        if !self.registry.update_position(update.id, position) {
            self.track(update.id, update.kind, position);
        }
        self.interp.set_target(update.id, position);
    }

    fn track(&mut self, id: EntityId, kind: EntityKind, position: Vec2) {
        let handle = self.handles.create(id, kind);
        self.registry
            .add(id, kind, position, DetailProfile::for_kind(kind), handle);
        debug!(entity = %id, ?kind, "Tracking entity");
    }

    /// Runs a LOD pass if one is due.
    pub fn update_lod(&mut self, now: Instant, camera: &Camera) -> Option<LodPass> {
        self.scheduler
            .on_tick(now, camera, &mut self.registry, &mut self.events)
    }

    /// Forces the next [`update_lod`](Self::update_lod) to run, e.g. after
    /// a camera teleport.
    pub fn force_lod_update(&mut self) {
        self.scheduler.force_update();
    }

    pub fn drain_tier_changes(&mut self) -> Vec<TierChanged> {
        self.events.drain::<TierChanged>()
    }

    pub fn drain_reconciled(&mut self) -> Vec<Reconciled> {
        self.events.drain::<Reconciled>()
    }

    pub fn lod_stats(&self) -> LodStats {
        self.registry.stats()
    }

    /// Smoothed position of a remote entity.
    pub fn remote_position(&self, id: EntityId) -> Option<Vec2> {
        self.interp.rendered(id)
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn engine(&self) -> &PredictionEngine {
        &self.engine
    }

    pub fn scheduler_mut(&mut self) -> &mut LodScheduler {
        &mut self.scheduler
    }
}
