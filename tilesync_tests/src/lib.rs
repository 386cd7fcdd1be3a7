//! Helpers shared by the integration tests.

use std::sync::{Arc, Mutex, MutexGuard};

use tilesync_shared::{
    entity::{EntityId, EntityKind},
    render::{HandleFactory, RenderHandle},
};

/// Installs a test-friendly subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// A render call observed through a [`RecordingHandle`].
#[derive(Debug, Clone, PartialEq)]
pub enum HandleCall {
    Visible(bool),
    Active(bool),
    Alpha(f32),
    Element(String, bool),
    AnimationPaused(bool),
}

/// Call log shared between a test and the handles it hands out.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<(EntityId, HandleCall)>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(EntityId, HandleCall)>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn handle(&self, id: EntityId) -> Box<dyn RenderHandle> {
        Box::new(RecordingHandle {
            id,
            log: self.clone(),
        })
    }

    pub fn factory(&self) -> Box<dyn HandleFactory> {
        Box::new(RecordingFactory { log: self.clone() })
    }

    pub fn calls_for(&self, id: EntityId) -> Vec<HandleCall> {
        self.lock()
            .iter()
            .filter(|(e, _)| *e == id)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn record(&self, id: EntityId, call: HandleCall) {
        self.lock().push((id, call));
    }
}

/// Render handle that records every call into a [`CallLog`].
#[derive(Debug)]
pub struct RecordingHandle {
    id: EntityId,
    log: CallLog,
}

impl RenderHandle for RecordingHandle {
    fn set_visible(&mut self, visible: bool) {
        self.log.record(self.id, HandleCall::Visible(visible));
    }

    fn set_active(&mut self, active: bool) {
        self.log.record(self.id, HandleCall::Active(active));
    }

    fn set_alpha(&mut self, alpha: f32) {
        self.log.record(self.id, HandleCall::Alpha(alpha));
    }

    fn set_element_visible(&mut self, element: &str, visible: bool) {
        self.log
            .record(self.id, HandleCall::Element(element.to_string(), visible));
    }

    fn set_animation_paused(&mut self, paused: bool) {
        self.log.record(self.id, HandleCall::AnimationPaused(paused));
    }
}

#[derive(Debug)]
struct RecordingFactory {
    log: CallLog,
}

impl HandleFactory for RecordingFactory {
    fn create(&mut self, id: EntityId, _kind: EntityKind) -> Box<dyn RenderHandle> {
        self.log.handle(id)
    }
}
