use std::sync::Arc;

use parking_lot::Mutex;
use venue_core::events::ServerEvent;
use venue_core::{ConnectionId, SceneIndex};

use crate::client::ConnectionRegistry;

/// Owns the process-wide scene and pushes it to clients.
///
/// `set_scene` and `on_admit` both hold `current` while they enqueue, so a
/// connection never receives an older value after a newer one: the last
/// `sceneIdx` in any client's queue is the latest committed scene. A
/// connection whose queue cannot take a scene is released instead of being
/// left on a stale one; it gets the current scene again when it reconnects.
pub struct SceneCoordinator {
    current: Mutex<Option<SceneIndex>>,
    registry: Arc<ConnectionRegistry>,
}

impl SceneCoordinator {
    pub fn new(registry: Arc<ConnectionRegistry>, initial: Option<SceneIndex>) -> Self {
        Self {
            current: Mutex::new(initial),
            registry,
        }
    }

    pub fn current(&self) -> Option<SceneIndex> {
        self.current.lock().clone()
    }

    /// Send the current scene to a newly admitted connection, if one was ever set.
    pub fn on_admit(&self, id: &ConnectionId) -> bool {
        let current = self.current.lock();
        let Some(scene) = current.as_ref() else {
            return false;
        };
        let sent = self
            .registry
            .send_event(id, &ServerEvent::SceneIdx(scene.clone()));
        if !sent {
            self.registry.release(id);
        }
        sent
    }

    /// Commit `scene` and queue it once for every admitted connection.
    /// Returns how many connections accepted it; departed ones are skipped
    /// and stalled ones released.
    pub fn set_scene(&self, scene: SceneIndex) -> usize {
        let mut current = self.current.lock();
        let json = match ServerEvent::SceneIdx(scene.clone()).encode() {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(scene = %scene, error = %e, "failed to serialize scene");
                return 0;
            }
        };
        *current = Some(scene.clone());
        let delivered = self.registry.broadcast_or_release(&json);
        tracing::info!(scene = %scene, delivered, "scene changed");
        delivered
    }
}
