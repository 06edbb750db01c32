/// A scene graph shared between render sessions
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;
#[cfg(target_arch = "wasm32")]
use web_time::Instant;

use crate::error::SceneError;
use crate::scene::SceneGraph;

/// Sleep between write attempts while another writer holds the lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Reader/writer handle to one [`SceneGraph`].
///
/// Clones point at the same graph; the graph is dropped with the last clone.
/// Reads may overlap each other but never a write, and a write waits at most
/// the given timeout before failing with [`SceneError::MutationConflict`].
#[derive(Debug, Clone, Default)]
pub struct SharedScene {
    inner: Arc<RwLock<SceneGraph>>,
}

impl SharedScene {
    pub fn new(graph: SceneGraph) -> Self {
        Self {
            inner: Arc::new(RwLock::new(graph)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, SceneGraph> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("scene lock poisoned by a panicked writer, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Acquire the write lock, giving up after `timeout`.
    pub fn write(&self, timeout: Duration) -> Result<RwLockWriteGuard<'_, SceneGraph>, SceneError> {
        // The clock is only read once the lock turns out to be contended.
        let mut start = None;
        loop {
            match self.inner.try_write() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => {
                    log::warn!("scene lock poisoned by a panicked writer, recovering");
                    return Ok(poisoned.into_inner());
                }
                Err(TryLockError::WouldBlock) => {
                    let waited = start.get_or_insert_with(Instant::now).elapsed();
                    if waited >= timeout {
                        log::warn!("scene write lock not acquired within {:?}", timeout);
                        return Err(SceneError::MutationConflict {
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    backoff(RETRY_INTERVAL.min(timeout - waited));
                }
            }
        }
    }

    /// Run one structural operation under the write lock.
    pub fn mutate<R>(
        &self,
        timeout: Duration,
        op: impl FnOnce(&mut SceneGraph) -> R,
    ) -> Result<R, SceneError> {
        let mut guard = self.write(timeout)?;
        Ok(op(&mut guard))
    }

    pub fn revision(&self) -> u64 {
        self.read().revision()
    }

    /// Number of handles (sessions and other holders) sharing this graph.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn ptr_eq(&self, other: &SharedScene) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn backoff(interval: Duration) {
    std::thread::sleep(interval);
}

/// The browser main thread cannot block.
#[cfg(target_arch = "wasm32")]
fn backoff(_interval: Duration) {
    std::hint::spin_loop();
}
