//! GPU surface pool collaborator.
//!
//! When a decoded buffer lives on the GPU and no copy is requested, the
//! bridge never maps it. It asks a [`SurfacePool`] for a native handle keyed
//! by the surface identity and hands over a recycle callback that keeps the
//! engine sample alive. The callback runs once, when the pool's handle is
//! released.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::engine::SurfaceId;

/// Runs when the caller is done with a native picture.
pub type RecycleFn = Box<dyn FnOnce() + Send + Sync>;

/// A GPU picture owned by the surface pool.
pub trait NativeBuffer: Send + Sync + fmt::Debug {
    fn surface(&self) -> SurfaceId;
}

pub type NativeBufferHandle = Arc<dyn NativeBuffer>;

pub trait SurfacePool: Send + Sync {
    fn get_buffer(&self, id: SurfaceId, on_recycle: RecycleFn) -> NativeBufferHandle;
}

/// Surface pool that releases on drop and counts outstanding handles per
/// surface.
#[derive(Clone, Default)]
pub struct SurfaceHandlePool {
    outstanding: Arc<Mutex<HashMap<SurfaceId, usize>>>,
}

impl SurfaceHandlePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles for `id` that have not been dropped yet.
    pub fn outstanding(&self, id: SurfaceId) -> usize {
        self.outstanding.lock().get(&id).copied().unwrap_or(0)
    }

    pub fn total_outstanding(&self) -> usize {
        self.outstanding.lock().values().sum()
    }
}

impl SurfacePool for SurfaceHandlePool {
    fn get_buffer(&self, id: SurfaceId, on_recycle: RecycleFn) -> NativeBufferHandle {
        *self.outstanding.lock().entry(id).or_insert(0) += 1;
        log::trace!("surface {} checked out", id);
        Arc::new(SurfaceHandle {
            id,
            on_recycle: Mutex::new(Some(on_recycle)),
            outstanding: self.outstanding.clone(),
        })
    }
}

struct SurfaceHandle {
    id: SurfaceId,
    on_recycle: Mutex<Option<RecycleFn>>,
    outstanding: Arc<Mutex<HashMap<SurfaceId, usize>>>,
}

impl NativeBuffer for SurfaceHandle {
    fn surface(&self) -> SurfaceId {
        self.id
    }
}

impl fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceHandle").field("id", &self.id).finish()
    }
}

impl Drop for SurfaceHandle {
    fn drop(&mut self) {
        {
            let mut outstanding = self.outstanding.lock();
            if let Some(count) = outstanding.get_mut(&self.id) {
                *count -= 1;
                if *count == 0 {
                    outstanding.remove(&self.id);
                }
            }
        }
        if let Some(recycle) = self.on_recycle.lock().take() {
            recycle();
        }
    }
}
