//! Output sample pool.
//!
//! Output samples are expensive (one picture-sized buffer each), so the
//! driver lends them to the engine and gets them back through a recycle
//! hook when the last holder drops them. That drop may happen on any
//! thread, so the queue sits behind a mutex.
//!
//! Each lent sample remembers the pool generation it was lent in.
//! [`SamplePool::clear`] starts a new generation, and samples from an older
//! one are released instead of re-pooled when they come back, so buffers
//! sized for a previous format never re-enter the pool. After
//! [`SamplePool::close`] every recycle is a no-op.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::engine::{MediaBuffer, Sample};

#[derive(Default)]
struct PoolQueue {
    samples: VecDeque<Sample>,
    generation: u64,
    closed: bool,
}

#[derive(Default)]
struct PoolShared {
    queue: Mutex<PoolQueue>,
    recycled: AtomicUsize,
    discarded: AtomicUsize,
}

/// Cloneable handle to a sample pool.
#[derive(Clone, Default)]
pub struct SamplePool {
    shared: Arc<PoolShared>,
}

impl SamplePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes an idle sample, if any. An empty pool is not an error; the
    /// caller allocates instead.
    pub fn try_pop(&self) -> Option<Sample> {
        self.shared.queue.lock().samples.pop_front()
    }

    /// Returns a sample to the pool. Ignored once the pool is closed.
    pub fn push(&self, mut sample: Sample) {
        sample.detach();
        let mut queue = self.shared.queue.lock();
        if !queue.closed {
            queue.samples.push_back(sample);
        }
    }

    /// Drops every idle sample and starts a new generation.
    pub fn clear(&self) {
        let drained: Vec<Sample> = {
            let mut queue = self.shared.queue.lock();
            queue.generation += 1;
            queue.samples.drain(..).collect()
        };
        log::debug!("sample pool cleared ({} idle samples released)", drained.len());
    }

    /// Tears the pool down. Samples still lent out are released when they
    /// come back.
    pub fn close(&self) {
        let drained: Vec<Sample> = {
            let mut queue = self.shared.queue.lock();
            queue.closed = true;
            queue.generation += 1;
            queue.samples.drain(..).collect()
        };
        drop(drained);
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.queue.lock().closed
    }

    pub fn generation(&self) -> u64 {
        self.shared.queue.lock().generation
    }

    /// Samples that made it back into the pool.
    pub fn recycled(&self) -> usize {
        self.shared.recycled.load(Ordering::Relaxed)
    }

    /// Samples released on return because of a clear or close.
    pub fn discarded(&self) -> usize {
        self.shared.discarded.load(Ordering::Relaxed)
    }

    /// A recycle hook bound to the current generation.
    ///
    /// The hook holds only a weak reference, so it never keeps a dropped
    /// pool alive.
    pub fn recycler(&self) -> impl FnOnce(Vec<Arc<dyn MediaBuffer>>) + Send + Sync + 'static {
        let weak: Weak<PoolShared> = Arc::downgrade(&self.shared);
        let generation = self.generation();
        move |buffers| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut queue = shared.queue.lock();
            if queue.closed || queue.generation != generation {
                drop(queue);
                shared.discarded.fetch_add(1, Ordering::Relaxed);
                return;
            }
            queue.samples.push_back(Sample::from_buffers(buffers));
            shared.recycled.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Marks `sample` as lent: dropping it sends its buffers back here.
    pub fn lend(&self, sample: &mut Sample) {
        sample.set_recycle(self.recycler());
    }
}

impl std::fmt::Debug for SamplePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.shared.queue.lock();
        f.debug_struct("SamplePool")
            .field("idle", &queue.samples.len())
            .field("generation", &queue.generation)
            .field("closed", &queue.closed)
            .finish()
    }
}
