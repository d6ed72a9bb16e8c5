//! Samples and the buffers inside them.
//!
//! A [`Sample`] is one timestamped unit of media made of one or more
//! [`MediaBuffer`]s. Buffers are either linear memory or references to GPU
//! surfaces; only the sample bridge in `transform::bridge` locks them.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::attributes::{keys, Attributes};
use super::{EngineError, EngineResult};

/// Engine timestamps count 100-nanosecond ticks.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Minimum alignment for any buffer handed to an engine.
pub const MIN_ALIGNMENT: usize = 16;

pub fn duration_to_ticks(d: Duration) -> i64 {
    (d.as_nanos() / 100) as i64
}

pub fn ticks_to_duration(ticks: i64) -> Duration {
    Duration::from_nanos(ticks.max(0) as u64 * 100)
}

/// Identity of a GPU-resident surface: texture handle plus subresource index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId {
    pub surface: u64,
    pub subresource: u32,
}

impl SurfaceId {
    pub fn new(surface: u64, subresource: u32) -> Self {
        Self {
            surface,
            subresource,
        }
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}[{}]", self.surface, self.subresource)
    }
}

/// Memory exposed by a successful lock.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub data: Bytes,
    /// Row pitch in bytes for 2D buffers, `None` for linear ones.
    pub pitch: Option<usize>,
}

/// A lockable region of memory or an opaque GPU surface.
///
/// Every successful [`lock`](MediaBuffer::lock) must be balanced by exactly
/// one [`unlock`](MediaBuffer::unlock).
pub trait MediaBuffer: Send + Sync + fmt::Debug {
    fn lock(&self) -> EngineResult<Mapping>;

    fn unlock(&self) -> EngineResult<()>;

    /// Bytes of valid data.
    fn current_length(&self) -> usize;

    /// Allocated size.
    fn max_length(&self) -> usize;

    fn set_current_length(&self, _len: usize) -> EngineResult<()> {
        Err(EngineError::NotImplemented)
    }

    /// Replaces the buffer contents. Only writable buffers implement this.
    fn write(&self, _data: &[u8]) -> EngineResult<()> {
        Err(EngineError::NotImplemented)
    }

    /// GPU identity, if the buffer wraps a surface.
    fn surface(&self) -> Option<SurfaceId> {
        None
    }
}

#[derive(Debug)]
struct AlignedState {
    writable: Option<BytesMut>,
    frozen: Option<Bytes>,
    current: usize,
    locks: usize,
}

/// Heap buffer whose start address honours a requested alignment.
///
/// Locking freezes the storage into a shared [`Bytes`] so frames can hold it
/// without copying; the next write reclaims it, or reallocates when the old
/// contents are still referenced.
#[derive(Debug)]
pub struct AlignedBuffer {
    capacity: usize,
    alignment: usize,
    state: Mutex<AlignedState>,
}

impl AlignedBuffer {
    pub fn new(capacity: usize, alignment: usize) -> Self {
        let alignment = alignment.max(MIN_ALIGNMENT).next_power_of_two();
        Self {
            capacity,
            alignment,
            state: Mutex::new(AlignedState {
                writable: Some(allocate_aligned(capacity, alignment)),
                frozen: None,
                current: 0,
                locks: 0,
            }),
        }
    }

    /// Allocates and fills in one step.
    pub fn from_slice(data: &[u8], alignment: usize) -> Self {
        let buf = Self::new(data.len(), alignment);
        {
            let mut state = buf.state.lock();
            if let Some(storage) = state.writable.as_mut() {
                storage[..data.len()].copy_from_slice(data);
            }
            state.current = data.len();
        }
        buf
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locks > 0
    }

    fn writable<'a>(&self, state: &'a mut AlignedState) -> &'a mut BytesMut {
        if let Some(frozen) = state.frozen.take() {
            let reclaimed = match frozen.try_into_mut() {
                Ok(storage) if storage.as_ptr() as usize % self.alignment == 0 => storage,
                Ok(storage) => {
                    let mut fresh = allocate_aligned(self.capacity, self.alignment);
                    fresh[..storage.len()].copy_from_slice(&storage);
                    fresh
                }
                // Still referenced by a frame; leave that memory alone.
                Err(_) => allocate_aligned(self.capacity, self.alignment),
            };
            state.writable = Some(reclaimed);
        }
        state
            .writable
            .get_or_insert_with(|| allocate_aligned(self.capacity, self.alignment))
    }
}

impl MediaBuffer for AlignedBuffer {
    fn lock(&self) -> EngineResult<Mapping> {
        let mut state = self.state.lock();
        if state.frozen.is_none() {
            let storage = state
                .writable
                .take()
                .unwrap_or_else(|| allocate_aligned(self.capacity, self.alignment));
            state.frozen = Some(storage.freeze());
        }
        state.locks += 1;
        let current = state.current;
        let data = state
            .frozen
            .as_ref()
            .map(|b| b.slice(..current))
            .unwrap_or_default();
        Ok(Mapping { data, pitch: None })
    }

    fn unlock(&self) -> EngineResult<()> {
        let mut state = self.state.lock();
        if state.locks == 0 {
            return Err(EngineError::Failed("unlock without lock".into()));
        }
        state.locks -= 1;
        Ok(())
    }

    fn current_length(&self) -> usize {
        self.state.lock().current
    }

    fn max_length(&self) -> usize {
        self.capacity
    }

    fn set_current_length(&self, len: usize) -> EngineResult<()> {
        if len > self.capacity {
            return Err(EngineError::Failed(format!(
                "length {} exceeds capacity {}",
                len, self.capacity
            )));
        }
        self.state.lock().current = len;
        Ok(())
    }

    fn write(&self, data: &[u8]) -> EngineResult<()> {
        if data.len() > self.capacity {
            return Err(EngineError::Failed(format!(
                "{} bytes do not fit a {} byte buffer",
                data.len(),
                self.capacity
            )));
        }
        let mut state = self.state.lock();
        if state.locks > 0 {
            return Err(EngineError::Failed("buffer is locked".into()));
        }
        let storage = self.writable(&mut state);
        storage[..data.len()].copy_from_slice(data);
        state.current = data.len();
        Ok(())
    }
}

fn allocate_aligned(capacity: usize, alignment: usize) -> BytesMut {
    let mut raw = BytesMut::zeroed(capacity + alignment);
    let offset = raw.as_ptr().align_offset(alignment).min(alignment);
    let _ = raw.split_to(offset);
    raw.truncate(capacity);
    raw
}

/// Read-only wrapper over caller memory, used when packet data is already
/// suitably aligned.
#[derive(Debug)]
pub struct BufferView {
    data: Bytes,
    locks: Mutex<usize>,
}

impl BufferView {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            locks: Mutex::new(0),
        }
    }
}

impl MediaBuffer for BufferView {
    fn lock(&self) -> EngineResult<Mapping> {
        *self.locks.lock() += 1;
        Ok(Mapping {
            data: self.data.clone(),
            pitch: None,
        })
    }

    fn unlock(&self) -> EngineResult<()> {
        let mut locks = self.locks.lock();
        if *locks == 0 {
            return Err(EngineError::Failed("unlock without lock".into()));
        }
        *locks -= 1;
        Ok(())
    }

    fn current_length(&self) -> usize {
        self.data.len()
    }

    fn max_length(&self) -> usize {
        self.data.len()
    }
}

/// A held lock on a buffer; unlocks exactly once when dropped.
///
/// Zero-copy frame planes share one guard through an `Arc`, so the buffer
/// stays mapped until the last plane goes away.
pub struct BufferLock {
    buffer: Arc<dyn MediaBuffer>,
    mapping: Mapping,
    // Dropped after the unlock, so a pooled owner is recycled last.
    owner: Option<Arc<Sample>>,
}

impl BufferLock {
    pub fn acquire(buffer: Arc<dyn MediaBuffer>) -> EngineResult<Self> {
        let mapping = buffer.lock()?;
        Ok(Self {
            buffer,
            mapping,
            owner: None,
        })
    }

    /// Keeps `owner` alive for as long as the lock is held.
    pub fn with_owner(mut self, owner: Arc<Sample>) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn data(&self) -> &Bytes {
        &self.mapping.data
    }

    pub fn pitch(&self) -> Option<usize> {
        self.mapping.pitch
    }

    pub fn buffer(&self) -> &Arc<dyn MediaBuffer> {
        &self.buffer
    }
}

impl Drop for BufferLock {
    fn drop(&mut self) {
        if let Err(e) = self.buffer.unlock() {
            log::warn!("buffer unlock failed: {}", e);
        }
    }
}

impl fmt::Debug for BufferLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferLock")
            .field("len", &self.mapping.data.len())
            .field("pitch", &self.mapping.pitch)
            .finish()
    }
}

type RecycleFn = Box<dyn FnOnce(Vec<Arc<dyn MediaBuffer>>) + Send + Sync>;

/// One timestamped unit of media.
///
/// A sample borrowed from a pool carries a recycle hook. Dropping the sample,
/// wherever that happens, hands its buffers back through the hook exactly
/// once.
pub struct Sample {
    buffers: Vec<Arc<dyn MediaBuffer>>,
    time: Option<i64>,
    duration: Option<i64>,
    attributes: Attributes,
    recycle: Option<RecycleFn>,
}

impl Sample {
    pub fn new() -> Self {
        Self {
            buffers: Vec::new(),
            time: None,
            duration: None,
            attributes: Attributes::new(),
            recycle: None,
        }
    }

    pub fn from_buffers(buffers: Vec<Arc<dyn MediaBuffer>>) -> Self {
        let mut sample = Self::new();
        sample.buffers = buffers;
        sample
    }

    pub fn with_buffer(mut self, buffer: Arc<dyn MediaBuffer>) -> Self {
        self.buffers.push(buffer);
        self
    }

    pub fn add_buffer(&mut self, buffer: Arc<dyn MediaBuffer>) {
        self.buffers.push(buffer);
    }

    pub fn buffers(&self) -> &[Arc<dyn MediaBuffer>] {
        &self.buffers
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Sum of the current lengths of all buffers.
    pub fn total_length(&self) -> usize {
        self.buffers.iter().map(|b| b.current_length()).sum()
    }

    pub fn time(&self) -> Option<i64> {
        self.time
    }

    pub fn set_time(&mut self, ticks: i64) {
        self.time = Some(ticks);
    }

    pub fn duration(&self) -> Option<i64> {
        self.duration
    }

    pub fn set_duration(&mut self, ticks: i64) {
        self.duration = Some(ticks);
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub fn is_clean_point(&self) -> bool {
        self.attributes.get_u32_or(keys::SAMPLE_CLEAN_POINT, 0) != 0
    }

    pub fn is_discontinuity(&self) -> bool {
        self.attributes.get_u32_or(keys::SAMPLE_DISCONTINUITY, 0) != 0
    }

    /// Installs the hook that receives the buffers when this sample drops.
    pub fn set_recycle<F>(&mut self, recycle: F)
    where
        F: FnOnce(Vec<Arc<dyn MediaBuffer>>) + Send + Sync + 'static,
    {
        self.recycle = Some(Box::new(recycle));
    }

    pub fn is_tracked(&self) -> bool {
        self.recycle.is_some()
    }

    /// Removes the recycle hook without firing it.
    pub fn detach(&mut self) {
        self.recycle = None;
    }
}

impl Default for Sample {
    fn default() -> Self {
        Self::new()
    }
}

/// Clones share buffers but never the recycle hook.
impl Clone for Sample {
    fn clone(&self) -> Self {
        Self {
            buffers: self.buffers.clone(),
            time: self.time,
            duration: self.duration,
            attributes: self.attributes.clone(),
            recycle: None,
        }
    }
}

impl fmt::Debug for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sample")
            .field("buffers", &self.buffers.len())
            .field("time", &self.time)
            .field("duration", &self.duration)
            .field("tracked", &self.recycle.is_some())
            .finish()
    }
}

impl Drop for Sample {
    fn drop(&mut self) {
        if let Some(recycle) = self.recycle.take() {
            recycle(std::mem::take(&mut self.buffers));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_aligned_buffer_alignment() {
        for align in [16, 64, 256] {
            let buf = AlignedBuffer::new(1000, align);
            let mapping = buf.lock().unwrap();
            assert_eq!(mapping.data.as_ptr() as usize % align, 0);
            buf.unlock().unwrap();
        }
    }

    #[test]
    fn test_aligned_buffer_write_then_lock() {
        let buf = AlignedBuffer::new(8, 16);
        buf.write(&[1, 2, 3]).unwrap();
        assert_eq!(buf.current_length(), 3);
        let mapping = buf.lock().unwrap();
        assert_eq!(&mapping.data[..], &[1, 2, 3]);
        assert!(buf.write(&[4]).is_err(), "write while locked");
        buf.unlock().unwrap();

        // The frozen view survives a rewrite of the buffer.
        buf.write(&[9, 9]).unwrap();
        assert_eq!(&mapping.data[..], &[1, 2, 3]);
        let again = buf.lock().unwrap();
        assert_eq!(&again.data[..], &[9, 9]);
        buf.unlock().unwrap();
        assert!(buf.unlock().is_err());
    }

    #[test]
    fn test_aligned_buffer_rejects_oversize() {
        let buf = AlignedBuffer::new(4, 16);
        assert!(buf.write(&[0; 5]).is_err());
        assert!(buf.set_current_length(5).is_err());
    }

    #[test]
    fn test_buffer_lock_unlocks_on_drop() {
        let buf: Arc<dyn MediaBuffer> = Arc::new(AlignedBuffer::from_slice(&[5, 6], 16));
        let guard = BufferLock::acquire(buf.clone()).unwrap();
        assert_eq!(&guard.data()[..], &[5, 6]);
        assert!(buf.write(&[1]).is_err());
        drop(guard);
        assert!(buf.write(&[1]).is_ok());
    }

    #[test]
    fn test_sample_recycles_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut sample = Sample::new().with_buffer(Arc::new(AlignedBuffer::new(4, 16)));
        let c = count.clone();
        sample.set_recycle(move |buffers| {
            assert_eq!(buffers.len(), 1);
            c.fetch_add(1, Ordering::SeqCst);
        });
        let copy = sample.clone();
        assert!(!copy.is_tracked());
        drop(copy);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        drop(sample);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sample_from_buffers_is_untracked() {
        let buffers: Vec<Arc<dyn MediaBuffer>> = vec![
            Arc::new(AlignedBuffer::from_slice(&[1, 2], 16)),
            Arc::new(AlignedBuffer::from_slice(&[3], 16)),
        ];
        let sample = Sample::from_buffers(buffers);
        assert_eq!(sample.buffer_count(), 2);
        assert_eq!(sample.total_length(), 3);
        assert_eq!(sample.time(), None);
        assert!(!sample.is_tracked());
        assert!(!sample.is_clean_point());
    }

    #[test]
    fn test_tick_conversion() {
        assert_eq!(duration_to_ticks(Duration::from_millis(40)), 400_000);
        assert_eq!(ticks_to_duration(TICKS_PER_SECOND), Duration::from_secs(1));
        assert_eq!(ticks_to_duration(-5), Duration::ZERO);
    }
}
