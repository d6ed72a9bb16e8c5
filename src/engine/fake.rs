//! Scriptable in-process engine platform.
//!
//! `FakePlatform` behaves like a synchronous decoder transform that
//! "decodes" by copying each input payload into an output picture. Its
//! quirks are configured per candidate through [`FakeConfig`]: deferred
//! type negotiation, input backpressure, mid-stream format changes,
//! engine-allocated samples, GPU surfaces and injected failures. A
//! [`FakeProbe`] observes the engine after it has been moved into a driver.
//!
//! ```rust
//! use codecbridge::codec::subtypes;
//! use codecbridge::engine::fake::{FakeConfig, FakePlatform};
//!
//! let platform = FakePlatform::new()
//!     .with_engine(FakeConfig::video(subtypes::H264, 320, 240).with_latency(2, 2));
//! assert_eq!(platform.candidate_count(), 1);
//! ```

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;

use super::attributes::{keys, AttrValue, Attributes, Guid, MediaType};
use super::sample::{AlignedBuffer, Mapping, MediaBuffer, Sample, SurfaceId};
use super::{
    CapabilityClass, Engine, EngineActivator, EngineError, EnginePlatform, EngineResult, Message,
    OutputBuffer, OutputStatus, StreamFlags, StreamInfo,
};
use crate::codec::{subtypes, video::pixel_format_for};

/// Behaviour of one fake engine candidate.
#[derive(Debug, Clone)]
pub struct FakeConfig {
    pub name: String,
    /// Engine attributes visible to discovery and acceptance tests.
    pub attributes: Attributes,
    pub input_types: Vec<MediaType>,
    pub output_types: Vec<MediaType>,
    /// Output types offered after a scripted format change.
    pub changed_output_types: Vec<MediaType>,
    pub enumerates_input: bool,
    pub enumerates_output: bool,
    /// `set_input_type` answers `TypeNotSet` until an output type is set.
    pub input_needs_output: bool,
    /// Output enumeration answers `TypeNotSet` until an input type is set.
    pub output_needs_input: bool,
    pub stream_ids: Option<(u32, u32)>,
    /// Packets held before output appears without backpressure.
    pub latency: usize,
    /// Packets held before input is refused.
    pub capacity: usize,
    pub always_refuse: bool,
    /// Report a format change once this many frames have been produced.
    pub format_change_after: Option<usize>,
    pub provides_samples: bool,
    /// Emit every picture on this GPU surface.
    pub surface: Option<SurfaceId>,
    pub input_alignment: u32,
    pub output_alignment: u32,
    /// Fail this many pulls that carry a caller sample.
    pub output_failures: usize,
    /// Messages answered with a failure.
    pub failing_messages: Vec<Message>,
    /// Output size when the output type carries no picture geometry.
    pub frame_bytes: usize,
}

impl FakeConfig {
    /// A decoder for `input_subtype` producing NV12, P010 and IYUV pictures.
    pub fn video(input_subtype: Guid, width: u32, height: u32) -> Self {
        let input = MediaType::with_subtype(keys::MEDIA_TYPE_VIDEO, input_subtype);
        let outputs = |w, h| {
            [subtypes::NV12, subtypes::P010, subtypes::IYUV]
                .into_iter()
                .map(|sub| video_type(sub, w, h))
                .collect::<Vec<_>>()
        };
        Self {
            name: "fake video decoder".to_string(),
            input_types: vec![input],
            output_types: outputs(width, height),
            changed_output_types: outputs(width * 2, height * 2),
            ..Self::base()
        }
    }

    /// A decoder for `input_subtype` producing float and 16 bit PCM.
    pub fn audio(input_subtype: Guid, sample_rate: u32, channels: u32) -> Self {
        let mut input = MediaType::with_subtype(keys::MEDIA_TYPE_AUDIO, input_subtype);
        input
            .attributes_mut()
            .set_u32(keys::AUDIO_SAMPLES_PER_SECOND, sample_rate);
        input.attributes_mut().set_u32(keys::AUDIO_NUM_CHANNELS, channels);
        let outputs = |rate| {
            vec![
                audio_type(subtypes::FLOAT, 32, rate, channels),
                audio_type(subtypes::PCM, 16, rate, channels),
            ]
        };
        Self {
            name: "fake audio decoder".to_string(),
            input_types: vec![input],
            output_types: outputs(sample_rate),
            changed_output_types: outputs(sample_rate * 2),
            frame_bytes: 1024 * 4 * channels as usize,
            ..Self::base()
        }
    }

    fn base() -> Self {
        Self {
            name: String::new(),
            attributes: Attributes::new(),
            input_types: Vec::new(),
            output_types: Vec::new(),
            changed_output_types: Vec::new(),
            enumerates_input: true,
            enumerates_output: true,
            input_needs_output: false,
            output_needs_input: false,
            stream_ids: None,
            latency: 0,
            capacity: usize::MAX,
            always_refuse: false,
            format_change_after: None,
            provides_samples: false,
            surface: None,
            input_alignment: 0,
            output_alignment: 0,
            output_failures: 0,
            failing_messages: Vec::new(),
            frame_bytes: 4096,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_attribute(mut self, key: Guid, value: AttrValue) -> Self {
        self.attributes.set(key, value);
        self
    }

    /// Marks the engine as asynchronous only.
    pub fn async_only(self) -> Self {
        self.with_attribute(keys::TRANSFORM_ASYNC, AttrValue::U32(1))
    }

    pub fn with_input_types(mut self, types: Vec<MediaType>) -> Self {
        self.input_types = types;
        self
    }

    pub fn with_output_types(mut self, types: Vec<MediaType>) -> Self {
        self.output_types = types;
        self
    }

    pub fn without_input_enumeration(mut self) -> Self {
        self.enumerates_input = false;
        self
    }

    pub fn without_output_enumeration(mut self) -> Self {
        self.enumerates_output = false;
        self
    }

    /// The first input commit is deferred until an output type exists.
    pub fn deferring_input(mut self) -> Self {
        self.input_needs_output = true;
        self
    }

    pub fn deferring_output(mut self) -> Self {
        self.output_needs_input = true;
        self
    }

    pub fn with_stream_ids(mut self, input: u32, output: u32) -> Self {
        self.stream_ids = Some((input, output));
        self
    }

    /// Holds `latency` packets before producing output and refuses input
    /// once `capacity` packets are held.
    pub fn with_latency(mut self, latency: usize, capacity: usize) -> Self {
        self.latency = latency;
        self.capacity = capacity.max(1);
        self
    }

    pub fn refusing_input(mut self) -> Self {
        self.always_refuse = true;
        self
    }

    pub fn with_format_change_after(mut self, frames: usize) -> Self {
        self.format_change_after = Some(frames);
        self
    }

    pub fn providing_samples(mut self) -> Self {
        self.provides_samples = true;
        self
    }

    pub fn with_surface(mut self, id: SurfaceId) -> Self {
        self.surface = Some(id);
        self.provides_samples = true;
        self
    }

    pub fn with_alignment(mut self, input: u32, output: u32) -> Self {
        self.input_alignment = input;
        self.output_alignment = output;
        self
    }

    pub fn with_output_failures(mut self, count: usize) -> Self {
        self.output_failures = count;
        self
    }

    pub fn failing_message(mut self, message: Message) -> Self {
        self.failing_messages.push(message);
        self
    }
}

/// An uncompressed video media type.
pub fn video_type(subtype: Guid, width: u32, height: u32) -> MediaType {
    let mut mt = MediaType::with_subtype(keys::MEDIA_TYPE_VIDEO, subtype);
    mt.attributes_mut().set_size(keys::FRAME_SIZE, width, height);
    mt.attributes_mut().set_ratio(keys::PIXEL_ASPECT_RATIO, 1, 1);
    mt
}

/// An uncompressed interleaved audio media type.
pub fn audio_type(subtype: Guid, bits: u32, sample_rate: u32, channels: u32) -> MediaType {
    let mut mt = MediaType::with_subtype(keys::MEDIA_TYPE_AUDIO, subtype);
    let attrs = mt.attributes_mut();
    attrs.set_u32(keys::AUDIO_BITS_PER_SAMPLE, bits);
    attrs.set_u32(keys::AUDIO_NUM_CHANNELS, channels);
    attrs.set_u32(keys::AUDIO_SAMPLES_PER_SECOND, sample_rate);
    attrs.set_u32(keys::AUDIO_BLOCK_ALIGNMENT, bits / 8 * channels);
    attrs.set_u32(
        keys::AUDIO_AVG_BYTES_PER_SECOND,
        bits / 8 * channels * sample_rate,
    );
    mt
}

#[derive(Debug)]
struct Held {
    data: Bytes,
    time: Option<i64>,
    duration: Option<i64>,
}

#[derive(Debug)]
struct FakeState {
    config: FakeConfig,
    attributes: Attributes,
    input_type: Option<MediaType>,
    output_type: Option<MediaType>,
    output_types: Vec<MediaType>,
    held: VecDeque<Held>,
    pressure: bool,
    draining: bool,
    pending_change: bool,
    change_fired: bool,
    accepted: usize,
    emitted: usize,
    refusals: usize,
    discontinuities: usize,
    set_output_calls: usize,
    messages: Vec<Message>,
    handle_lost: bool,
    shut_down: bool,
    output_failures_left: usize,
}

impl FakeState {
    fn new(config: FakeConfig) -> Self {
        Self {
            attributes: config.attributes.clone(),
            output_types: config.output_types.clone(),
            output_failures_left: config.output_failures,
            config,
            input_type: None,
            output_type: None,
            held: VecDeque::new(),
            pressure: false,
            draining: false,
            pending_change: false,
            change_fired: false,
            accepted: 0,
            emitted: 0,
            refusals: 0,
            discontinuities: 0,
            set_output_calls: 0,
            messages: Vec::new(),
            handle_lost: false,
            shut_down: false,
        }
    }

    fn check(&self) -> EngineResult<()> {
        if self.handle_lost {
            Err(EngineError::HandleLost)
        } else if self.shut_down {
            Err(EngineError::Failed("engine is shut down".into()))
        } else {
            Ok(())
        }
    }

    fn ids(&self) -> (u32, u32) {
        self.config.stream_ids.unwrap_or((0, 0))
    }

    fn check_input(&self, stream: u32) -> EngineResult<()> {
        self.check()?;
        if stream != self.ids().0 {
            return Err(EngineError::Failed(format!("bad input stream {}", stream)));
        }
        Ok(())
    }

    fn check_output(&self, stream: u32) -> EngineResult<()> {
        self.check()?;
        if stream != self.ids().1 {
            return Err(EngineError::Failed(format!("bad output stream {}", stream)));
        }
        Ok(())
    }

    /// Picture geometry of the committed output type, if it is video.
    fn picture(&self) -> Option<(crate::av::PixelFormat, u32, u32)> {
        let mt = self.output_type.as_ref()?;
        let pf = pixel_format_for(mt.subtype()?)?;
        let (w, h) = mt.attributes().size(keys::FRAME_SIZE)?;
        Some((pf, w, h))
    }

    fn frame_len(&self) -> usize {
        match self.picture() {
            Some((pf, w, h)) => pf.frame_size(w, h),
            None => self.config.frame_bytes,
        }
    }

    fn ready(&self) -> bool {
        !self.held.is_empty()
            && (self.draining || self.pressure || self.held.len() > self.config.latency)
    }

    fn normalize_output(&self, media_type: &MediaType) -> MediaType {
        let mut mt = media_type.clone();
        if let Some(pf) = mt.subtype().and_then(pixel_format_for) {
            if let Some((w, _)) = mt.attributes().size(keys::FRAME_SIZE) {
                mt.attributes_mut()
                    .set_u32(keys::DEFAULT_STRIDE, pf.bytes_per_line(w, 0) as u32);
            }
        }
        mt
    }
}

fn offers(types: &[MediaType], media_type: &MediaType) -> bool {
    types.iter().any(|t| t.subtype() == media_type.subtype())
}

/// Observes a fake engine from the outside.
#[derive(Clone)]
pub struct FakeProbe {
    state: Arc<Mutex<FakeState>>,
    surface_locks: Arc<AtomicIsize>,
}

impl FakeProbe {
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    pub fn count_messages(&self, message: Message) -> usize {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| **m == message)
            .count()
    }

    /// Input samples accepted so far.
    pub fn accepted(&self) -> usize {
        self.state.lock().accepted
    }

    /// Output units produced so far.
    pub fn emitted(&self) -> usize {
        self.state.lock().emitted
    }

    pub fn refusals(&self) -> usize {
        self.state.lock().refusals
    }

    /// Accepted input samples carrying the discontinuity flag.
    pub fn discontinuities(&self) -> usize {
        self.state.lock().discontinuities
    }

    pub fn held(&self) -> usize {
        self.state.lock().held.len()
    }

    pub fn set_output_calls(&self) -> usize {
        self.state.lock().set_output_calls
    }

    pub fn input_type(&self) -> Option<MediaType> {
        self.state.lock().input_type.clone()
    }

    pub fn output_type(&self) -> Option<MediaType> {
        self.state.lock().output_type.clone()
    }

    pub fn attribute(&self, key: Guid) -> Option<AttrValue> {
        self.state.lock().attributes.get(key).cloned()
    }

    /// True once a format change is queued but not yet reported.
    pub fn change_pending(&self) -> bool {
        self.state.lock().pending_change
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Makes every further engine call fail with `HandleLost`.
    pub fn lose_handle(&self) {
        self.state.lock().handle_lost = true;
    }

    /// Surface locks not yet released.
    pub fn surface_locks(&self) -> isize {
        self.surface_locks.load(Ordering::SeqCst)
    }
}

/// The fake transform itself.
pub struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
    surface_locks: Arc<AtomicIsize>,
}

impl FakeEngine {
    pub fn new(config: FakeConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::new(config))),
            surface_locks: Arc::new(AtomicIsize::new(0)),
        }
    }

    pub fn probe(&self) -> FakeProbe {
        FakeProbe {
            state: self.state.clone(),
            surface_locks: self.surface_locks.clone(),
        }
    }
}

impl Engine for FakeEngine {
    fn attributes(&self) -> Attributes {
        self.state.lock().attributes.clone()
    }

    fn set_attribute(&mut self, key: Guid, value: AttrValue) -> EngineResult<()> {
        let mut st = self.state.lock();
        st.check()?;
        st.attributes.set(key, value);
        Ok(())
    }

    fn stream_ids(&self) -> EngineResult<(u32, u32)> {
        let st = self.state.lock();
        st.check()?;
        st.config.stream_ids.ok_or(EngineError::NotImplemented)
    }

    fn input_available_type(&self, stream: u32, index: u32) -> EngineResult<MediaType> {
        let st = self.state.lock();
        st.check_input(stream)?;
        if !st.config.enumerates_input {
            return Err(EngineError::NotImplemented);
        }
        st.config
            .input_types
            .get(index as usize)
            .cloned()
            .ok_or(EngineError::NoMoreTypes)
    }

    fn output_available_type(&self, stream: u32, index: u32) -> EngineResult<MediaType> {
        let st = self.state.lock();
        st.check_output(stream)?;
        if !st.config.enumerates_output {
            return Err(EngineError::NotImplemented);
        }
        if st.config.output_needs_input && st.input_type.is_none() {
            return Err(EngineError::TypeNotSet);
        }
        st.output_types
            .get(index as usize)
            .cloned()
            .ok_or(EngineError::NoMoreTypes)
    }

    fn set_input_type(&mut self, stream: u32, media_type: &MediaType) -> EngineResult<()> {
        let mut st = self.state.lock();
        st.check_input(stream)?;
        if st.config.input_needs_output && st.output_type.is_none() {
            return Err(EngineError::TypeNotSet);
        }
        if !st.config.input_types.is_empty() && !offers(&st.config.input_types, media_type) {
            return Err(EngineError::Failed("input type not supported".into()));
        }
        st.input_type = Some(media_type.clone());
        Ok(())
    }

    fn set_output_type(&mut self, stream: u32, media_type: &MediaType) -> EngineResult<()> {
        let mut st = self.state.lock();
        st.check_output(stream)?;
        if st.config.output_needs_input && st.input_type.is_none() {
            return Err(EngineError::TypeNotSet);
        }
        if !st.output_types.is_empty() && !offers(&st.output_types, media_type) {
            return Err(EngineError::Failed("output type not supported".into()));
        }
        let normalized = st.normalize_output(media_type);
        let changed = st
            .output_type
            .as_ref()
            .map(|current| *current != normalized)
            .unwrap_or(false);
        if changed && st.accepted > 0 {
            st.pending_change = true;
        }
        st.output_type = Some(normalized);
        st.set_output_calls += 1;
        Ok(())
    }

    fn input_current_type(&self, stream: u32) -> EngineResult<MediaType> {
        let st = self.state.lock();
        st.check_input(stream)?;
        st.input_type.clone().ok_or(EngineError::TypeNotSet)
    }

    fn output_current_type(&self, stream: u32) -> EngineResult<MediaType> {
        let st = self.state.lock();
        st.check_output(stream)?;
        st.output_type.clone().ok_or(EngineError::TypeNotSet)
    }

    fn input_stream_info(&self, stream: u32) -> EngineResult<StreamInfo> {
        let st = self.state.lock();
        st.check_input(stream)?;
        Ok(StreamInfo {
            flags: StreamFlags::WHOLE_SAMPLES | StreamFlags::DOES_NOT_ADDREF,
            size: 0,
            alignment: st.config.input_alignment,
            max_latency: 0,
            max_lookahead: st.config.capacity.min(u32::MAX as usize) as u32,
        })
    }

    fn output_stream_info(&self, stream: u32) -> EngineResult<StreamInfo> {
        let st = self.state.lock();
        st.check_output(stream)?;
        if st.output_type.is_none() {
            return Err(EngineError::TypeNotSet);
        }
        let mut flags = StreamFlags::WHOLE_SAMPLES | StreamFlags::SINGLE_SAMPLE_PER_BUFFER;
        if st.config.provides_samples {
            flags |= StreamFlags::PROVIDES_SAMPLES;
        }
        Ok(StreamInfo {
            flags,
            size: st.frame_len() as u32,
            alignment: st.config.output_alignment,
            max_latency: 0,
            max_lookahead: 0,
        })
    }

    fn process_input(&mut self, stream: u32, sample: &Sample) -> EngineResult<()> {
        let mut st = self.state.lock();
        st.check_input(stream)?;
        if st.input_type.is_none() {
            return Err(EngineError::Failed("input type not set".into()));
        }
        if st.config.always_refuse || st.held.len() >= st.config.capacity {
            st.refusals += 1;
            st.pressure = true;
            return Err(EngineError::NotAccepting);
        }
        let mut data = BytesMut::with_capacity(sample.total_length());
        let alignment = st.config.input_alignment as usize;
        for buffer in sample.buffers() {
            let mapping = buffer.lock()?;
            let misaligned = alignment > 1
                && !mapping.data.is_empty()
                && mapping.data.as_ptr() as usize % alignment != 0;
            data.extend_from_slice(&mapping.data);
            buffer.unlock()?;
            if misaligned {
                return Err(EngineError::Failed(format!(
                    "input buffer not aligned to {} bytes",
                    alignment
                )));
            }
        }
        if sample.is_discontinuity() {
            st.discontinuities += 1;
        }
        st.draining = false;
        st.held.push_back(Held {
            data: data.freeze(),
            time: sample.time(),
            duration: sample.duration(),
        });
        st.accepted += 1;
        Ok(())
    }

    fn process_output(&mut self, stream: u32, sample: Option<Sample>) -> EngineResult<OutputBuffer> {
        let mut st = self.state.lock();
        st.check_output(stream)?;
        if st.output_type.is_none() {
            return Err(EngineError::TypeNotSet);
        }
        if st.pending_change {
            st.pending_change = false;
            return Err(EngineError::StreamChange);
        }
        if !st.ready() {
            if st.held.is_empty() {
                st.draining = false;
            }
            return Err(EngineError::NeedMoreInput);
        }
        if st.config.format_change_after == Some(st.emitted) && !st.change_fired {
            st.change_fired = true;
            st.output_types = st.config.changed_output_types.clone();
            st.output_type = None;
            log::debug!("fake engine: output format changed after {} frames", st.emitted);
            return Err(EngineError::StreamChange);
        }
        if sample.is_some() && st.output_failures_left > 0 {
            st.output_failures_left -= 1;
            return Err(EngineError::Failed("output sample rejected".into()));
        }

        let len = st.frame_len();
        let held = match st.held.pop_front() {
            Some(held) => held,
            None => return Err(EngineError::NeedMoreInput),
        };
        st.pressure = false;
        let mut payload = vec![0u8; len];
        let n = held.data.len().min(len);
        payload[..n].copy_from_slice(&held.data[..n]);

        let mut out = if let Some(id) = st.config.surface {
            let (pitch, data) = match st.picture() {
                Some((pf, w, h)) => {
                    let pitch = (pf.bytes_per_line(w, 0) + 63) & !63;
                    let size: usize = (0..pf.plane_count())
                        .map(|p| pf.plane_pitch(pitch, p) * pf.plane_height(h, p))
                        .sum();
                    let mut data = vec![0u8; size];
                    data[..n.min(size)].copy_from_slice(&payload[..n.min(size)]);
                    (pitch, data)
                }
                None => (len, payload),
            };
            Sample::new().with_buffer(Arc::new(SurfaceBuffer {
                id,
                data: Bytes::from(data),
                pitch,
                locks: AtomicUsize::new(0),
                outstanding: self.surface_locks.clone(),
            }))
        } else if st.config.provides_samples {
            Sample::new().with_buffer(Arc::new(AlignedBuffer::from_slice(
                &payload,
                st.config.output_alignment as usize,
            )))
        } else {
            let sample = sample.ok_or_else(|| EngineError::Failed("no output sample".into()))?;
            let buffer = sample
                .buffers()
                .first()
                .cloned()
                .ok_or_else(|| EngineError::Failed("output sample has no buffer".into()))?;
            buffer.write(&payload)?;
            sample
        };
        if let Some(t) = held.time {
            out.set_time(t);
        }
        if let Some(d) = held.duration {
            out.set_duration(d);
        }
        st.emitted += 1;
        Ok(OutputBuffer {
            sample: Some(out),
            status: OutputStatus::empty(),
        })
    }

    fn process_message(&mut self, message: Message) -> EngineResult<()> {
        let mut st = self.state.lock();
        st.check()?;
        st.messages.push(message);
        if st.config.failing_messages.contains(&message) {
            return Err(EngineError::Failed(format!("{} rejected", message)));
        }
        match message {
            Message::Flush => {
                st.held.clear();
                st.pressure = false;
                st.draining = false;
            }
            Message::Drain => st.draining = true,
            _ => {}
        }
        Ok(())
    }

    fn shutdown(&mut self) -> EngineResult<()> {
        let mut st = self.state.lock();
        if st.handle_lost {
            return Err(EngineError::HandleLost);
        }
        st.shut_down = true;
        Ok(())
    }
}

/// A GPU surface as seen through the buffer interface.
#[derive(Debug)]
pub struct SurfaceBuffer {
    id: SurfaceId,
    data: Bytes,
    pitch: usize,
    locks: AtomicUsize,
    outstanding: Arc<AtomicIsize>,
}

impl MediaBuffer for SurfaceBuffer {
    fn lock(&self) -> EngineResult<Mapping> {
        self.locks.fetch_add(1, Ordering::SeqCst);
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(Mapping {
            data: self.data.clone(),
            pitch: Some(self.pitch),
        })
    }

    fn unlock(&self) -> EngineResult<()> {
        let prev = self
            .locks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match prev {
            Ok(_) => {
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
            Err(_) => Err(EngineError::Failed("surface not locked".into())),
        }
    }

    fn current_length(&self) -> usize {
        self.data.len()
    }

    fn max_length(&self) -> usize {
        self.data.len()
    }

    fn surface(&self) -> Option<SurfaceId> {
        Some(self.id)
    }
}

struct FakeActivator {
    index: usize,
    config: FakeConfig,
    attributes: Attributes,
    shared: Arc<PlatformShared>,
}

impl EngineActivator for FakeActivator {
    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn activate(&mut self) -> EngineResult<Box<dyn Engine>> {
        let engine = FakeEngine::new(self.config.clone());
        let mut probes = self.shared.probes.lock();
        if probes.len() <= self.index {
            probes.resize_with(self.index + 1, || None);
        }
        probes[self.index] = Some(engine.probe());
        self.shared.activations.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(engine))
    }

    fn shutdown(&mut self) -> EngineResult<()> {
        self.shared.activator_shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct PlatformShared {
    probes: Mutex<Vec<Option<FakeProbe>>>,
    activations: AtomicUsize,
    activator_shutdowns: AtomicUsize,
    startups: AtomicUsize,
    shutdowns: AtomicUsize,
}

/// A platform serving [`FakeEngine`] candidates in insertion order.
pub struct FakePlatform {
    name: String,
    candidates: Vec<FakeConfig>,
    failing_enumeration: bool,
    shared: Arc<PlatformShared>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::named("fake")
    }

    /// Runtime reference counts are keyed by platform name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            candidates: Vec::new(),
            failing_enumeration: false,
            shared: Arc::new(PlatformShared::default()),
        }
    }

    pub fn with_engine(mut self, config: FakeConfig) -> Self {
        self.candidates.push(config);
        self
    }

    pub fn failing_enumeration(mut self) -> Self {
        self.failing_enumeration = true;
        self
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// Probe of the engine most recently activated from candidate `index`.
    pub fn probe(&self, index: usize) -> Option<FakeProbe> {
        self.shared.probes.lock().get(index).cloned().flatten()
    }

    pub fn activations(&self) -> usize {
        self.shared.activations.load(Ordering::SeqCst)
    }

    pub fn activator_shutdowns(&self) -> usize {
        self.shared.activator_shutdowns.load(Ordering::SeqCst)
    }

    pub fn startups(&self) -> usize {
        self.shared.startups.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shared.shutdowns.load(Ordering::SeqCst)
    }
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl EnginePlatform for FakePlatform {
    fn name(&self) -> &str {
        &self.name
    }

    fn startup(&self) -> EngineResult<()> {
        self.shared.startups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) -> EngineResult<()> {
        self.shared.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn enumerate(&self, class: &CapabilityClass) -> EngineResult<Vec<Box<dyn EngineActivator>>> {
        if self.failing_enumeration {
            return Err(EngineError::Failed("enumeration failed".into()));
        }
        let mut activators: Vec<Box<dyn EngineActivator>> = Vec::new();
        for (index, config) in self.candidates.iter().enumerate() {
            let matches = config.input_types.is_empty()
                || config
                    .input_types
                    .iter()
                    .any(|t| t.subtype() == Some(class.input_subtype));
            if !matches {
                continue;
            }
            let mut attributes = config.attributes.clone();
            attributes.set_string(keys::FRIENDLY_NAME, config.name.clone());
            activators.push(Box::new(FakeActivator {
                index,
                config: config.clone(),
                attributes,
                shared: self.shared.clone(),
            }));
        }
        Ok(activators)
    }
}
