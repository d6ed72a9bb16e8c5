//! # Transform driver
//!
//! Owns one engine from `open()` to `close()` and runs the
//! push-then-drain loop for every packet.
//!
//! ```text
//! Closed -> Opening -> Negotiating -> Streaming <-> Draining
//!                                       |  ^
//!                                       v  |
//!                                  FormatChanging
//! any state -- engine handle lost --> Faulted -- close() --> Closed
//! ```
//!
//! `submit()` runs synchronously: it pushes the packet, pulls every frame
//! the engine has ready, hands each to the [`DecodeSink`] and returns.
//! Control statuses from the engine (need more input, format changed,
//! type not set) never surface as errors.
//!
//! ```rust
//! use std::sync::Arc;
//! use codecbridge::av::{CodecType, Packet};
//! use codecbridge::codec::{subtypes, VideoCodecParameters, VideoVariant};
//! use codecbridge::config::DecoderOptions;
//! use codecbridge::engine::fake::{FakeConfig, FakePlatform};
//! use codecbridge::transform::{DriverState, NullSink, TransformDriver};
//!
//! # fn main() -> codecbridge::Result<()> {
//! let platform = Arc::new(
//!     FakePlatform::new().with_engine(FakeConfig::video(subtypes::H264, 64, 32)),
//! );
//! let hooks = VideoVariant::new(VideoCodecParameters::new(CodecType::H264, 64, 32))?;
//! let mut driver = TransformDriver::new(platform, hooks, Box::new(NullSink), DecoderOptions::new());
//! driver.open()?;
//! driver.submit(Packet::new(vec![0u8; 64]).with_pts(0).with_key_flag(true))?;
//! driver.submit(Packet::end_of_stream())?;
//! assert_eq!(driver.state(), DriverState::Draining);
//! driver.close()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use crate::av::{FrameFormat, Packet};
use crate::config::{DecoderOptions, PROP_COPY, PROP_POOL};
use crate::engine::{
    keys, AlignedBuffer, Engine, EngineError, EnginePlatform, EngineResult, MediaType, Message,
    RuntimeGuard, Sample, StreamInfo,
};
use crate::error::{BridgeError, Result};
use crate::transform::bridge::{self, DrainOptions};
use crate::transform::discovery::discover;
use crate::transform::negotiate::{self, Commit, Direction};
use crate::transform::pool::SamplePool;
use crate::transform::surface::SurfacePool;
use crate::transform::{DecodeSink, DecoderHooks};

/// Format changes tolerated back to back before a pull is abandoned.
const MAX_FORMAT_CHANGES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Closed,
    Opening,
    Negotiating,
    Streaming,
    FormatChanging,
    /// End of stream was signalled and every frame delivered.
    Draining,
    /// The engine handle was lost; only `close()` is accepted.
    Faulted,
}

impl DriverState {
    pub fn name(&self) -> &'static str {
        match self {
            DriverState::Closed => "closed",
            DriverState::Opening => "opening",
            DriverState::Negotiating => "negotiating",
            DriverState::Streaming => "streaming",
            DriverState::FormatChanging => "format-changing",
            DriverState::Draining => "draining",
            DriverState::Faulted => "faulted",
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything that exists only while an engine is open.
struct Session {
    engine: Box<dyn Engine>,
    name: String,
    ids: (u32, u32),
    input_info: StreamInfo,
    output_info: StreamInfo,
    input_type: MediaType,
    output_type: MediaType,
    format: FrameFormat,
    // Released after the engine.
    _runtime: RuntimeGuard,
}

/// Result of one output pull.
enum Pull {
    Delivered,
    FormatChanged,
    Drained,
}

pub struct TransformDriver<H: DecoderHooks> {
    platform: Arc<dyn EnginePlatform>,
    hooks: H,
    sink: Box<dyn DecodeSink>,
    options: DecoderOptions,
    surfaces: Option<Arc<dyn SurfacePool>>,
    pool: SamplePool,
    pool_enabled: bool,
    state: DriverState,
    session: Option<Session>,
    discontinuity: bool,
}

impl<H: DecoderHooks> TransformDriver<H> {
    pub fn new(
        platform: Arc<dyn EnginePlatform>,
        hooks: H,
        sink: Box<dyn DecodeSink>,
        options: DecoderOptions,
    ) -> Self {
        Self {
            platform,
            hooks,
            sink,
            pool_enabled: options.use_pool,
            options,
            surfaces: None,
            pool: SamplePool::new(),
            state: DriverState::Closed,
            session: None,
            discontinuity: false,
        }
    }

    /// Routes GPU surfaces through `pool` when no copy is requested.
    pub fn with_surface_pool(mut self, pool: Arc<dyn SurfacePool>) -> Self {
        self.surfaces = Some(pool);
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// The output sample pool of the current (or last) session.
    pub fn pool(&self) -> &SamplePool {
        &self.pool
    }

    pub fn is_pool_enabled(&self) -> bool {
        self.pool_enabled
    }

    /// Layout of decoded frames, once negotiated.
    pub fn output_format(&self) -> Option<&FrameFormat> {
        self.session.as_ref().map(|s| &s.format)
    }

    pub fn output_type(&self) -> Option<&MediaType> {
        self.session.as_ref().map(|s| &s.output_type)
    }

    pub fn input_type(&self) -> Option<&MediaType> {
        self.session.as_ref().map(|s| &s.input_type)
    }

    pub fn engine_name(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.name.as_str())
    }

    /// True when the next input sample will carry the discontinuity flag.
    pub fn is_discontinuous(&self) -> bool {
        self.discontinuity
    }

    pub fn options(&self) -> &DecoderOptions {
        &self.options
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Finds an engine, negotiates both streams and starts streaming.
    pub fn open(&mut self) -> Result<()> {
        if self.state != DriverState::Closed {
            return Err(BridgeError::InvalidState(self.state.name()));
        }
        crate::codec::register_labels();
        self.state = DriverState::Opening;
        match self.open_session() {
            Ok(session) => {
                log::info!("decoder ready on engine '{}'", session.name);
                self.session = Some(session);
                self.pool = SamplePool::new();
                self.pool_enabled = self.options.use_pool;
                self.discontinuity = false;
                self.state = DriverState::Streaming;
                self.sink.on_open();
                Ok(())
            }
            Err(e) => {
                log::error!("open failed: {}", e);
                self.state = DriverState::Closed;
                Err(e)
            }
        }
    }

    fn open_session(&mut self) -> Result<Session> {
        let runtime = RuntimeGuard::acquire(self.platform.clone()).map_err(|e| {
            BridgeError::EngineNotFound(format!("{} runtime startup failed: {}", self.platform.name(), e))
        })?;
        let class = self.hooks.capability_class();
        let hooks = &mut self.hooks;
        let found = discover(
            self.platform.as_ref(),
            &class,
            self.options.activate_index,
            |engine| hooks.accept_engine(engine),
        )?;
        let mut engine = found.engine;
        self.state = DriverState::Negotiating;

        match self.negotiate_engine(engine.as_mut()) {
            Ok((ids, negotiated, input_info, output_info, format)) => {
                self.sink
                    .on_output_format_changed(&negotiated.output, &format);
                for message in [Message::BeginStreaming, Message::StartOfStream] {
                    match engine.process_message(message) {
                        Ok(()) => {}
                        Err(e) if e.is_handle_loss() => {
                            let _ = engine.shutdown();
                            return Err(BridgeError::Fatal(format!("{}: {}", message, e)));
                        }
                        Err(e) => log::warn!("{} ignored by engine: {}", message, e),
                    }
                }
                Ok(Session {
                    engine,
                    name: found.name,
                    ids,
                    input_info,
                    output_info,
                    input_type: negotiated.input,
                    output_type: negotiated.output,
                    format,
                    _runtime: runtime,
                })
            }
            Err(e) => {
                if let Err(shutdown) = engine.shutdown() {
                    log::debug!("engine shutdown after failed open: {}", shutdown);
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn negotiate_engine(
        &mut self,
        engine: &mut dyn Engine,
    ) -> Result<((u32, u32), negotiate::Negotiated, StreamInfo, StreamInfo, FrameFormat)> {
        let ids = match engine.stream_ids() {
            Ok(ids) => ids,
            Err(EngineError::NotImplemented) => (0, 0),
            Err(e) => return Err(open_failure("stream ids", e)),
        };
        log::debug!("stream ids: input {}, output {}", ids.0, ids.1);

        let negotiated = negotiate::negotiate(
            engine,
            &self.hooks,
            ids,
            self.options.input_type_index,
            self.options.output_type_index,
        )?;
        let input_info = engine
            .input_stream_info(ids.0)
            .map_err(|e| open_failure("input stream info", e))?;
        let output_info = engine
            .output_stream_info(ids.1)
            .map_err(|e| open_failure("output stream info", e))?;
        log::debug!("input info: {:?}", input_info);
        log::debug!("output info: {:?}", output_info);

        let format = self.hooks.on_output_format_committed(&negotiated.output)?;
        Ok((ids, negotiated, input_info, output_info, format))
    }

    /// Pushes one packet and delivers every frame that becomes available.
    ///
    /// An end-of-stream packet drains the engine completely and moves the
    /// driver to [`DriverState::Draining`].
    pub fn submit(&mut self, packet: Packet) -> Result<()> {
        match self.state {
            DriverState::Streaming => {}
            DriverState::Draining if packet.is_end_of_stream() => return Ok(()),
            DriverState::Draining => {
                log::debug!("input after drain, streaming again");
                self.state = DriverState::Streaming;
            }
            DriverState::Faulted => return Err(faulted()),
            other => return Err(BridgeError::InvalidState(other.name())),
        }

        if packet.is_end_of_stream() {
            return self.end_of_stream();
        }

        let data = self.hooks.filter_bytes(packet.data.clone());
        let alignment = self
            .session
            .as_ref()
            .map(|s| s.input_info.alignment)
            .unwrap_or(0);
        let mut sample = bridge::build_input_sample(
            data,
            packet.time_ticks(),
            packet.duration_ticks(),
            packet.is_key,
            alignment,
            self.options.input_views,
        )
        .map_err(|e| self.local(e))?;
        if self.discontinuity {
            sample
                .attributes_mut()
                .set_u32(keys::SAMPLE_DISCONTINUITY, 1);
            self.discontinuity = false;
        }

        let pushed = self.push(&sample);
        if let Err(e) = &pushed {
            if !e.is_recoverable() {
                return pushed;
            }
        }
        let drained = self.drain_output();
        pushed.and(drained)
    }

    fn push(&mut self, sample: &Sample) -> Result<()> {
        match self.process_input(sample) {
            Ok(()) => Ok(()),
            Err(EngineError::NotAccepting) => {
                log::debug!("engine not accepting input, draining before retry");
                // A lost output frame does not cancel the retry.
                let drained = self.drain_output();
                if let Err(e) = &drained {
                    if !e.is_recoverable() {
                        return drained;
                    }
                }
                match self.process_input(sample) {
                    Ok(()) => drained,
                    Err(EngineError::NotAccepting) => {
                        self.discontinuity = true;
                        Err(self.local(BridgeError::Decode(
                            "engine refused input again after drain".into(),
                        )))
                    }
                    Err(e) => Err(self.input_failure(e)),
                }
            }
            Err(e) => Err(self.input_failure(e)),
        }
    }

    fn process_input(&mut self, sample: &Sample) -> EngineResult<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| EngineError::Failed("no engine".into()))?;
        session.engine.process_input(session.ids.0, sample)
    }

    fn input_failure(&mut self, e: EngineError) -> BridgeError {
        if e.is_handle_loss() {
            return self.fault("input", e);
        }
        self.discontinuity = true;
        self.local(BridgeError::Decode(format!("input rejected: {}", e)))
    }

    fn end_of_stream(&mut self) -> Result<()> {
        self.message(Message::EndOfStream)?;
        self.message(Message::Drain)?;
        let drained = self.drain_output();
        if let Err(e) = &drained {
            if !e.is_recoverable() {
                return drained;
            }
        }
        log::debug!("end of stream reached");
        self.state = DriverState::Draining;
        self.sink.on_end_of_stream();
        drained
    }

    /// Pulls until the engine needs more input.
    fn drain_output(&mut self) -> Result<()> {
        let mut changes = 0;
        loop {
            match self.process_output()? {
                Pull::Delivered => changes = 0,
                Pull::FormatChanged => {
                    changes += 1;
                    if changes > MAX_FORMAT_CHANGES {
                        return Err(self.local(BridgeError::Decode(format!(
                            "output format changed {} times without a frame",
                            changes
                        ))));
                    }
                }
                Pull::Drained => return Ok(()),
            }
        }
    }

    fn process_output(&mut self) -> Result<Pull> {
        let session = self
            .session
            .as_mut()
            .ok_or(BridgeError::InvalidState(DriverState::Closed.name()))?;
        let out_id = session.ids.1;

        let sample = if session.output_info.provides_samples() {
            None
        } else {
            let pooled = if self.pool_enabled {
                self.pool.try_pop()
            } else {
                None
            };
            let mut sample = pooled.unwrap_or_else(|| new_output_sample(&session.output_info));
            if self.pool_enabled {
                self.pool.lend(&mut sample);
            }
            Some(sample)
        };

        match session.engine.process_output(out_id, sample) {
            Ok(out) => {
                if !out.status.is_empty() {
                    log::debug!("output status {:#x}", out.status.bits());
                }
                let Some(sample) = out.sample else {
                    log::debug!("engine returned no output sample");
                    return Ok(Pull::Drained);
                };
                let options = DrainOptions {
                    copy_mode: self.options.copy_mode,
                    stride_hint: self.hooks.stride_hint(),
                    surfaces: self.surfaces.as_deref(),
                };
                let frame = bridge::drain_sample(sample, &session.format, options)
                    .map_err(|e| self.local(e))?;
                self.sink.on_frame(frame);
                Ok(Pull::Delivered)
            }
            Err(EngineError::NeedMoreInput) => Ok(Pull::Drained),
            Err(EngineError::StreamChange) => {
                self.change_output_format()?;
                Ok(Pull::FormatChanged)
            }
            Err(e) if e.is_handle_loss() => Err(self.fault("output", e)),
            Err(e) => {
                if self.pool_enabled {
                    log::warn!("output failed with pooled samples, disabling the pool");
                    self.pool_enabled = false;
                    self.pool.clear();
                }
                Err(self.local(BridgeError::Decode(format!("output failed: {}", e))))
            }
        }
    }

    /// Re-selects the output type after the engine reported a change.
    fn change_output_format(&mut self) -> Result<()> {
        let resume = self.state;
        self.state = DriverState::FormatChanging;
        self.pool.clear();

        let session = self
            .session
            .as_mut()
            .ok_or(BridgeError::InvalidState(DriverState::Closed.name()))?;
        let out_id = session.ids.1;
        let committed = negotiate::commit(
            session.engine.as_mut(),
            &self.hooks,
            Direction::Output,
            out_id,
            self.options.output_type_index,
        );
        let output_type = match committed {
            Ok(Commit::Committed(mt)) => mt,
            Ok(Commit::Later) => {
                return Err(self.fault(
                    "output renegotiation",
                    EngineError::Failed("output type deferred".into()),
                ))
            }
            Err(e) => {
                self.state = DriverState::Faulted;
                log::error!("output renegotiation failed: {}", e);
                return Err(e);
            }
        };
        let output_info = match session.engine.output_stream_info(out_id) {
            Ok(info) => info,
            Err(e) => return Err(self.fault("output stream info", e)),
        };
        let format = match self.hooks.on_output_format_committed(&output_type) {
            Ok(format) => format,
            Err(e) => {
                self.state = DriverState::Faulted;
                return Err(e);
            }
        };
        log::info!("output format changed to {}", format);

        session.output_info = output_info;
        session.format = format;
        session.output_type = output_type;
        self.sink
            .on_output_format_changed(&session.output_type, &session.format);
        self.state = resume;
        Ok(())
    }

    /// Discards buffered input and marks the next packet discontinuous.
    pub fn flush(&mut self) -> Result<()> {
        match self.state {
            DriverState::Streaming | DriverState::Draining => {}
            DriverState::Faulted => return Err(faulted()),
            other => return Err(BridgeError::InvalidState(other.name())),
        }
        self.message(Message::Flush)?;
        if self.state == DriverState::Draining {
            self.message(Message::StartOfStream)?;
            self.state = DriverState::Streaming;
        }
        self.discontinuity = true;
        self.sink.on_flush();
        Ok(())
    }

    /// Shuts the engine down and releases everything tied to it.
    ///
    /// Closing a closed driver does nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.state == DriverState::Closed {
            return Ok(());
        }
        if let Some(mut session) = self.session.take() {
            if self.state != DriverState::Faulted {
                if let Err(e) = session.engine.process_message(Message::EndStreaming) {
                    log::debug!("end-streaming ignored: {}", e);
                }
            }
            match session.engine.shutdown() {
                Ok(()) | Err(EngineError::NotImplemented) => {}
                Err(e) => log::warn!("engine shutdown failed: {}", e),
            }
            self.pool.close();
            log::info!("engine '{}' closed", session.name);
        }
        self.state = DriverState::Closed;
        self.discontinuity = false;
        self.sink.on_close();
        Ok(())
    }

    /// Updates one property. `pool` and `copy` apply immediately; type and
    /// engine indices take effect at the next `open()`.
    pub fn set_property(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.options.clone();
        next.apply(key, value)?;
        match key {
            PROP_POOL if self.session.is_some() => {
                self.pool_enabled = next.use_pool;
                if !next.use_pool {
                    self.pool.clear();
                }
            }
            PROP_POOL | PROP_COPY => {}
            _ if self.session.is_some() => {
                log::info!("property {} applies at the next open", key)
            }
            _ => {}
        }
        self.options = next;
        Ok(())
    }

    fn message(&mut self, message: Message) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(BridgeError::InvalidState(self.state.name()));
        };
        match session.engine.process_message(message) {
            Ok(()) => Ok(()),
            Err(e) if e.is_handle_loss() => Err(self.fault(&message.to_string(), e)),
            Err(e) => {
                log::warn!("{} failed: {}", message, e);
                Ok(())
            }
        }
    }

    fn local(&mut self, e: BridgeError) -> BridgeError {
        log::warn!("{}", e);
        self.sink.on_decode_error(&e);
        e
    }

    fn fault(&mut self, context: &str, e: EngineError) -> BridgeError {
        log::error!("engine lost during {}: {}", context, e);
        self.state = DriverState::Faulted;
        BridgeError::Fatal(format!("{}: {}", context, e))
    }
}

impl<H: DecoderHooks> Drop for TransformDriver<H> {
    fn drop(&mut self) {
        if self.state != DriverState::Closed {
            let _ = self.close();
        }
    }
}

impl<H: DecoderHooks> fmt::Debug for TransformDriver<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformDriver")
            .field("state", &self.state)
            .field("engine", &self.engine_name())
            .field("pool", &self.pool)
            .field("pool_enabled", &self.pool_enabled)
            .field("discontinuity", &self.discontinuity)
            .finish()
    }
}

fn new_output_sample(info: &StreamInfo) -> Sample {
    let alignment = (info.alignment as usize).max(crate::engine::sample::MIN_ALIGNMENT);
    Sample::new().with_buffer(Arc::new(AlignedBuffer::new(info.size as usize, alignment)))
}

fn open_failure(step: &str, e: EngineError) -> BridgeError {
    if e.is_handle_loss() {
        BridgeError::Fatal(format!("{}: {}", step, e))
    } else {
        BridgeError::Negotiation(format!("{} failed: {}", step, e))
    }
}

fn faulted() -> BridgeError {
    BridgeError::Fatal("engine handle lost, close and reopen the decoder".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::CodecType;
    use crate::codec::{subtypes, VideoCodecParameters, VideoVariant};
    use crate::engine::fake::{FakeConfig, FakePlatform};
    use crate::transform::NullSink;

    fn driver(name: &str, config: FakeConfig) -> (TransformDriver<VideoVariant>, Arc<FakePlatform>) {
        let platform = Arc::new(FakePlatform::named(name).with_engine(config));
        let hooks = VideoVariant::new(VideoCodecParameters::new(CodecType::H264, 32, 16)).unwrap();
        let driver = TransformDriver::new(platform.clone(), hooks, Box::new(NullSink), DecoderOptions::new());
        (driver, platform)
    }

    fn packet(pts: i64) -> Packet {
        Packet::new(vec![pts as u8; 16]).with_pts(pts)
    }

    #[test]
    fn test_state_transitions() {
        let (mut driver, platform) = driver("driver-states", FakeConfig::video(subtypes::H264, 32, 16));
        assert_eq!(driver.state(), DriverState::Closed);
        assert!(matches!(driver.submit(packet(0)), Err(BridgeError::InvalidState(_))));
        driver.open().unwrap();
        assert_eq!(driver.state(), DriverState::Streaming);
        assert!(matches!(driver.open(), Err(BridgeError::InvalidState(_))));

        driver.submit(Packet::end_of_stream()).unwrap();
        assert_eq!(driver.state(), DriverState::Draining);
        driver.flush().unwrap();
        assert_eq!(driver.state(), DriverState::Streaming);

        let probe = platform.probe(0).unwrap();
        driver.close().unwrap();
        assert_eq!(driver.state(), DriverState::Closed);
        assert!(probe.is_shut_down());
        assert_eq!(probe.count_messages(Message::EndStreaming), 1);
        assert!(driver.pool().is_closed());
        driver.close().unwrap();
    }

    #[test]
    fn test_open_failure_returns_to_closed() {
        let (mut driver, _) = driver("driver-open-failure", FakeConfig::video(subtypes::HEVC, 32, 16));
        let err = driver.open().unwrap_err();
        assert!(matches!(err, BridgeError::EngineNotFound(_)));
        assert_eq!(driver.state(), DriverState::Closed);
    }

    #[test]
    fn test_tolerates_failing_start_messages() {
        let config = FakeConfig::video(subtypes::H264, 32, 16)
            .failing_message(Message::BeginStreaming)
            .failing_message(Message::StartOfStream);
        let (mut driver, _) = driver("driver-start-messages", config);
        driver.open().unwrap();
        assert_eq!(driver.state(), DriverState::Streaming);
    }

    #[test]
    fn test_stream_ids_are_used() {
        let (mut driver, platform) = driver("driver-stream-ids", FakeConfig::video(subtypes::H264, 32, 16).with_stream_ids(3, 7));
        driver.open().unwrap();
        driver.submit(packet(1)).unwrap();
        assert_eq!(platform.probe(0).unwrap().emitted(), 1);
    }

    #[test]
    fn test_set_property_live() {
        let (mut driver, _) = driver("driver-properties", FakeConfig::video(subtypes::H264, 32, 16));
        driver.open().unwrap();
        driver.set_property(PROP_POOL, "0").unwrap();
        assert!(!driver.is_pool_enabled());
        driver.set_property(PROP_COPY, "2").unwrap();
        assert_eq!(driver.options().copy_mode, crate::config::CopyMode::Always);
        assert!(matches!(
            driver.set_property(PROP_COPY, "9"),
            Err(BridgeError::Config { .. })
        ));
        driver.set_property("in_type", "1").unwrap();
        assert_eq!(driver.options().input_type_index, Some(1));
    }

    #[test]
    fn test_drop_closes_engine() {
        let (mut driver, platform) = driver("driver-drop", FakeConfig::video(subtypes::H264, 32, 16));
        driver.open().unwrap();
        let probe = platform.probe(0).unwrap();
        drop(driver);
        assert!(probe.is_shut_down());
        assert_eq!(platform.shutdowns(), 1);
    }
}
